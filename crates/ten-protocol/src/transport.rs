use crate::error::ProtocolError;
use crate::frame::{Command, TenFrame};
use crate::protocol::{PeerHandler, Protocol, ProtocolRole, ProtocolState};
use crate::socket_config::{self, ZmqContext};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tmq::Multipart;
use tokio::sync::{mpsc, Mutex};
use ten_message::Msg;
use tracing::{debug, info, warn};
use uuid::Uuid;

fn state_from_u8(v: u8) -> ProtocolState {
    match v {
        0 => ProtocolState::Connecting,
        1 => ProtocolState::Connected,
        2 => ProtocolState::Closing,
        _ => ProtocolState::Closed,
    }
}

enum ReactorCommand {
    Send(Multipart),
    Shutdown,
}

/// Concrete `msgpack://` transport: a dealer socket on the connecting side,
/// a router socket on the listening side, both framed with `TenFrame` and
/// carrying msgpack-encoded `Msg` bodies. The socket itself is owned
/// exclusively by a spawned reactor task (the teacher's pattern for keeping
/// a non-`Send` or single-owner resource off the calling task's stack);
/// `send`/`recv` talk to that task over channels.
///
/// A `Server`-role instance (created via `bind`) represents the shared
/// router socket itself; `listen` arms per-peer demultiplexing on top of
/// it, handing each newly seen peer identity its own `PeerProtocol` rather
/// than mixing every peer's traffic into this instance's own `recv`.
pub struct MsgpackZmqProtocol {
    role: ProtocolRole,
    state: Arc<AtomicU8>,
    ctx: ZmqContext,
    cmd_tx: mpsc::UnboundedSender<ReactorCommand>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<Msg>>,
    /// `Server`-role demux state: known peer identities mapped to that
    /// peer's inbound channel, and the accept callback `listen` installs.
    /// Traffic from an identity arriving before `listen` is called (so
    /// `on_accept` is still `None`) is dropped — there is no peer handle
    /// to route it to yet.
    peers: Arc<DashMap<Vec<u8>, mpsc::UnboundedSender<Msg>>>,
    on_accept: Arc<std::sync::Mutex<Option<PeerHandler>>>,
}

impl MsgpackZmqProtocol {
    pub async fn connect(ctx: &ZmqContext, addr: &str, identity: &str) -> Result<Self, ProtocolError> {
        let socket = socket_config::create_dealer_and_connect(ctx, addr, Some(identity))?;
        let (sink, stream) = socket.split();
        Self::spawn(ProtocolRole::Client, ctx.clone(), sink, stream)
    }

    pub async fn bind(ctx: &ZmqContext, addr: &str) -> Result<Self, ProtocolError> {
        let socket = socket_config::create_router_and_bind(ctx, addr)?;
        let (sink, stream) = socket.split();
        Self::spawn(ProtocolRole::Server, ctx.clone(), sink, stream)
    }

    fn spawn<Sink, Stream>(
        role: ProtocolRole,
        ctx: ZmqContext,
        mut sink: Sink,
        mut stream: Stream,
    ) -> Result<Self, ProtocolError>
    where
        Sink: futures::Sink<Multipart, Error = tmq::TmqError> + Unpin + Send + 'static,
        Stream: futures::Stream<Item = Result<Multipart, tmq::TmqError>> + Unpin + Send + 'static,
    {
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<ReactorCommand>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Msg>();
        let state = Arc::new(AtomicU8::new(ProtocolState::Connected as u8));
        let state_for_task = state.clone();
        let peers: Arc<DashMap<Vec<u8>, mpsc::UnboundedSender<Msg>>> = Arc::new(DashMap::new());
        let on_accept: Arc<std::sync::Mutex<Option<PeerHandler>>> = Arc::new(std::sync::Mutex::new(None));
        let peers_for_task = peers.clone();
        let on_accept_for_task = on_accept.clone();
        let cmd_tx_for_task = cmd_tx.clone();
        let state_for_peers = state.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    cmd = cmd_rx.recv() => {
                        match cmd {
                            Some(ReactorCommand::Send(parts)) => {
                                if let Err(e) = sink.send(parts).await {
                                    warn!(error = %e, "transport send failed");
                                }
                            }
                            Some(ReactorCommand::Shutdown) | None => {
                                state_for_task.store(ProtocolState::Closed as u8, Ordering::SeqCst);
                                break;
                            }
                        }
                    }

                    incoming = stream.next() => {
                        match incoming {
                            Some(Ok(parts)) => {
                                let frames: Vec<Bytes> = parts.into_iter().map(|m| Bytes::copy_from_slice(&m)).collect();
                                let identity: Vec<Bytes> = TenFrame::identity_prefix(&frames).to_vec();
                                match TenFrame::from_frames(&frames) {
                                    Ok(frame) => handle_inbound(
                                        role,
                                        frame,
                                        identity,
                                        &inbound_tx,
                                        &peers_for_task,
                                        &on_accept_for_task,
                                        &cmd_tx_for_task,
                                        &state_for_peers,
                                    ),
                                    Err(e) => warn!(error = %e, "dropping malformed frame"),
                                }
                            }
                            Some(Err(e)) => {
                                warn!(error = %e, "transport recv failed");
                            }
                            None => {
                                state_for_task.store(ProtocolState::Closed as u8, Ordering::SeqCst);
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(Self {
            role,
            state,
            ctx,
            cmd_tx,
            inbound_rx: Mutex::new(inbound_rx),
            peers,
            on_accept,
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_inbound(
    role: ProtocolRole,
    frame: TenFrame,
    identity: Vec<Bytes>,
    inbound_tx: &mpsc::UnboundedSender<Msg>,
    peers: &Arc<DashMap<Vec<u8>, mpsc::UnboundedSender<Msg>>>,
    on_accept: &Arc<std::sync::Mutex<Option<PeerHandler>>>,
    cmd_tx: &mpsc::UnboundedSender<ReactorCommand>,
    state: &Arc<AtomicU8>,
) {
    match frame.command {
        Command::Msg => match rmp_serde::from_slice::<Msg>(&frame.body) {
            Ok(msg) => {
                if role == ProtocolRole::Server && !identity.is_empty() {
                    dispatch_to_peer(identity, msg, peers, on_accept, cmd_tx, state);
                } else {
                    let _ = inbound_tx.send(msg);
                }
            }
            Err(e) => warn!(error = %e, "dropping undecodable msgpack body"),
        },
        Command::Heartbeat => debug!("heartbeat received"),
        Command::Ready | Command::Disconnect => {
            debug!(command = ?frame.command, "control frame received");
        }
    }
}

/// Demuxes one inbound message from a router socket to the `PeerProtocol`
/// matching its identity prefix, creating (and reporting to `on_accept`) a
/// new one the first time an identity is seen.
fn dispatch_to_peer(
    identity: Vec<Bytes>,
    msg: Msg,
    peers: &Arc<DashMap<Vec<u8>, mpsc::UnboundedSender<Msg>>>,
    on_accept: &Arc<std::sync::Mutex<Option<PeerHandler>>>,
    cmd_tx: &mpsc::UnboundedSender<ReactorCommand>,
    state: &Arc<AtomicU8>,
) {
    let key: Vec<u8> = identity.iter().flat_map(|f| f.to_vec()).collect();
    if let Some(sender) = peers.get(&key) {
        let _ = sender.send(msg);
        return;
    }

    let Some(handler) = on_accept.lock().unwrap().clone() else {
        debug!("inbound peer seen before listen() registered an accept handler, dropping");
        return;
    };

    let (peer_tx, peer_rx) = mpsc::unbounded_channel::<Msg>();
    peers.insert(key, peer_tx.clone());
    let peer = PeerProtocol {
        state: state.clone(),
        identity,
        cmd_tx: cmd_tx.clone(),
        inbound_rx: Mutex::new(peer_rx),
    };
    let _ = peer_tx.send(msg);
    handler(Arc::new(peer));
}

#[async_trait]
impl Protocol for MsgpackZmqProtocol {
    fn role(&self) -> ProtocolRole {
        self.role
    }

    fn state(&self) -> ProtocolState {
        state_from_u8(self.state.load(Ordering::SeqCst))
    }

    async fn send(&self, msg: &Msg) -> Result<(), ProtocolError> {
        if self.state() == ProtocolState::Closed {
            return Err(ProtocolError::Closed);
        }
        let body = rmp_serde::to_vec(msg).map_err(crate::error::FrameError::from)?;
        let frame = TenFrame::msg(Uuid::new_v4(), Bytes::from(body));
        let parts: Multipart = frame.to_frames().into_iter().map(|b| b.to_vec().into()).collect();
        self.cmd_tx
            .send(ReactorCommand::Send(parts))
            .map_err(|_| ProtocolError::Closed)
    }

    async fn recv(&self) -> Result<Option<Msg>, ProtocolError> {
        let mut rx = self.inbound_rx.lock().await;
        Ok(rx.recv().await)
    }

    async fn close(&self) -> Result<(), ProtocolError> {
        self.state.store(ProtocolState::Closing as u8, Ordering::SeqCst);
        let _ = self.cmd_tx.send(ReactorCommand::Shutdown);
        Ok(())
    }

    /// Arms per-peer demultiplexing on this already-bound router socket:
    /// from here on, every newly seen peer identity gets its own
    /// `PeerProtocol` handed to `on_accept` instead of being merged into
    /// this instance's own `recv`. `uri` is accepted for parity with the
    /// trait's signature and logged; the actual bind already happened in
    /// `MsgpackZmqProtocol::bind`.
    async fn listen(&self, uri: &str, on_accept: PeerHandler) -> Result<(), ProtocolError> {
        if self.role != ProtocolRole::Server {
            return Err(ProtocolError::Transport(
                "listen requires a server-role (router-bound) protocol instance".into(),
            ));
        }
        *self.on_accept.lock().unwrap() = Some(on_accept);
        info!(uri, "listening for peers");
        Ok(())
    }

    async fn connect_to(&self, uri: &str) -> Result<Arc<dyn Protocol>, ProtocolError> {
        let identity = Uuid::new_v4().to_string();
        let proto = MsgpackZmqProtocol::connect(&self.ctx, uri, &identity).await?;
        Ok(Arc::new(proto))
    }
}

/// One peer demultiplexed off a shared router socket. Sends prepend this
/// peer's identity frame onto the parent reactor's send channel; receives
/// come from the per-peer queue the parent's `dispatch_to_peer` feeds.
struct PeerProtocol {
    state: Arc<AtomicU8>,
    identity: Vec<Bytes>,
    cmd_tx: mpsc::UnboundedSender<ReactorCommand>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<Msg>>,
}

#[async_trait]
impl Protocol for PeerProtocol {
    fn role(&self) -> ProtocolRole {
        ProtocolRole::Server
    }

    fn state(&self) -> ProtocolState {
        state_from_u8(self.state.load(Ordering::SeqCst))
    }

    async fn send(&self, msg: &Msg) -> Result<(), ProtocolError> {
        if self.state() == ProtocolState::Closed {
            return Err(ProtocolError::Closed);
        }
        let body = rmp_serde::to_vec(msg).map_err(crate::error::FrameError::from)?;
        let frame = TenFrame::msg(Uuid::new_v4(), Bytes::from(body));
        let mut items: Vec<Bytes> = self.identity.clone();
        items.extend(frame.to_frames());
        let parts: Multipart = items.into_iter().map(|b| b.to_vec().into()).collect();
        self.cmd_tx
            .send(ReactorCommand::Send(parts))
            .map_err(|_| ProtocolError::Closed)
    }

    async fn recv(&self) -> Result<Option<Msg>, ProtocolError> {
        let mut rx = self.inbound_rx.lock().await;
        Ok(rx.recv().await)
    }

    async fn close(&self) -> Result<(), ProtocolError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_u8() {
        assert_eq!(state_from_u8(ProtocolState::Connected as u8), ProtocolState::Connected);
        assert_eq!(state_from_u8(ProtocolState::Closed as u8), ProtocolState::Closed);
    }
}
