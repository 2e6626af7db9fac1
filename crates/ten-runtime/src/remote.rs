use crate::engine::Engine;
use std::sync::{Arc, Weak};
use ten_message::Msg;
use ten_protocol::{Connection, MsgSink, Protocol};
use tracing::{info, warn};

/// The engine side of a connection to another app. Holds a weak reference
/// back to its owning engine (not a strong one) so an engine can be
/// dropped and torn down even while a remote's background receive task is
/// still unwinding — breaks what would otherwise be an engine-remote
/// reference cycle.
pub struct Remote {
    pub uri: String,
    engine: Weak<Engine>,
    protocol: Arc<dyn Protocol>,
    connection: Arc<Connection>,
}

impl MsgSink for Remote {
    fn push(&self, msg: Arc<Msg>) {
        if let Some(engine) = self.engine.upgrade() {
            engine.inject((*msg).clone());
        } else {
            warn!(uri = %self.uri, "dropping message for a remote whose engine is gone");
        }
    }
}

impl Remote {
    pub fn new(uri: impl Into<String>, engine: &Arc<Engine>, protocol: Arc<dyn Protocol>) -> Arc<Self> {
        let uri = uri.into();
        let connection = Arc::new(Connection::new(uri.clone()));
        let remote = Arc::new(Self {
            uri,
            engine: Arc::downgrade(engine),
            protocol,
            connection,
        });
        remote.clone().spawn_recv_loop();
        let for_attach = remote.clone();
        tokio::spawn(async move {
            for_attach.attach().await;
        });
        remote
    }

    fn spawn_recv_loop(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                match self.protocol.recv().await {
                    Ok(Some(msg)) => self.deliver(Arc::new(msg)),
                    Ok(None) => {
                        info!(uri = %self.uri, "remote transport closed");
                        break;
                    }
                    Err(e) => {
                        warn!(uri = %self.uri, error = %e, "remote recv error");
                        break;
                    }
                }
            }
        });
    }

    fn deliver(&self, msg: Arc<Msg>) {
        self.connection.deliver(msg);
    }

    pub async fn send(&self, msg: &Msg) -> Result<(), ten_protocol::ProtocolError> {
        self.protocol.send(msg).await
    }

    /// Drives this remote's connection through the real §4.6
    /// migrate/clean handshake: `Protocol::migrate` hands the protocol its
    /// eventual engine sink (this `Remote` itself), then `Protocol::clean`
    /// finalizes the handoff, leaving `connection` at `MigrationState::Done`
    /// and attached to the engine.
    pub async fn attach(self: &Arc<Self>) {
        let sink: Arc<dyn MsgSink> = self.clone();
        if let Err(e) = self.protocol.migrate(&self.connection, sink).await {
            warn!(uri = %self.uri, error = %e, "protocol migrate failed");
            return;
        }
        if let Err(e) = self.protocol.clean(&self.connection).await {
            warn!(uri = %self.uri, error = %e, "protocol clean failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ten_protocol::{ProtocolRole, ProtocolState};
    use tokio::sync::Mutex as AsyncMutex;

    struct FakeProtocol {
        inbound: AsyncMutex<tokio::sync::mpsc::UnboundedReceiver<Msg>>,
    }

    #[async_trait]
    impl Protocol for FakeProtocol {
        fn role(&self) -> ProtocolRole {
            ProtocolRole::Client
        }
        fn state(&self) -> ProtocolState {
            ProtocolState::Connected
        }
        async fn send(&self, _msg: &Msg) -> Result<(), ten_protocol::ProtocolError> {
            Ok(())
        }
        async fn recv(&self) -> Result<Option<Msg>, ten_protocol::ProtocolError> {
            Ok(self.inbound.lock().await.recv().await)
        }
        async fn close(&self) -> Result<(), ten_protocol::ProtocolError> {
            Ok(())
        }
    }

    /// `push` on a remote whose engine has already been dropped must not
    /// panic: it's the ordinary end-of-life race between an engine closing
    /// and a remote's background receive task still unwinding.
    #[tokio::test]
    async fn push_after_engine_dropped_is_a_no_op() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Msg>();
        let protocol: Arc<dyn Protocol> = Arc::new(FakeProtocol {
            inbound: AsyncMutex::new(rx),
        });

        let engine: Weak<Engine> = Weak::new();
        let remote = Arc::new(Remote {
            uri: "msgpack://localhost:0".into(),
            engine,
            protocol,
            connection: Arc::new(Connection::new("r1")),
        });

        remote.push(Arc::new(ten_message::Msg::new_cmd("ping", ten_message::Location::localhost())));
        drop(tx);
    }
}
