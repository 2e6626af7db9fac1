use crate::connection::{Connection, MsgSink};
use crate::error::ProtocolError;
use async_trait::async_trait;
use std::sync::Arc;
use ten_message::Msg;

/// Whether a `Protocol` instance is the connecting or the listening side of
/// a transport. Roles use the same wire format but different socket setup
/// (dealer-connect vs. router-bind).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolRole {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    Connecting,
    Connected,
    Closing,
    Closed,
}

/// Called once per newly accepted (`listen`) or newly opened (`connect_to`)
/// peer, handing over that peer's own `Protocol` handle.
pub type PeerHandler = Arc<dyn Fn(Arc<dyn Protocol>) + Send + Sync>;

/// Abstraction over a wire transport. `ten-runtime` talks to connections
/// only through this trait; the concrete `msgpack://` implementation lives
/// in `transport.rs` and is the only one this crate ships, but a graph is
/// free to register others under different URI schemes.
#[async_trait]
pub trait Protocol: Send + Sync {
    fn role(&self) -> ProtocolRole;
    fn state(&self) -> ProtocolState;

    async fn send(&self, msg: &Msg) -> Result<(), ProtocolError>;
    async fn recv(&self) -> Result<Option<Msg>, ProtocolError>;

    async fn close(&self) -> Result<(), ProtocolError>;

    /// §4.5 step 0: start accepting peers at `uri`, invoking `on_accept`
    /// once per newly seen peer with that peer's own `Protocol` handle.
    /// Only a server-role implementation backed by a real listening
    /// transport can do this; the default reports the operation
    /// unsupported so a client-only implementation or test double doesn't
    /// have to stub it out.
    async fn listen(&self, uri: &str, on_accept: PeerHandler) -> Result<(), ProtocolError> {
        let _ = (uri, on_accept);
        Err(ProtocolError::Transport(
            "this protocol implementation does not support listen".into(),
        ))
    }

    /// §4.5 step 0: open an outbound connection to `uri`. Default:
    /// unsupported, same reasoning as `listen`.
    async fn connect_to(&self, uri: &str) -> Result<Arc<dyn Protocol>, ProtocolError> {
        let _ = uri;
        Err(ProtocolError::Transport(
            "this protocol implementation does not support connect_to".into(),
        ))
    }

    /// §4.6 step 1b/2: `connection::migrate()` on the app thread hands this
    /// protocol instance off to the engine thread; once whatever
    /// implementation-specific handoff work that requires is done,
    /// `connection::on_protocol_migrated` attaches `conn` to its new sink.
    /// Every implementation in this crate owns no transport-level thread
    /// affinity to hand off, so the default just performs that attach
    /// directly.
    async fn migrate(&self, conn: &Connection, sink: Arc<dyn MsgSink>) -> Result<(), ProtocolError> {
        conn.on_protocol_migrated(sink);
        Ok(())
    }

    /// §4.6 step 3/4: `connection::clean()` releases the app-thread
    /// bookkeeping; `connection::on_protocol_cleaned` then finalizes the
    /// handoff. Default mirrors `migrate`'s default — nothing
    /// transport-specific to release.
    async fn clean(&self, conn: &Connection) -> Result<(), ProtocolError> {
        conn.on_protocol_cleaned();
        Ok(())
    }
}
