use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use ten_message::Msg;
use tracing::{info, warn};

/// Where a connection's lifetime is currently anchored. A freshly accepted
/// connection is owned by the app's runloop (it might still turn out to
/// belong to no engine at all, e.g. a malformed first message); once an
/// engine claims it, ownership migrates to that engine's runloop so all
/// further message handling happens on the engine's own thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachTarget {
    App,
    Engine,
    Remote,
}

/// Tracks where a `Connection` sits in the cross-thread migration handoff
/// transcribed from the original runtime's connection-migration protocol:
/// a new connection starts on the app thread (`Init`), decides after its
/// first message whether it needs to migrate to an engine thread
/// (`FirstMsg`), and once the handoff completes settles at `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MigrationState {
    Init = 0,
    FirstMsg = 1,
    Done = 2,
}

impl MigrationState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => MigrationState::Init,
            1 => MigrationState::FirstMsg,
            _ => MigrationState::Done,
        }
    }
}

/// Destination for inbound messages once they're past framing/migration
/// bookkeeping. Implemented by `App`/`Engine`/`Remote` in the runtime crate;
/// kept as a trait here so `Connection` never has to depend on those
/// concrete types (which would invert the intended dependency direction).
pub trait MsgSink: Send + Sync {
    fn push(&self, msg: Arc<Msg>);
}

/// A connection's side of the six-step migration handoff:
///
/// APP thread                 external protocol thread      Engine thread
/// -----------                -----------------------      -------------
/// connection::migrate()  --> protocol::migrate()
///                             implementation::migrate()
///                                                      --> protocol::on_migrated()
///                                                          connection::on_protocol_migrated()
/// connection::clean()    --> protocol::clean()
///                             implementation::clean()
///                                                      --> protocol::on_cleaned()
///                                                          connection::on_protocol_cleaned()
///                                                          migration_state = Done
///                                                          attach_to = Engine
///                                                          implementation::on_cleaned()
///
/// Each step below corresponds to one arrow in that diagram. The state is
/// stored as an `AtomicU8` so `get_migration_state` can be read from any
/// thread without a lock while the actual transitions are only ever driven
/// from the connection's own runloop via `post_task_tail`.
pub struct Connection {
    pub id: String,
    migration_state: AtomicU8,
    attach_to: std::sync::Mutex<AttachTarget>,
    sink: std::sync::Mutex<Option<Arc<dyn MsgSink>>>,
}

impl Connection {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            migration_state: AtomicU8::new(MigrationState::Init as u8),
            attach_to: std::sync::Mutex::new(AttachTarget::App),
            sink: std::sync::Mutex::new(None),
        }
    }

    pub fn get_migration_state(&self) -> MigrationState {
        MigrationState::from_u8(self.migration_state.load(Ordering::SeqCst))
    }

    pub fn set_migration_state(&self, state: MigrationState) {
        self.migration_state.store(state as u8, Ordering::SeqCst);
    }

    pub fn attach_to(&self) -> AttachTarget {
        *self.attach_to.lock().unwrap()
    }

    /// A connection needs to migrate once it has received its first message
    /// and that message identified an engine this connection should be
    /// dedicated to, but hasn't yet completed the handoff.
    pub fn needs_to_migrate(&self) -> bool {
        self.get_migration_state() == MigrationState::FirstMsg
    }

    /// Step 1, app thread: the first message on this connection resolved to
    /// a specific engine. Marks the connection as needing migration; the
    /// caller (the app's dispatch loop) is expected to hand the connection's
    /// protocol off to that engine next.
    pub fn on_first_msg_resolved(&self) {
        self.set_migration_state(MigrationState::FirstMsg);
    }

    /// Step 1b: `connection::migrate()` is invoked from the app thread to
    /// kick off the external-protocol-thread migration. Purely a bookkeeping
    /// marker here — actual socket/FD handoff is transport-specific and
    /// lives on the concrete `Protocol` implementation.
    pub fn migrate(&self) {
        info!(connection = %self.id, "connection migrate requested");
    }

    /// Step 2, engine thread: `protocol::on_migrated()` has run and the
    /// protocol implementation is now owned by the engine thread.
    /// `connection::on_protocol_migrated()` records that and attaches the
    /// connection to the engine for message delivery going forward.
    pub fn on_protocol_migrated(&self, sink: Arc<dyn MsgSink>) {
        *self.attach_to.lock().unwrap() = AttachTarget::Engine;
        *self.sink.lock().unwrap() = Some(sink);
        info!(connection = %self.id, "connection migrated to engine");
    }

    /// Step 3, app thread: `connection::clean()` releases the app-thread
    /// bookkeeping now that the protocol implementation has moved.
    pub fn clean(&self) {
        info!(connection = %self.id, "connection clean requested");
    }

    /// Step 4, engine thread: `protocol::on_cleaned()` has run;
    /// `connection::on_protocol_cleaned()` finalizes the handoff —
    /// migration_state becomes `Done` and the connection is now fully
    /// attached to the engine.
    pub fn on_protocol_cleaned(&self) {
        self.set_migration_state(MigrationState::Done);
        *self.attach_to.lock().unwrap() = AttachTarget::Engine;
        info!(connection = %self.id, "connection migration complete");
    }

    /// If the resolved engine disappears mid-migration (closed concurrently)
    /// the migration state is reset back to `Init` so the connection can be
    /// cleanly torn down by the app thread instead of being left half
    /// migrated.
    pub fn migration_state_reset_when_engine_not_found(&self) {
        warn!(connection = %self.id, "engine not found mid-migration, resetting");
        self.set_migration_state(MigrationState::Init);
        *self.attach_to.lock().unwrap() = AttachTarget::App;
    }

    pub fn deliver(&self, msg: Arc<Msg>) {
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            sink.push(msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ten_message::{Location, MsgKind};
    use std::sync::Mutex;

    struct Captured(Mutex<Vec<Arc<Msg>>>);
    impl MsgSink for Captured {
        fn push(&self, msg: Arc<Msg>) {
            self.0.lock().unwrap().push(msg);
        }
    }

    #[test]
    fn full_migration_handoff_reaches_done_attached_to_engine() {
        let conn = Connection::new("c1");
        assert_eq!(conn.get_migration_state(), MigrationState::Init);
        assert!(!conn.needs_to_migrate());

        conn.on_first_msg_resolved();
        assert!(conn.needs_to_migrate());

        conn.migrate();
        let sink: Arc<dyn MsgSink> = Arc::new(Captured(Mutex::new(Vec::new())));
        conn.on_protocol_migrated(sink);
        assert_eq!(conn.attach_to(), AttachTarget::Engine);

        conn.clean();
        conn.on_protocol_cleaned();

        assert_eq!(conn.get_migration_state(), MigrationState::Done);
        assert_eq!(conn.attach_to(), AttachTarget::Engine);
    }

    #[test]
    fn reset_mid_migration_returns_to_init_and_app() {
        let conn = Connection::new("c1");
        conn.on_first_msg_resolved();
        conn.migration_state_reset_when_engine_not_found();
        assert_eq!(conn.get_migration_state(), MigrationState::Init);
        assert_eq!(conn.attach_to(), AttachTarget::App);
    }

    #[test]
    fn deliver_forwards_to_attached_sink() {
        let conn = Connection::new("c1");
        let captured = Arc::new(Captured(Mutex::new(Vec::new())));
        conn.on_protocol_migrated(captured.clone());

        let msg = Arc::new(Msg::new_cmd("ping", Location::localhost()));
        conn.deliver(msg.clone());

        let got = captured.0.lock().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].kind, MsgKind::Cmd);
    }
}
