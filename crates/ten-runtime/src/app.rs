use crate::addon::{global_deinit, global_init, AddonRegistry};
use crate::engine::{Engine, EngineTimers};
use crate::error::AppError;
use crate::graph::GraphDef;
use crate::remote::Remote;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use ten_conversion::SchemaStore;
use ten_message::{Msg, MsgKind};
use ten_protocol::{Connection, PeerHandler, Protocol};
use tokio::sync::Notify;
use tracing::{info, warn};

/// The process-level owner of every running graph. One `App` per process;
/// extensions are registered on its `AddonRegistry` before `run`, graphs are
/// brought up afterward via `start_graph`.
pub struct App {
    pub uri: String,
    registry: Arc<AddonRegistry>,
    engines: DashMap<String, Arc<Engine>>,
    /// Connections accepted on the app's listening endpoint before they've
    /// been migrated to the engine their first message names. A
    /// connection with no engine yet to hand off to sits here.
    orphan_connections: DashMap<String, Arc<Connection>>,
    timers: EngineTimers,
    /// Shared across every engine this app brings up so one `start_graph`
    /// call can register schemas once and have them apply to every
    /// resulting `Engine::route` pipeline. `None` means the app never
    /// opted into schema validation.
    schema_store: Option<Arc<dyn SchemaStore>>,
    running: AtomicBool,
    closed: AtomicBool,
    closed_notify: Arc<Notify>,
}

impl App {
    pub fn create(uri: impl Into<String>) -> Arc<Self> {
        Self::create_with_timers(uri, EngineTimers::default())
    }

    pub fn create_with_timers(uri: impl Into<String>, timers: EngineTimers) -> Arc<Self> {
        Self::create_full(uri, timers, None)
    }

    pub fn create_full(
        uri: impl Into<String>,
        timers: EngineTimers,
        schema_store: Option<Arc<dyn SchemaStore>>,
    ) -> Arc<Self> {
        global_init();
        Arc::new(Self {
            uri: uri.into(),
            registry: Arc::new(AddonRegistry::new()),
            engines: DashMap::new(),
            orphan_connections: DashMap::new(),
            timers,
            schema_store,
            running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            closed_notify: Arc::new(Notify::new()),
        })
    }

    pub fn registry(&self) -> &Arc<AddonRegistry> {
        &self.registry
    }

    pub fn schema_store(&self) -> Option<&Arc<dyn SchemaStore>> {
        self.schema_store.as_ref()
    }

    /// Marks the app as running. Foreground/background is a caller
    /// concern — this runtime has no blocking OS event loop of its own,
    /// everything already runs on tokio tasks, so `run` just flips the flag
    /// the way the original API's `run(background)` toggle does for
    /// callers that poll `is_running`.
    pub fn run(&self) {
        self.running.store(true, Ordering::SeqCst);
        info!(app = %self.uri, "app running");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn start_graph(self: &Arc<Self>, graph: GraphDef) -> Result<Arc<Engine>, AppError> {
        if let Ok(existing) = self.engine(&graph.graph_id) {
            return Ok(existing);
        }
        let engine = Engine::start_graph_full(
            graph,
            &self.registry,
            self.timers,
            self.uri.clone(),
            self.schema_store.clone(),
        )?;
        self.engines.insert(engine.graph_id.clone(), engine.clone());
        Ok(engine)
    }

    pub fn engine(&self, graph_id: &str) -> Result<Arc<Engine>, AppError> {
        self.engines
            .get(graph_id)
            .map(|e| e.clone())
            .ok_or_else(|| AppError::UnknownGraph(graph_id.to_string()))
    }

    pub fn add_orphan_connection(&self, key: impl Into<String>, connection: Arc<Connection>) {
        self.orphan_connections.insert(key.into(), connection);
    }

    pub fn del_orphan_connection(&self, key: &str) -> Option<Arc<Connection>> {
        self.orphan_connections.remove(key).map(|(_, c)| c)
    }

    pub fn orphan_connection_count(&self) -> usize {
        self.orphan_connections.len()
    }

    /// §4.5 step 0 / §1(b): starts accepting peers on `protocol` at `uri`.
    /// Each newly accepted peer gets an orphan `Connection` parked on the
    /// app thread (`AttachTarget::App`) until its first message names the
    /// graph it belongs to; from there `accept_peer` drives the real
    /// migrate/clean handoff described in `ten_protocol::connection` by
    /// handing the peer's protocol to a freshly attached `Remote`.
    pub async fn listen(
        self: &Arc<Self>,
        protocol: Arc<dyn Protocol>,
        uri: impl Into<String>,
    ) -> Result<(), AppError> {
        let uri = uri.into();
        let app = self.clone();
        let on_accept: PeerHandler = Arc::new(move |peer: Arc<dyn Protocol>| {
            let app = app.clone();
            tokio::spawn(async move {
                app.accept_peer(peer).await;
            });
        });
        protocol.listen(&uri, on_accept).await?;
        info!(app = %self.uri, uri, "app listening for peers");
        Ok(())
    }

    /// One accepted peer's journey through the migration state machine:
    /// parked under `AttachTarget::App` until its first message resolves an
    /// engine, then migrated onto that engine via a `Remote`. A peer whose
    /// first message names no known graph is dropped — there is nothing to
    /// migrate it to.
    async fn accept_peer(self: Arc<Self>, peer: Arc<dyn Protocol>) {
        let conn_id = format!("peer-{}", uuid::Uuid::new_v4());
        let orphan = Arc::new(Connection::new(conn_id.clone()));
        self.add_orphan_connection(conn_id.clone(), orphan.clone());

        let first = match peer.recv().await {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                self.del_orphan_connection(&conn_id);
                return;
            }
            Err(e) => {
                warn!(error = %e, "accepted peer's first recv failed");
                self.del_orphan_connection(&conn_id);
                return;
            }
        };

        let Some(graph_id) = first.dests.first().and_then(|d| d.graph_id.clone()) else {
            warn!("accepted peer's first message names no graph, dropping connection");
            self.del_orphan_connection(&conn_id);
            return;
        };

        let engine = match self.engine(&graph_id) {
            Ok(engine) => engine,
            Err(_) => {
                warn!(graph_id, "accepted peer's first message names an unknown graph, dropping connection");
                orphan.migration_state_reset_when_engine_not_found();
                self.del_orphan_connection(&conn_id);
                return;
            }
        };

        orphan.on_first_msg_resolved();
        self.del_orphan_connection(&conn_id);

        let peer_app_uri = first.src.app_uri.clone();
        let remote = Remote::new(peer_app_uri.clone(), &engine, peer);
        engine.attach_remote(peer_app_uri, remote);
        engine.inject(first);
    }

    /// Dispatches a command addressed to the app itself, as opposed to one
    /// routed through an engine's graph. `close_app` is the only such
    /// command today: it tears down every running graph and marks the
    /// whole app closed.
    pub fn handle_app_cmd(self: &Arc<Self>, msg: &Msg) -> bool {
        if msg.kind != MsgKind::Cmd || msg.name != "close_app" {
            return false;
        }
        info!(app = %self.uri, "close_app received");
        self.close();
        true
    }

    /// Blocks until `close` has been called. Mirrors the original
    /// `create -> run -> wait -> close` lifecycle used by host binaries.
    pub async fn wait(&self) {
        self.closed_notify.notified().await;
    }

    /// Cascading close: closes every engine, then marks the app stopped.
    pub fn close(&self) {
        for entry in self.engines.iter() {
            entry.value().close();
        }
        self.orphan_connections.clear();
        self.running.store(false, Ordering::SeqCst);
        self.closed_notify.notify_waiters();
        global_deinit();
        info!(app = %self.uri, "app closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addon::AddonKind;
    use crate::extension::{Extension, ExtensionContext};
    use crate::graph::{GraphConnection, GraphNode};
    use std::sync::Arc as StdArc;
    use ten_message::{Location, Msg};

    struct Noop;
    impl Extension for Noop {
        fn name(&self) -> &str {
            "noop"
        }
        fn on_cmd(&mut self, _ctx: &ExtensionContext, _cmd: StdArc<Msg>) {}
    }

    fn sample_graph() -> GraphDef {
        GraphDef {
            graph_id: "g1".into(),
            nodes: vec![GraphNode {
                extension_name: "a".into(),
                addon_name: "noop_addon".into(),
                app: "localhost".into(),
            }],
            connections: vec![GraphConnection {
                src_extension: "a".into(),
                cmd_name: "noop".into(),
                dest_extension: "a".into(),
                dest_app: "localhost".into(),
                conversion: None,
            }],
        }
    }

    #[tokio::test]
    async fn create_run_start_graph_close_lifecycle() {
        let app = App::create("localhost");
        app.registry().register(AddonKind::Extension, "noop_addon", StdArc::new(|| Box::new(Noop)));
        app.run();
        assert!(app.is_running());

        let engine = app.start_graph(sample_graph()).unwrap();
        assert_eq!(engine.graph_id, "g1");
        assert!(app.engine("g1").is_ok());

        app.close();
        assert!(!app.is_running());
    }

    #[tokio::test]
    async fn unknown_graph_lookup_errors() {
        let app = App::create("localhost");
        assert!(matches!(app.engine("ghost"), Err(AppError::UnknownGraph(_))));
    }

    /// start_graph called twice with the same graph_id is idempotent
    /// rather than erroring — mirrors the "already created for this
    /// graph_id" bring-up shortcut the original takes for polygon graphs.
    #[tokio::test]
    async fn start_graph_is_idempotent_for_known_graph_id() {
        let app = App::create("localhost");
        app.registry().register(AddonKind::Extension, "noop_addon", StdArc::new(|| Box::new(Noop)));

        let first = app.start_graph(sample_graph()).unwrap();
        let second = app.start_graph(sample_graph()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn close_app_cmd_closes_the_app() {
        let app = App::create("localhost");
        app.run();
        let cmd = Msg::new_cmd("close_app", Location::localhost());
        assert!(app.handle_app_cmd(&cmd));
        assert!(!app.is_running());
    }

    #[tokio::test]
    async fn non_close_app_cmd_is_not_handled_here() {
        let app = App::create("localhost");
        let cmd = Msg::new_cmd("ping", Location::localhost());
        assert!(!app.handle_app_cmd(&cmd));
    }

    #[tokio::test]
    async fn orphan_connections_track_pending_migrations() {
        let app = App::create("localhost");
        app.add_orphan_connection("peer1", Arc::new(Connection::new("peer1")));
        assert_eq!(app.orphan_connection_count(), 1);
        assert!(app.del_orphan_connection("peer1").is_some());
        assert_eq!(app.orphan_connection_count(), 0);
    }

    use async_trait::async_trait;
    use ten_protocol::{ProtocolError, ProtocolRole, ProtocolState};
    use tokio::sync::mpsc;
    use tokio::sync::Mutex as AsyncMutex;

    /// A `listen()` double that hands `on_accept` a single pre-loaded peer
    /// the moment it's called, rather than actually binding a socket.
    struct FakeListenProtocol {
        peer_inbound: AsyncMutex<Option<mpsc::UnboundedReceiver<Msg>>>,
    }

    #[async_trait]
    impl Protocol for FakeListenProtocol {
        fn role(&self) -> ProtocolRole {
            ProtocolRole::Server
        }
        fn state(&self) -> ProtocolState {
            ProtocolState::Connected
        }
        async fn send(&self, _msg: &Msg) -> Result<(), ProtocolError> {
            Ok(())
        }
        async fn recv(&self) -> Result<Option<Msg>, ProtocolError> {
            Ok(None)
        }
        async fn close(&self) -> Result<(), ProtocolError> {
            Ok(())
        }
        async fn listen(&self, _uri: &str, on_accept: PeerHandler) -> Result<(), ProtocolError> {
            let rx = self.peer_inbound.lock().await.take().unwrap();
            let peer: Arc<dyn Protocol> = Arc::new(FakePeerProtocol { inbound: AsyncMutex::new(rx) });
            on_accept(peer);
            Ok(())
        }
    }

    struct FakePeerProtocol {
        inbound: AsyncMutex<mpsc::UnboundedReceiver<Msg>>,
    }

    #[async_trait]
    impl Protocol for FakePeerProtocol {
        fn role(&self) -> ProtocolRole {
            ProtocolRole::Server
        }
        fn state(&self) -> ProtocolState {
            ProtocolState::Connected
        }
        async fn send(&self, _msg: &Msg) -> Result<(), ProtocolError> {
            Ok(())
        }
        async fn recv(&self) -> Result<Option<Msg>, ProtocolError> {
            Ok(self.inbound.lock().await.recv().await)
        }
        async fn close(&self) -> Result<(), ProtocolError> {
            Ok(())
        }
    }

    /// A peer accepted via `listen()` whose first message names a live graph
    /// should end up attached as a `Remote` on that graph's engine.
    #[tokio::test]
    async fn accepted_peer_migrates_to_the_engine_its_first_message_names() {
        let app = App::create("localhost");
        app.registry().register(AddonKind::Extension, "noop_addon", StdArc::new(|| Box::new(Noop)));
        let engine = app.start_graph(sample_graph()).unwrap();

        let (tx, rx) = mpsc::unbounded_channel::<Msg>();
        let mut first = Msg::new_cmd("noop", Location::new("peer-app"));
        first.gen_cmd_id_if_empty();
        first.clear_and_set_dest(Location::localhost().with_graph("g1").with_extension("a"));
        tx.send(first).unwrap();
        drop(tx);

        let protocol: Arc<dyn Protocol> = Arc::new(FakeListenProtocol {
            peer_inbound: AsyncMutex::new(Some(rx)),
        });
        app.listen(protocol, "msgpack://peer-app/").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(engine.remote("peer-app").is_some());
        assert_eq!(app.orphan_connection_count(), 0);
    }

    /// A peer whose first message names no graph this app knows about is
    /// dropped, not parked forever as an orphan connection.
    #[tokio::test]
    async fn accepted_peer_with_unknown_graph_is_dropped() {
        let app = App::create("localhost");

        let (tx, rx) = mpsc::unbounded_channel::<Msg>();
        let mut first = Msg::new_cmd("noop", Location::new("peer-app"));
        first.gen_cmd_id_if_empty();
        first.clear_and_set_dest(Location::localhost().with_graph("ghost").with_extension("a"));
        tx.send(first).unwrap();
        drop(tx);

        let protocol: Arc<dyn Protocol> = Arc::new(FakeListenProtocol {
            peer_inbound: AsyncMutex::new(Some(rx)),
        });
        app.listen(protocol, "msgpack://peer-app/").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(app.orphan_connection_count(), 0);
    }
}
