use crate::addon::AddonRegistry;
use crate::error::{EngineError, GraphError};
use crate::extension::ExtensionThread;
use crate::graph::GraphDef;
use crate::remote::Remote;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use ten_conversion::SchemaStore;
use ten_message::{Location, Msg, MsgKind, Path, PathDirection, PathTable, StatusCode};
use tracing::{debug, info, warn};

/// Housekeeping cadence an engine runs with. `None` disables the
/// corresponding behavior (no sweep task, paths never expire on their
/// own) — the values a bare `Engine::start_graph` call gets; `ten-host`
/// sources real values from `ten_conf::TimersConfig` and passes them
/// through `start_graph_with_timers`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineTimers {
    pub path_sweep_interval: Option<Duration>,
    pub default_path_timeout: Option<Duration>,
}

/// One running instance of a graph: the set of extension threads it
/// started, the path table correlating cmds/cmd_results flowing between
/// them, and the routing rules pulled from the graph definition's fixed
/// connections.
pub struct Engine {
    pub graph_id: String,
    own_uri: String,
    graph: GraphDef,
    extensions: DashMap<String, Arc<ExtensionThread>>,
    path_table: PathTable,
    /// Remotes this engine actively owns a strong reference to, keyed by
    /// peer app uri.
    remotes: DashMap<String, Arc<Remote>>,
    /// Remotes referenced only weakly while a duplicate-connection race is
    /// being resolved: the first protocol to finish migration wins
    /// and is promoted into `remotes`, the other is dropped.
    weak_remotes: DashMap<String, Weak<Remote>>,
    emit_tx: mpsc::UnboundedSender<Arc<Msg>>,
    closed: AtomicBool,
    /// §4.4: validates/adjusts inbound message properties against the
    /// declared per-extension schemas before routing. `None` means the
    /// engine was brought up without one (e.g. in a unit test), in which
    /// case every message is treated as unschema'd and passes through.
    schema_store: Option<Arc<dyn SchemaStore>>,
}

impl Engine {
    pub fn start_graph(graph: GraphDef, registry: &AddonRegistry) -> Result<Arc<Self>, EngineError> {
        Self::start_graph_with_timers(graph, registry, EngineTimers::default(), "localhost")
    }

    /// Validates the graph, spawns one `ExtensionThread` per node (created
    /// through the registry's addon factories), and returns the engine
    /// ready to have `run` called on it. All extensions share a single
    /// emit channel so the engine's own routing task sees every message any
    /// extension produces, in emission order.
    pub fn start_graph_with_timers(
        graph: GraphDef,
        registry: &AddonRegistry,
        timers: EngineTimers,
        own_uri: impl Into<String>,
    ) -> Result<Arc<Self>, EngineError> {
        Self::start_graph_full(graph, registry, timers, own_uri, None)
    }

    /// Full constructor taking an optional schema store; the other
    /// `start_graph*` entry points all funnel through this one.
    pub fn start_graph_full(
        graph: GraphDef,
        registry: &AddonRegistry,
        timers: EngineTimers,
        own_uri: impl Into<String>,
        schema_store: Option<Arc<dyn SchemaStore>>,
    ) -> Result<Arc<Self>, EngineError> {
        graph.validate()?;

        let (emit_tx, emit_rx) = mpsc::unbounded_channel::<Arc<Msg>>();
        let extensions = DashMap::new();
        let own_uri = own_uri.into();

        // §4.8 steps 4-7 call for opening a `Remote` to every non-local app
        // this graph names, sending each a child `start_graph` for
        // `graph.subset_for_app(app_uri)`, and gating the lines below on all
        // of them answering Ok before any local extension is spawned. Doing
        // that for real needs this constructor to become async (to await the
        // child results) and a way for an engine to dial an app URI it has
        // no existing connection to, neither of which this runtime has today
        // — `Remote`s are only ever created from an already-accepted
        // connection (`App::accept_peer`). Tracked as a scoped-out gap
        // rather than built half-way; see DESIGN.md. What *is* true already:
        // `route_cmd`/`route_cmd_result` refuse to forward onto an app with
        // no remote attached, so a graph that needs bring-up confirmation it
        // never got fails loudly per-cmd instead of silently misrouting.
        for app_uri in graph.remote_app_uris(&own_uri) {
            warn!(
                graph_id = %graph.graph_id,
                app = app_uri,
                "graph names a remote app node; its extensions are not started or confirmed by this call, only reachable once a Remote for it is attached"
            );
        }

        for node in &graph.nodes {
            if !node.is_local(&own_uri) {
                continue;
            }
            let extension = registry
                .create_extension(&node.addon_name)
                .ok_or_else(|| GraphError::UnknownAddon(node.addon_name.clone()))?;
            let thread = ExtensionThread::spawn(extension, emit_tx.clone());
            extensions.insert(node.extension_name.clone(), Arc::new(thread));
        }

        let mut path_table = PathTable::new();
        if let Some(ttl) = timers.default_path_timeout {
            path_table = path_table.with_default_timeout(ttl);
        }

        let engine = Arc::new(Self {
            graph_id: graph.graph_id.clone(),
            own_uri,
            graph,
            extensions,
            path_table,
            remotes: DashMap::new(),
            weak_remotes: DashMap::new(),
            emit_tx,
            closed: AtomicBool::new(false),
            schema_store,
        });

        engine.clone().spawn_router(emit_rx);
        if let Some(interval) = timers.path_sweep_interval {
            engine.clone().spawn_path_sweep(interval);
        }
        info!(graph_id = %engine.graph_id, "graph started");
        Ok(engine)
    }

    /// Registers a fully migrated remote under `app_uri`. If a weakly-held
    /// remote was already pending for the same uri (the duplicate-protocol
    /// race from §4.7), it is dropped in favor of this one — first to
    /// finish migration wins.
    pub fn attach_remote(&self, app_uri: impl Into<String>, remote: Arc<Remote>) {
        let app_uri = app_uri.into();
        self.weak_remotes.remove(&app_uri);
        self.remotes.insert(app_uri, remote);
    }

    /// Parks a remote whose protocol hasn't finished migrating yet. Used
    /// while a second inbound connection for an app we already have a
    /// pending remote for is being resolved; whichever finishes migration
    /// first calls `attach_remote` and wins, the other's weak entry is
    /// simply overwritten and its `Remote` drops once nothing else holds it.
    pub fn park_weak_remote(&self, app_uri: impl Into<String>, remote: &Arc<Remote>) {
        self.weak_remotes.insert(app_uri.into(), Arc::downgrade(remote));
    }

    pub fn remote(&self, app_uri: &str) -> Option<Arc<Remote>> {
        self.remotes.get(app_uri).map(|e| e.clone())
    }

    fn spawn_router(self: Arc<Self>, mut emit_rx: mpsc::UnboundedReceiver<Arc<Msg>>) {
        tokio::spawn(async move {
            while let Some(msg) = emit_rx.recv().await {
                self.route(msg);
            }
        });
    }

    /// Periodically sweeps the path table for expired entries and re-injects
    /// the synthesized timeout results, so a cmd whose destination never
    /// answers still unblocks whoever's waiting instead of hanging forever.
    fn spawn_path_sweep(self: Arc<Self>, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if self.is_closed() {
                    break;
                }
                for timeout_result in self.path_table.expire_paths(std::time::Instant::now()) {
                    self.route_cmd_result(timeout_result);
                }
            }
        });
    }

    /// Dispatches a cmd issued by `src_extension` to every graph connection
    /// whose `cmd_name` matches, applying that edge's forward conversion and
    /// registering an `Out` path so the eventual `cmd_result` finds its way
    /// back (and through the edge's result conversion, if any). Connections
    /// whose destination lives on another app are handed to that app's
    /// `Remote` instead of a local extension thread.
    fn route_cmd(&self, src_extension: &str, mut msg: Msg) {
        let connections: Vec<_> = self.graph.connections_from(src_extension).cloned().collect();
        if connections.is_empty() {
            debug!(src = src_extension, cmd = %msg.name, "no connection for cmd, dropping");
            return;
        }

        msg.gen_cmd_id_if_empty();
        let original_src = msg.src.clone();

        for conn in connections {
            if conn.cmd_name != msg.name {
                continue;
            }

            let rewritten = match &conn.conversion {
                Some(pairing) => pairing.convert_msg(&msg),
                None => msg.clone(),
            };
            let mut outgoing = rewritten;
            outgoing.set_src(Location::localhost().with_graph(&self.graph_id).with_extension(src_extension));
            outgoing.clear_and_set_dest(
                Location::localhost().with_graph(&self.graph_id).with_extension(&conn.dest_extension),
            );

            let cmd_id = outgoing.get_cmd_id().unwrap_or_default().to_string();
            let mut path = Path::new(
                cmd_id,
                original_src.clone(),
                Location::localhost().with_graph(&self.graph_id).with_extension(&conn.dest_extension),
            );
            if let Some(conv) = conn.conversion.as_ref().and_then(|p| p.result_conversion_ref()) {
                path = path.with_result_conversion(conv);
            }
            self.path_table.add_out(path);

            let is_remote = conn.dest_app != ten_message::LOCALHOST && conn.dest_app != self.own_uri;
            if is_remote {
                let Some(remote) = self.remote(&conn.dest_app) else {
                    warn!(app = conn.dest_app, "no remote open for connection target's app");
                    continue;
                };
                let outgoing = outgoing.clone();
                tokio::spawn(async move {
                    if let Err(e) = remote.send(&outgoing).await {
                        warn!(error = %e, "failed to forward cmd to remote");
                    }
                });
                continue;
            }

            let Some(dest_thread) = self.extensions.get(&conn.dest_extension) else {
                warn!(dest = conn.dest_extension, "connection target has no running extension");
                continue;
            };
            dest_thread.dispatch(Arc::new(outgoing));
        }
    }

    /// Resolves an arriving cmd_result against the path table and forwards
    /// the (possibly rewritten) result back to whoever owns the original
    /// source location, if that location names a running extension on this
    /// engine.
    fn route_cmd_result(&self, msg: Msg) {
        match self.path_table.resolve_result(PathDirection::Out, &msg) {
            Ok(resolved) => {
                let original_src = resolved.path.original_src.clone();
                let is_remote = original_src.app_uri != ten_message::LOCALHOST && original_src.app_uri != self.own_uri;
                if is_remote {
                    let Some(remote) = self.remote(&original_src.app_uri) else {
                        warn!(app = original_src.app_uri, "no remote open to forward cmd_result to its originating app");
                        return;
                    };
                    let rewritten = resolved.rewritten;
                    tokio::spawn(async move {
                        if let Err(e) = remote.send(&rewritten).await {
                            warn!(error = %e, "failed to forward cmd_result to remote");
                        }
                    });
                    return;
                }

                if let Some(name) = &original_src.extension_name {
                    if let Some(thread) = self.extensions.get(name) {
                        thread.dispatch(Arc::new(resolved.rewritten));
                        return;
                    }
                }
                debug!(cmd_id = %resolved.path.cmd_id, "cmd_result has no extension to deliver to");
            }
            Err(e) => warn!(error = %e, "cmd_result did not match any path"),
        }
    }

    /// Dispatches a data/audio_frame/video_frame message along every graph
    /// connection whose name matches, applying that edge's conversion the
    /// same way `route_cmd` does but with no path-table bookkeeping — these
    /// kinds never carry a reply, so there is nothing to correlate.
    fn route_non_cmd(&self, src_extension: &str, msg: Msg) {
        let connections: Vec<_> = self.graph.connections_from(src_extension).cloned().collect();
        if connections.is_empty() {
            debug!(src = src_extension, name = %msg.name, "no connection for message, dropping");
            return;
        }

        for conn in connections {
            if conn.cmd_name != msg.name {
                continue;
            }

            let mut outgoing = match &conn.conversion {
                Some(pairing) => pairing.convert_msg(&msg),
                None => msg.clone(),
            };
            outgoing.set_src(Location::localhost().with_graph(&self.graph_id).with_extension(src_extension));
            outgoing.clear_and_set_dest(
                Location::localhost().with_graph(&self.graph_id).with_extension(&conn.dest_extension),
            );

            let is_remote = conn.dest_app != ten_message::LOCALHOST && conn.dest_app != self.own_uri;
            if is_remote {
                let Some(remote) = self.remote(&conn.dest_app) else {
                    warn!(app = conn.dest_app, "no remote open for connection target's app");
                    continue;
                };
                tokio::spawn(async move {
                    if let Err(e) = remote.send(&outgoing).await {
                        warn!(error = %e, "failed to forward message to remote");
                    }
                });
                continue;
            }

            let Some(dest_thread) = self.extensions.get(&conn.dest_extension) else {
                warn!(dest = conn.dest_extension, "connection target has no running extension");
                continue;
            };
            dest_thread.dispatch(Arc::new(outgoing));
        }
    }

    fn route(&self, msg: Arc<Msg>) {
        for thread in self.extensions.iter() {
            if let Some(failure) = thread.take_failure() {
                warn!(extension = thread.name(), ?failure, "extension failed, closing graph");
                // §9 (expanded): a caller waiting on a result from this
                // extension must get the Error it was promised rather than
                // hang forever, so every path still pointing at it is
                // resolved before the graph is torn down.
                for error_result in self.path_table.fail_extension(thread.name()) {
                    self.route_cmd_result(error_result);
                }
                self.close();
                return;
            }
        }

        if let Err(detail) = self.validate_against_schema(&msg) {
            // No path-table entry exists yet for a cmd that fails validation
            // before `route_cmd` ever runs, so the Error result can't be
            // resolved through `route_cmd_result` — it's handed straight
            // back to the originating extension's thread instead.
            if msg.kind == MsgKind::Cmd {
                if let Some(name) = &msg.src.extension_name {
                    if let Some(thread) = self.extensions.get(name) {
                        let mut result = Msg::new_cmd_result(msg.name.clone(), msg.src.clone(), StatusCode::Error);
                        result.cmd_id = msg.cmd_id.clone();
                        result.set_property(&"detail".into(), detail.clone().into());
                        thread.dispatch(Arc::new(result));
                    }
                }
            }
            warn!(name = %msg.name, %detail, "schema validation failed, dropping message");
            return;
        }

        let src_name = msg.src.extension_name.clone().unwrap_or_default();
        match msg.kind {
            MsgKind::Cmd => self.route_cmd(&src_name, (*msg).clone()),
            MsgKind::CmdResult => self.route_cmd_result((*msg).clone()),
            MsgKind::Data | MsgKind::AudioFrame | MsgKind::VideoFrame => {
                self.route_non_cmd(&src_name, (*msg).clone())
            }
        }
    }

    /// §4.4: a message with no registered schema passes through untouched
    /// (not every message name need declare one). `cmd_result`s validate
    /// against the schema of their *originating* cmd name, per the spec's
    /// "result schema indexed by original cmd name" rule.
    fn validate_against_schema(&self, msg: &Msg) -> Result<(), String> {
        let Some(store) = self.schema_store.as_ref() else {
            return Ok(());
        };
        let schema_name: &str = match msg.kind {
            MsgKind::CmdResult => msg.original_cmd_name.as_deref().unwrap_or(&msg.name),
            _ => &msg.name,
        };
        if !store.has_schema(schema_name) {
            return Ok(());
        }
        store
            .validate_properties(schema_name, &msg.properties)
            .map_err(|e| e.to_string())
    }

    /// Entry point for a message originating outside the graph (e.g. from a
    /// `Remote`). Injects it as though the named extension had emitted it.
    pub fn inject(&self, msg: Msg) {
        let _ = self.emit_tx.send(Arc::new(msg));
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Cascading close: marks the engine closed so no further routing
    /// happens. Extension threads are left to drain/drop naturally when
    /// their `Arc` refcount reaches zero.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        info!(graph_id = %self.graph_id, "engine closed");
    }

    pub fn pending_out_paths(&self) -> usize {
        self.path_table.out_len()
    }
}
