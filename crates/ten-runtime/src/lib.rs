pub mod addon;
pub mod app;
pub mod engine;
pub mod error;
pub mod extension;
pub mod graph;
pub mod remote;

pub use addon::{global_deinit, global_init, AddonFactory, AddonKind, AddonRegistry};
pub use app::App;
pub use engine::{Engine, EngineTimers};
pub use error::{AppError, EngineError, GraphError, RuntimeError};
pub use extension::{Extension, ExtensionContext, ExtensionFailure, ExtensionThread};
pub use graph::{
    graph_def_from_start_graph_cmd, resolve_graph_id, GraphConnection, GraphDef, GraphNode,
    StartGraphCmdJson, StartGraphEnvelope,
};
pub use remote::Remote;
