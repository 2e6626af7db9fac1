use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("graph references unknown addon {0}")]
    UnknownAddon(String),
    #[error("extension '{0}' is associated with different addon")]
    AddonMismatch(String),
    #[error("connection references unknown extension {0}")]
    UnknownExtension(String),
    #[error("graph has no extension nodes")]
    Empty,
    #[error("graph_id '{0}' is not a valid UUID4 string")]
    InvalidGraphId(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("engine is already closed")]
    Closed,
    #[error("path resolution failed: {0}")]
    Path(#[from] ten_message::PathError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ten_protocol::ProtocolError),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("no engine for graph {0}")]
    UnknownGraph(String),
    #[error("addon {0} is not registered")]
    UnknownAddon(String),
    #[error(transparent)]
    Protocol(#[from] ten_protocol::ProtocolError),
}

/// Aggregated error surfaced at the `ten-host` binary boundary. Individual
/// crates stay on typed `thiserror` enums; only the outermost caller needs
/// `anyhow`'s blanket conversion.
pub type RuntimeError = anyhow::Error;
