use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame preamble missing protocol marker")]
    MissingMarker,
    #[error("unexpected frame count: got {0}, want {1}")]
    WrongFrameCount(usize, usize),
    #[error("unknown command code {0}")]
    UnknownCommand(u16),
    #[error("msgpack encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("msgpack decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("malformed frame: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection closed")]
    Closed,
    #[error("connection is mid-migration and cannot accept new messages")]
    Migrating,
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("socket bind/connect failed: {0}")]
    Zmq(#[from] zmq::Error),
}
