pub mod connection;
pub mod error;
pub mod frame;
pub mod protocol;
pub mod runloop;
pub mod socket_config;
pub mod transport;

pub use connection::{AttachTarget, Connection, MigrationState, MsgSink};
pub use error::{FrameError, ProtocolError};
pub use frame::{Command, TenFrame, FRAME_COUNT, PROTOCOL_VERSION};
pub use protocol::{PeerHandler, Protocol, ProtocolRole, ProtocolState};
pub use runloop::{Runloop, RunloopClosed, RunloopHandle, Task};
pub use transport::MsgpackZmqProtocol;
