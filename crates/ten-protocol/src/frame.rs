use crate::error::FrameError;
use bytes::Bytes;
use uuid::Uuid;

/// Fixed 6-byte marker identifying this wire format, analogous in spirit to
/// an HTTP version string. Present as the first frame of every message so a
/// ROUTER socket's identity-prefix frames can be skipped over when scanning
/// for the start of an actual payload.
pub const PROTOCOL_VERSION: &[u8] = b"TEN01";
pub const FRAME_COUNT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Ready = 0x0001,
    Msg = 0x0002,
    Heartbeat = 0x0003,
    Disconnect = 0x0004,
}

impl Command {
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(v: u16) -> Result<Self, FrameError> {
        match v {
            0x0001 => Ok(Command::Ready),
            0x0002 => Ok(Command::Msg),
            0x0003 => Ok(Command::Heartbeat),
            0x0004 => Ok(Command::Disconnect),
            other => Err(FrameError::UnknownCommand(other)),
        }
    }
}

/// One on-the-wire frame set: a command byte, a correlation id (reused for
/// request/response pairing across a `ten_protocol::Connection`), an
/// optional W3C traceparent carried for distributed tracing, and a msgpack
/// body holding an encoded `ten_message::Msg` (empty for heartbeat/ready).
#[derive(Debug, Clone)]
pub struct TenFrame {
    pub command: Command,
    pub request_id: Uuid,
    pub traceparent: Option<String>,
    pub body: Bytes,
}

impl TenFrame {
    pub fn heartbeat() -> Self {
        Self {
            command: Command::Heartbeat,
            request_id: Uuid::new_v4(),
            traceparent: None,
            body: Bytes::new(),
        }
    }

    pub fn ready(request_id: Uuid) -> Self {
        Self {
            command: Command::Ready,
            request_id,
            traceparent: None,
            body: Bytes::new(),
        }
    }

    pub fn msg(request_id: Uuid, body: Bytes) -> Self {
        Self {
            command: Command::Msg,
            request_id,
            traceparent: None,
            body,
        }
    }

    pub fn disconnect() -> Self {
        Self {
            command: Command::Disconnect,
            request_id: Uuid::new_v4(),
            traceparent: None,
            body: Bytes::new(),
        }
    }

    pub fn with_traceparent(mut self, tp: impl Into<String>) -> Self {
        self.traceparent = Some(tp.into());
        self
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self.command, Command::Heartbeat)
    }

    /// Encodes to the 5-frame wire form: [marker, command, request_id,
    /// traceparent-or-empty, body].
    pub fn to_frames(&self) -> Vec<Bytes> {
        vec![
            Bytes::from_static(PROTOCOL_VERSION),
            Bytes::copy_from_slice(&self.command.to_u16().to_be_bytes()),
            Bytes::copy_from_slice(self.request_id.as_bytes()),
            Bytes::from(self.traceparent.clone().unwrap_or_default()),
            self.body.clone(),
        ]
    }

    /// Parses a frame set, scanning forward for the protocol marker so a
    /// leading ROUTER identity frame (present on the bound side of a
    /// dealer/router pair) doesn't have to be stripped by the caller first.
    pub fn from_frames(frames: &[Bytes]) -> Result<Self, FrameError> {
        let marker_pos = frames
            .iter()
            .position(|f| f.as_ref() == PROTOCOL_VERSION)
            .ok_or(FrameError::MissingMarker)?;
        let rest = &frames[marker_pos..];
        if rest.len() != FRAME_COUNT {
            return Err(FrameError::WrongFrameCount(rest.len(), FRAME_COUNT));
        }

        let command_bytes: [u8; 2] = rest[1]
            .as_ref()
            .try_into()
            .map_err(|_| FrameError::Malformed("command frame must be 2 bytes".into()))?;
        let command = Command::from_u16(u16::from_be_bytes(command_bytes))?;

        let id_bytes: [u8; 16] = rest[2]
            .as_ref()
            .try_into()
            .map_err(|_| FrameError::Malformed("request_id frame must be 16 bytes".into()))?;
        let request_id = Uuid::from_bytes(id_bytes);

        let traceparent = if rest[3].is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&rest[3]).into_owned())
        };

        Ok(Self {
            command,
            request_id,
            traceparent,
            body: rest[4].clone(),
        })
    }

    pub fn identity_prefix<'a>(frames: &'a [Bytes]) -> &'a [Bytes] {
        match frames.iter().position(|f| f.as_ref() == PROTOCOL_VERSION) {
            Some(pos) => &frames[..pos],
            None => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_round_trips() {
        let frame = TenFrame::heartbeat();
        let wire = frame.to_frames();
        let back = TenFrame::from_frames(&wire).unwrap();
        assert!(back.is_heartbeat());
        assert_eq!(back.request_id, frame.request_id);
    }

    #[test]
    fn msg_with_traceparent_round_trips() {
        let id = Uuid::new_v4();
        let frame = TenFrame::msg(id, Bytes::from_static(b"body")).with_traceparent("00-abc-def-01");
        let wire = frame.to_frames();
        let back = TenFrame::from_frames(&wire).unwrap();
        assert_eq!(back.request_id, id);
        assert_eq!(back.traceparent.as_deref(), Some("00-abc-def-01"));
        assert_eq!(&back.body[..], b"body");
    }

    #[test]
    fn identity_prefix_is_skipped_when_present() {
        let id = Uuid::new_v4();
        let mut wire = vec![Bytes::from_static(b"\x00routing-id")];
        wire.extend(TenFrame::ready(id).to_frames());
        let back = TenFrame::from_frames(&wire).unwrap();
        assert_eq!(back.request_id, id);
        assert_eq!(TenFrame::identity_prefix(&wire).len(), 1);
    }

    #[test]
    fn missing_marker_is_an_error() {
        let frames = vec![Bytes::from_static(b"garbage")];
        assert!(matches!(TenFrame::from_frames(&frames), Err(FrameError::MissingMarker)));
    }

    #[test]
    fn wrong_frame_count_is_an_error() {
        let frames = vec![Bytes::from_static(PROTOCOL_VERSION)];
        assert!(matches!(TenFrame::from_frames(&frames), Err(FrameError::WrongFrameCount(_, _))));
    }
}
