use crate::location::Location;
use crate::value::{PropertyMap, PropertyPath, PropertyValue, get_property, set_property};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// The five message kinds the runtime moves through a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MsgKind {
    Cmd,
    CmdResult,
    Data,
    AudioFrame,
    VideoFrame,
}

impl MsgKind {
    /// Only `Cmd` and `CmdResult` participate in path-table correlation.
    pub fn is_command_family(self) -> bool {
        matches!(self, MsgKind::Cmd | MsgKind::CmdResult)
    }

    pub fn carries_buffer(self) -> bool {
        matches!(self, MsgKind::Data | MsgKind::AudioFrame | MsgKind::VideoFrame)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Ok,
    Error,
}

/// Which fields `clone_excluding` should drop. Mirrors the original's
/// per-field clone-exclusion bitset used when a cmd_result is produced from
/// a cmd, or when a cmd is forwarded down a conversion rule.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExcludedFields {
    pub dests: bool,
    pub properties: bool,
    pub buffer: bool,
}

/// A single message moving through the graph. Every field outside of
/// `kind`/`name`/`src`/`dests`/`properties` is optional because only a
/// subset of kinds use it; accessors panic only when called against a kind
/// that structurally cannot have the value (programmer error, not runtime
/// data error).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Msg {
    pub kind: MsgKind,
    pub name: String,
    pub src: Location,
    pub dests: Vec<Location>,
    #[serde(default)]
    pub properties: PropertyMap,

    // cmd / cmd_result correlation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_cmd_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_cmd_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_cmd_name: Option<String>,

    // cmd_result only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<StatusCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_final: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_completed: Option<bool>,

    // data / audio_frame / video_frame payload
    #[serde(default, skip_serializing_if = "Option::is_none", with = "buffer_serde")]
    pub buffer: Option<Bytes>,
}

mod buffer_serde {
    use bytes::Bytes;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<Bytes>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(b) => s.serialize_some(&b[..]),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Bytes>, D::Error> {
        let raw: Option<Vec<u8>> = serde::Deserialize::deserialize(d)?;
        Ok(raw.map(Bytes::from))
    }
}

/// Reference-counted handle to a message. Messages are cheap to clone by
/// `Arc` once published into a connection/path table; mutation happens on
/// the owned `Msg` before it is wrapped.
pub type MsgRef = Arc<Msg>;

/// Guard returned by `Msg::lock_buf`. Holds the underlying `Bytes` alive and
/// prevents the owning `Msg` from being dropped out from under a reader
/// that's mid-copy across an FFI-ish boundary. Unlocking simply means
/// dropping the guard.
pub struct BufGuard {
    bytes: Bytes,
}

impl BufGuard {
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

impl Msg {
    pub fn new_cmd(name: impl Into<String>, src: Location) -> Self {
        Self {
            kind: MsgKind::Cmd,
            name: name.into(),
            src,
            dests: Vec::new(),
            properties: PropertyMap::new(),
            cmd_id: None,
            seq_id: None,
            parent_cmd_id: None,
            original_cmd_type: None,
            original_cmd_name: None,
            status_code: None,
            is_final: None,
            is_completed: None,
            buffer: None,
        }
    }

    pub fn new_cmd_result(name: impl Into<String>, src: Location, status: StatusCode) -> Self {
        let mut m = Self::new_cmd(name, src);
        m.kind = MsgKind::CmdResult;
        m.status_code = Some(status);
        // Every cmd_result defaults to final; whether it is *completed* is
        // decided by the path table that resolves it, not at construction
        // time, so it always starts false regardless of status_code.
        m.is_final = Some(true);
        m.is_completed = Some(false);
        m
    }

    pub fn new_data(name: impl Into<String>, src: Location) -> Self {
        let mut m = Self::new_cmd(name, src);
        m.kind = MsgKind::Data;
        m
    }

    pub fn new_frame(kind: MsgKind, name: impl Into<String>, src: Location) -> Self {
        assert!(matches!(kind, MsgKind::AudioFrame | MsgKind::VideoFrame));
        let mut m = Self::new_cmd(name, src);
        m.kind = kind;
        m
    }

    /// Clones this message, dropping whichever fields `excluded` marks.
    /// Used when forwarding a cmd through a conversion rule (properties
    /// excluded, replaced wholesale) or producing a result envelope from a
    /// cmd (dests excluded, recomputed from the path table).
    pub fn clone_excluding(&self, excluded: &ExcludedFields) -> Msg {
        let mut clone = self.clone();
        if excluded.dests {
            clone.dests.clear();
        }
        if excluded.properties {
            clone.properties.clear();
        }
        if excluded.buffer {
            clone.buffer = None;
        }
        clone
    }

    pub fn set_src(&mut self, src: Location) {
        self.src = src;
    }

    pub fn clear_and_set_dest(&mut self, dest: Location) {
        self.dests.clear();
        self.dests.push(dest);
    }

    pub fn peek_property(&self, path: &PropertyPath) -> Option<&PropertyValue> {
        get_property(&self.properties, path)
    }

    pub fn set_property(&mut self, path: &PropertyPath, value: PropertyValue) {
        set_property(&mut self.properties, path, value);
    }

    pub fn get_cmd_id(&self) -> Option<&str> {
        self.cmd_id.as_deref()
    }

    /// Assigns a fresh cmd_id only if one isn't already set. Idempotent
    /// across retries of the same send call.
    pub fn gen_cmd_id_if_empty(&mut self) -> &str {
        if self.cmd_id.is_none() {
            self.cmd_id = Some(Uuid::new_v4().to_string());
        }
        self.cmd_id.as_deref().unwrap()
    }

    /// Always assigns a new cmd_id, overwriting any existing one. Used when
    /// a cmd is cloned to be sent down a second, independent path.
    pub fn gen_new_cmd_id_forcibly(&mut self) -> &str {
        self.cmd_id = Some(Uuid::new_v4().to_string());
        self.cmd_id.as_deref().unwrap()
    }

    pub fn set_seq_id(&mut self, seq_id: impl Into<String>) {
        self.seq_id = Some(seq_id.into());
    }

    /// Records this message's own cmd_id as `parent_cmd_id`, then clears
    /// cmd_id so the next `gen_cmd_id_if_empty` mints a child identity.
    /// Used when a cmd is re-dispatched to a downstream extension.
    pub fn save_cmd_id_to_parent_cmd_id(&mut self) {
        self.parent_cmd_id = self.cmd_id.take();
    }

    pub fn status_code(&self) -> Option<StatusCode> {
        self.status_code
    }

    pub fn set_status_code(&mut self, status: StatusCode) {
        self.status_code = Some(status);
    }

    /// `is_final`: no more `cmd_result`s will follow for this cmd_id on this
    /// path segment (distinct from `is_completed`, which describes whether
    /// the *command itself* ran to completion vs. errored/was cancelled).
    pub fn is_final(&self) -> bool {
        self.is_final.unwrap_or(true)
    }

    pub fn set_final(&mut self, final_: bool) {
        self.is_final = Some(final_);
    }

    pub fn is_completed(&self) -> bool {
        self.is_completed.unwrap_or(false)
    }

    pub fn set_completed(&mut self, completed: bool) {
        self.is_completed = Some(completed);
    }

    pub fn original_cmd_type(&self) -> Option<&str> {
        self.original_cmd_type.as_deref()
    }

    pub fn original_cmd_name(&self) -> Option<&str> {
        self.original_cmd_name.as_deref()
    }

    pub fn set_original_cmd(&mut self, kind: impl Into<String>, name: impl Into<String>) {
        self.original_cmd_type = Some(kind.into());
        self.original_cmd_name = Some(name.into());
    }

    pub fn set_buffer(&mut self, data: impl Into<Bytes>) {
        self.buffer = Some(data.into());
    }

    /// Takes a read-only lock on the frame/data buffer for the duration the
    /// guard is alive. Because `Bytes` is itself ref-counted and immutable,
    /// this is a cheap clone rather than a real mutex, but it preserves the
    /// "explicit lock/unlock around cross-boundary access" shape the
    /// original API exposes.
    pub fn lock_buf(&self) -> Option<BufGuard> {
        self.buffer.clone().map(|bytes| BufGuard { bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmd_id_generation_is_idempotent_until_forced() {
        let mut msg = Msg::new_cmd("ping", Location::localhost());
        let first = msg.gen_cmd_id_if_empty().to_string();
        let second = msg.gen_cmd_id_if_empty().to_string();
        assert_eq!(first, second);
        let third = msg.gen_new_cmd_id_forcibly().to_string();
        assert_ne!(first, third);
    }

    #[test]
    fn clone_excluding_drops_requested_fields() {
        let mut msg = Msg::new_cmd("ping", Location::localhost());
        msg.dests.push(Location::localhost().with_extension("b"));
        msg.set_property(&"x".into(), 1i64.into());
        msg.set_buffer(Bytes::from_static(b"hi"));

        let excluded = ExcludedFields {
            dests: true,
            properties: true,
            buffer: true,
        };
        let clone = msg.clone_excluding(&excluded);
        assert!(clone.dests.is_empty());
        assert!(clone.properties.is_empty());
        assert!(clone.buffer.is_none());
        // original untouched
        assert_eq!(msg.dests.len(), 1);
    }

    #[test]
    fn save_cmd_id_to_parent_moves_not_copies() {
        let mut msg = Msg::new_cmd("ping", Location::localhost());
        msg.gen_cmd_id_if_empty();
        let original = msg.cmd_id.clone();
        msg.save_cmd_id_to_parent_cmd_id();
        assert_eq!(msg.parent_cmd_id, original);
        assert!(msg.cmd_id.is_none());
    }

    #[test]
    fn cmd_result_defaults_are_final_but_not_completed() {
        // Completion is decided by whichever path table resolves this
        // result, never at construction time, so both outcomes start the
        // same way: final, not yet completed.
        let ok = Msg::new_cmd_result("ping", Location::localhost(), StatusCode::Ok);
        assert!(ok.is_final());
        assert!(!ok.is_completed());

        let err = Msg::new_cmd_result("ping", Location::localhost(), StatusCode::Error);
        assert!(err.is_final());
        assert!(!err.is_completed());
    }

    #[test]
    fn lock_buf_exposes_bytes() {
        let mut msg = Msg::new_data("blob", Location::localhost());
        msg.set_buffer(Bytes::from_static(b"payload"));
        let guard = msg.lock_buf().unwrap();
        assert_eq!(guard.as_slice(), b"payload");
    }

    #[test]
    fn msg_json_round_trip() {
        let mut msg = Msg::new_cmd("ping", Location::localhost());
        msg.gen_cmd_id_if_empty();
        let json = serde_json::to_string(&msg).unwrap();
        let back: Msg = serde_json::from_str(&json).unwrap();
        assert_eq!(msg.cmd_id, back.cmd_id);
        assert_eq!(msg.name, back.name);
    }
}
