use crate::location::Location;
use crate::message::{Msg, StatusCode};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Direction a path was created for, relative to the owning engine: `Out`
/// paths track cmds this engine sent elsewhere and are waiting on a result
/// for; `In` paths track cmds this engine received and must eventually
/// reply to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathDirection {
    In,
    Out,
}

impl PathDirection {
    /// A result always resolves against the table opposite to its own
    /// travel direction first: an inbound result is looked up in OUT (it's
    /// answering something we sent outward); only if that misses do we fall
    /// back to IN, which means we're relaying someone else's reply onward.
    fn lookup_order(self) -> [PathDirection; 2] {
        match self {
            PathDirection::Out => [PathDirection::Out, PathDirection::In],
            PathDirection::In => [PathDirection::In, PathDirection::Out],
        }
    }
}

/// Lets a path rewrite the cmd_result flowing back through it before
/// forwarding. Defined here (rather than on the conversion crate) so `Msg`'s
/// `Path` can hold a reference without creating a cycle between
/// `ten-message` and `ten-conversion`.
pub trait ResultConversion: Send + Sync + fmt::Debug {
    fn apply(&self, result: &Msg) -> Msg;
}

pub type ResultConversionRef = Arc<dyn ResultConversion>;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("no path registered for cmd_id {0}")]
    NotFound(String),
    #[error("cmd_result missing cmd_id")]
    MissingCmdId,
}

/// One outstanding cmd awaiting a result, or one inbound cmd awaiting a
/// reply to be sent back out.
#[derive(Debug, Clone)]
pub struct Path {
    pub cmd_id: String,
    pub parent_cmd_id: Option<String>,
    pub original_src: Location,
    pub original_dest: Location,
    pub result_conversion: Option<ResultConversionRef>,
    pub created_at: Instant,
    pub expire_after: Option<Duration>,
}

impl Path {
    pub fn new(cmd_id: impl Into<String>, original_src: Location, original_dest: Location) -> Self {
        Self {
            cmd_id: cmd_id.into(),
            parent_cmd_id: None,
            original_src,
            original_dest,
            result_conversion: None,
            created_at: Instant::now(),
            expire_after: None,
        }
    }

    pub fn with_expiry(mut self, ttl: Duration) -> Self {
        self.expire_after = Some(ttl);
        self
    }

    pub fn with_result_conversion(mut self, conv: ResultConversionRef) -> Self {
        self.result_conversion = Some(conv);
        self
    }

    fn is_expired(&self, now: Instant) -> bool {
        match self.expire_after {
            Some(ttl) => now.duration_since(self.created_at) >= ttl,
            None => false,
        }
    }
}

/// A cmd_result resolved against the path table: the (possibly rewritten)
/// result message, the path it matched, and whether it was matched at all
/// (a path-table miss still produces a result to drop, not an error, when
/// the result is `is_final == false` and arrives after the table entry was
/// already reaped).
pub struct ResolvedResult {
    pub rewritten: Msg,
    pub matched_direction: PathDirection,
    pub path: Path,
    /// Whether the path should be removed from the table. False for
    /// streaming results where `is_final == false`.
    pub remove_path: bool,
}

/// Tracks outstanding cmd/cmd_result correlations for one engine. `in_paths`
/// and `out_paths` are independent DashMaps so concurrent inbound and
/// outbound traffic never contends on the same lock.
#[derive(Debug)]
pub struct PathTable {
    in_paths: DashMap<String, Path>,
    out_paths: DashMap<String, Path>,
    default_timeout: Option<Duration>,
}

impl Default for PathTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PathTable {
    pub fn new() -> Self {
        Self {
            in_paths: DashMap::new(),
            out_paths: DashMap::new(),
            default_timeout: None,
        }
    }

    pub fn with_default_timeout(mut self, ttl: Duration) -> Self {
        self.default_timeout = Some(ttl);
        self
    }

    pub fn add_in(&self, mut path: Path) {
        if path.expire_after.is_none() {
            path.expire_after = self.default_timeout;
        }
        self.in_paths.insert(path.cmd_id.clone(), path);
    }

    pub fn add_out(&self, mut path: Path) {
        if path.expire_after.is_none() {
            path.expire_after = self.default_timeout;
        }
        self.out_paths.insert(path.cmd_id.clone(), path);
    }

    fn table_for(&self, direction: PathDirection) -> &DashMap<String, Path> {
        match direction {
            PathDirection::In => &self.in_paths,
            PathDirection::Out => &self.out_paths,
        }
    }

    /// Resolves an arriving cmd_result against the table, trying the
    /// direction opposite the result's own travel direction first.
    pub fn resolve_result(
        &self,
        direction: PathDirection,
        result: &Msg,
    ) -> Result<ResolvedResult, PathError> {
        let cmd_id = result.get_cmd_id().ok_or(PathError::MissingCmdId)?;

        for candidate in direction.lookup_order() {
            let table = self.table_for(candidate);
            if let Some(entry) = table.get(cmd_id) {
                let path = entry.value().clone();
                drop(entry);

                let is_final = result.is_final();
                let mut rewritten = match &path.result_conversion {
                    Some(conv) => conv.apply(result),
                    None => result.clone(),
                };

                // Whether a cmd_result is *completed* is decided here, not
                // at construction time: a final result that successfully
                // resolves against this table has run its cmd to the end
                // of this hop, so it's marked completed right before the
                // entry backing it is torn down. This is what lets §3's
                // "removed iff final AND completed" invariant hold for
                // every cmd, including ones that end in StatusCode::Error.
                if is_final {
                    rewritten.set_completed(true);
                    table.remove(cmd_id);
                }

                return Ok(ResolvedResult {
                    rewritten,
                    matched_direction: candidate,
                    path,
                    remove_path: is_final,
                });
            }
        }

        Err(PathError::NotFound(cmd_id.to_string()))
    }

    /// Sweeps both tables for entries past their TTL, synthesizing a
    /// timeout `cmd_result` (`StatusCode::Error`) for each so callers can
    /// unblock whoever is waiting rather than hanging forever.
    pub fn expire_paths(&self, now: Instant) -> Vec<Msg> {
        let mut results = Vec::new();
        for table in [&self.in_paths, &self.out_paths] {
            let expired: Vec<String> = table
                .iter()
                .filter(|e| e.value().is_expired(now))
                .map(|e| e.key().clone())
                .collect();
            for cmd_id in expired {
                if let Some((_, path)) = table.remove(&cmd_id) {
                    let mut timeout_result = Msg::new_cmd_result(
                        "timeout",
                        path.original_dest.clone(),
                        StatusCode::Error,
                    );
                    timeout_result.cmd_id = Some(path.cmd_id.clone());
                    timeout_result.clear_and_set_dest(path.original_src.clone());
                    // The entry is being removed right here, so this is the
                    // same "resolved and torn down" moment `resolve_result`
                    // marks completed — a synthesized timeout is as final
                    // and complete as any other terminal result.
                    timeout_result.set_completed(true);
                    results.push(timeout_result);
                }
            }
        }
        results
    }

    /// Synthesizes an `StatusCode::Error` result for every outstanding path
    /// whose destination extension is `extension_name`, removing each from
    /// the table as it's resolved — used when that extension's callback has
    /// panicked and can never answer the cmds already dispatched to it.
    /// Mirrors `expire_paths`'s synthesize-then-remove shape.
    pub fn fail_extension(&self, extension_name: &str) -> Vec<Msg> {
        let mut results = Vec::new();
        for table in [&self.in_paths, &self.out_paths] {
            let matching: Vec<String> = table
                .iter()
                .filter(|e| e.value().original_dest.extension_name.as_deref() == Some(extension_name))
                .map(|e| e.key().clone())
                .collect();
            for cmd_id in matching {
                if let Some((_, path)) = table.remove(&cmd_id) {
                    let mut error_result = Msg::new_cmd_result(
                        "extension_panicked",
                        path.original_dest.clone(),
                        StatusCode::Error,
                    );
                    error_result.cmd_id = Some(path.cmd_id.clone());
                    error_result.clear_and_set_dest(path.original_src.clone());
                    error_result.set_completed(true);
                    results.push(error_result);
                }
            }
        }
        results
    }

    pub fn in_len(&self) -> usize {
        self.in_paths.len()
    }

    pub fn out_len(&self) -> usize {
        self.out_paths.len()
    }
}
