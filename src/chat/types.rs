//! Chat engine core types: matchers, scripts, pending state and metrics
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use serde::{Serialize, Deserialize};

use crate::gnss::Response;
use super::ChatError;

/// Decodes the tokens of a matched line into the device's response slot
pub type MatchCallback = fn(&[&str]) -> Option<Response>;

/// Handler for unsolicited lines. Runs inline with line dispatch, so it must not block.
pub type UnsolicitedCallback = Arc<dyn Fn(&str, &[&str]) + Send + Sync>;

/// Pattern over a sentence body (no `$`, no checksum).
///
/// `?` matches any single character. A body matches when it equals the pattern or
/// continues with a `,` right after it; an empty pattern matches every line.
#[derive(Clone, Default)]
pub struct Matcher {
    pattern: String,
    callback: Option<MatchCallback>,
}

impl Matcher {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self { pattern: pattern.into(), callback: None }
    }

    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_callback(mut self, callback: MatchCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_any(&self) -> bool {
        self.pattern.is_empty()
    }

    pub fn callback(&self) -> Option<MatchCallback> {
        self.callback
    }

    pub fn is_match(&self, body: &str) -> bool {
        let pattern = self.pattern.as_bytes();
        let body = body.as_bytes();
        if body.len() < pattern.len() {
            return false;
        }

        let head_matches = pattern
            .iter()
            .zip(body)
            .all(|(p, b)| *p == b'?' || p == b);

        head_matches && (pattern.is_empty() || body.len() == pattern.len() || body[pattern.len()] == b',')
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Matcher")
            .field("pattern", &self.pattern)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

#[derive(Clone)]
pub struct UnsolicitedMatch {
    pub matcher: Matcher,
    pub callback: UnsolicitedCallback,
}

impl UnsolicitedMatch {
    pub fn new<F>(matcher: Matcher, callback: F) -> Self
    where
        F: Fn(&str, &[&str]) + Send + Sync + 'static,
    {
        Self { matcher, callback: Arc::new(callback) }
    }
}

/// One request line and the response that completes it
#[derive(Debug, Clone)]
pub struct ScriptStep {
    /// Framed request without delimiter; empty means "wait only"
    pub request: String,
    pub response: Matcher,
}

impl ScriptStep {
    pub fn new(request: impl Into<String>, response: Matcher) -> Self {
        Self { request: request.into(), response }
    }
}

#[derive(Debug, Clone)]
pub struct Script {
    pub name: String,
    pub steps: Vec<ScriptStep>,
    pub abort_matches: Vec<Matcher>,
    pub timeout: Duration,
}

impl Script {
    pub fn new(name: impl Into<String>, steps: Vec<ScriptStep>, timeout: Duration) -> Self {
        Self { name: name.into(), steps, abort_matches: Vec::new(), timeout }
    }

    pub fn with_abort_matches(mut self, abort_matches: Vec<Matcher>) -> Self {
        self.abort_matches = abort_matches;
        self
    }
}

/// Result of a completed script
#[derive(Debug, Clone, Default)]
pub struct ScriptOutcome {
    /// Value produced by the last match callback that decoded something
    pub response: Option<Response>,
    /// Lines observed while the script was in flight
    pub lines: Vec<String>,
}

pub struct PendingScript {
    pub script: Script,
    pub step: usize,
    pub started: tokio::time::Instant,
    pub responder: tokio::sync::oneshot::Sender<Result<ScriptOutcome, ChatError>>,
    pub outcome: ScriptOutcome,
}

#[derive(Debug)]
pub enum ChatCommand {
    Run { script: Script, responder: tokio::sync::oneshot::Sender<Result<ScriptOutcome, ChatError>> },
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatMetrics {
    pub lines_read: u64,
    pub unsolicited_lines: u64,
    pub unclassified_lines: u64,
    pub checksum_errors: u64,
    pub scripts_completed: u64,
    pub script_timeouts: u64,
    pub script_aborts: u64,
    pub last_error: Option<String>,
    pub script_last_latency_ms: Option<u64>,
    pub script_max_latency_ms: Option<u64>,
    pub partial_buffer_trims: u64,
    pub utf8_decode_errors: u64,
}
