//! PMTK request builder, the reusable parameterized script and the fixed scripts
use std::fmt::{self, Write};
use std::time::Duration;

use crate::chat::{MatchCallback, Matcher, Script, ScriptStep};
use crate::gnss::{GnssSystems, NavigationMode, PpsMode, Response};
use crate::nmea;

// PMTK886 navigation modes
pub const NAV_MODE_NORMAL: u8 = 0;
pub const NAV_MODE_FITNESS: u8 = 1;
pub const NAV_MODE_AVIATION: u8 = 2;
pub const NAV_MODE_BALLOON: u8 = 3;
pub const NAV_MODE_STATIONARY: u8 = 4;

// PMTK285 PPS modes
pub const PPS_MODE_DISABLED: u8 = 0;
pub const PPS_MODE_ENABLED_AFTER_LOCK: u8 = 1;
pub const PPS_MODE_ENABLED_WHILE_LOCKED: u8 = 2;
pub const PPS_MODE_ENABLED: u8 = 4;

/// PMTK001 status meaning "valid command, action succeeded"
pub const ACK_SUCCESS: u8 = 3;

/// Reply to PMTK355: PMTK001,355,3,<gps>,<glonass>,<galileo>,<beidou>,<qzss>
const SEARCH_MODE_TOKENS: usize = 8;

pub fn navigation_mode_code(mode: NavigationMode) -> u8 {
    match mode {
        NavigationMode::ZeroDynamics => NAV_MODE_STATIONARY,
        NavigationMode::LowDynamics => NAV_MODE_FITNESS,
        NavigationMode::BalancedDynamics => NAV_MODE_NORMAL,
        NavigationMode::HighDynamics => NAV_MODE_AVIATION,
    }
}

pub fn pps_mode_code(mode: PpsMode) -> u8 {
    match mode {
        PpsMode::Disabled => PPS_MODE_DISABLED,
        PpsMode::Enabled => PPS_MODE_ENABLED,
        PpsMode::EnabledAfterLock => PPS_MODE_ENABLED_AFTER_LOCK,
        PpsMode::EnabledWhileLocked => PPS_MODE_ENABLED_WHILE_LOCKED,
    }
}

/// Decodes a PMTK355 reply. SBAS is not part of the reply in protocol v2.2.
pub fn decode_search_mode(tokens: &[&str]) -> Option<Response> {
    if tokens.len() != SEARCH_MODE_TOKENS {
        return None;
    }

    let enabled = |token: &str| token.starts_with('1');
    let mut systems = GnssSystems::empty();
    for (token, system) in tokens[3..].iter().zip([
        GnssSystems::GPS,
        GnssSystems::GLONASS,
        GnssSystems::GALILEO,
        GnssSystems::BEIDOU,
        GnssSystems::QZSS,
    ]) {
        if enabled(token) {
            systems |= system;
        }
    }

    Some(Response::EnabledSystems(systems))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("Buffer too small: {needed} bytes needed, capacity is {capacity}")]
    BufferTooSmall { needed: usize, capacity: usize },

    #[error("Formatting failed")]
    Format,
}

/// Fixed-capacity text buffer. Formatting that does not fit is an error, never a truncation.
#[derive(Debug, Clone)]
pub struct ScratchBuffer {
    text: String,
    capacity: usize,
}

impl ScratchBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { text: String::with_capacity(capacity), capacity }
    }

    /// Replace the contents with `args`. On failure the buffer is left empty.
    pub fn format(&mut self, args: fmt::Arguments<'_>) -> Result<&str, EncodeError> {
        self.text.clear();
        if self.text.write_fmt(args).is_err() {
            self.text.clear();
            return Err(EncodeError::Format);
        }
        if self.text.len() > self.capacity {
            let needed = self.text.len();
            self.text.clear();
            return Err(EncodeError::BufferTooSmall { needed, capacity: self.capacity });
        }
        Ok(&self.text)
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

/// The parameterized script shared by every setter/getter.
///
/// Request and expected response are rewritten before each run, so it must only be
/// touched by the holder of the device lock.
#[derive(Debug, Clone)]
pub struct PmtkScript {
    request: ScratchBuffer,
    pattern: ScratchBuffer,
    callback: Option<MatchCallback>,
    timeout: Duration,
}

impl PmtkScript {
    pub fn new(buffer_size: usize, timeout: Duration) -> Self {
        Self {
            request: ScratchBuffer::with_capacity(buffer_size),
            pattern: ScratchBuffer::with_capacity(buffer_size),
            callback: None,
            timeout,
        }
    }

    /// Format a request body and frame it as `$<body>*<checksum>`
    pub fn set_request(&mut self, body: fmt::Arguments<'_>) -> Result<(), EncodeError> {
        let body = fmt::format(body);
        self.request.format(format_args!("${}*{:02X}", body, nmea::checksum(&body)))?;
        Ok(())
    }

    pub fn set_match(&mut self, pattern: fmt::Arguments<'_>) -> Result<(), EncodeError> {
        self.pattern.format(pattern)?;
        Ok(())
    }

    pub fn set_callback(&mut self, callback: Option<MatchCallback>) {
        self.callback = callback;
    }

    pub fn request(&self) -> &str {
        self.request.as_str()
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Command id of the current request, e.g. `220` for `$PMTK220,500*2B`
    pub fn command_id(&self) -> Option<&str> {
        let rest = self.request.as_str().strip_prefix("$PMTK")?;
        let end = rest.find([',', '*']).unwrap_or(rest.len());
        Some(&rest[..end])
    }

    /// Snapshot of the current contents as a runnable one-step script.
    ///
    /// A PMTK001 reply for the same command with a failure status aborts the run.
    pub fn script(&self) -> Script {
        let mut response = Matcher::new(self.pattern.as_str());
        if let Some(callback) = self.callback {
            response = response.with_callback(callback);
        }

        let abort_matches = match self.command_id() {
            Some(id) => (0..ACK_SUCCESS)
                .map(|status| Matcher::new(format!("PMTK001,{},{}", id, status)))
                .collect(),
            None => Vec::new(),
        };

        Script::new("pmtk", vec![ScriptStep::new(self.request.as_str(), response)], self.timeout)
            .with_abort_matches(abort_matches)
    }
}

/// Scripts whose text never changes, built once per device
#[derive(Debug, Clone)]
pub struct FixedScripts {
    pub resume: Script,
    pub suspend: Script,
    pub exit_standby: Script,
}

impl FixedScripts {
    pub fn new(timeout: Duration) -> Self {
        Self {
            resume: Script::new(
                "resume",
                vec![ScriptStep::new(nmea::frame(&output_sentences_body()), Matcher::any())],
                timeout,
            ),
            suspend: Script::new(
                "suspend",
                vec![ScriptStep::new(nmea::frame("PMTK161,0"), Matcher::new("PMTK001,161,3"))],
                timeout,
            ),
            // Unknown command: any byte wakes the module, and its answer is not a well-formed sentence
            exit_standby: Script::new(
                "exit_standby",
                vec![ScriptStep::new(nmea::frame("PMTK000"), Matcher::any())],
                timeout,
            ),
        }
    }
}

/// PMTK314 body enabling RMC and GGA output, plus GSV when satellites are reported
pub fn output_sentences_body() -> String {
    let gsv = u8::from(cfg!(feature = "satellites"));
    format!("PMTK314,0,1,0,1,0,{},0,0,0,0,0,0,0,0,0,0,0,0,0", gsv)
}
