//! NMEA 0183 line framing: `$<body>*<XX>` with an XOR checksum.
//!
//! Only the envelope is handled here. Field semantics of GGA/RMC/GSV belong to
//! whoever subscribes to the forwarded [`NmeaSentence`] stream.
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::chat::{Matcher, UnsolicitedMatch};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("Checksum mismatch: computed {computed:02X}, received {received}")]
    ChecksumMismatch { computed: u8, received: String },
}

/// XOR of every byte between `$` and `*`
pub fn checksum(body: &str) -> u8 {
    body.bytes().fold(0, |acc, b| acc ^ b)
}

/// Wrap a sentence body into its wire form (without the line delimiter)
pub fn frame(body: &str) -> String {
    format!("${}*{:02X}", body, checksum(body))
}

/// A received line split into its body.
///
/// Lines that do not start with `$` are kept whole as the body: the module answers
/// a standby wake-up with bytes that are not a well-formed sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sentence<'a> {
    pub line: &'a str,
    pub body: &'a str,
}

impl<'a> Sentence<'a> {
    pub fn parse(line: &'a str) -> Result<Self, FrameError> {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('$') else {
            return Ok(Self { line, body: line });
        };

        let body = match rest.rsplit_once('*') {
            Some((body, received)) => {
                let computed = checksum(body);
                match u8::from_str_radix(received, 16) {
                    Ok(value) if value == computed && received.len() == 2 => body,
                    _ => {
                        return Err(FrameError::ChecksumMismatch {
                            computed,
                            received: received.to_string(),
                        })
                    }
                }
            }
            None => rest,
        };

        Ok(Self { line, body })
    }

    pub fn tokens(&self) -> Vec<&'a str> {
        self.body.split(',').collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SentenceKind {
    Gga,
    Rmc,
    Gsv,
}

impl SentenceKind {
    /// Unsolicited match pattern; `??` accepts any talker (GP, GL, GN, ...)
    pub fn pattern(&self) -> &'static str {
        match self {
            SentenceKind::Gga => "??GGA",
            SentenceKind::Rmc => "??RMC",
            SentenceKind::Gsv => "??GSV",
        }
    }

    /// Kinds forwarded to subscribers in this build
    pub fn reported() -> Vec<SentenceKind> {
        let mut kinds = vec![SentenceKind::Gga, SentenceKind::Rmc];
        if cfg!(feature = "satellites") {
            kinds.push(SentenceKind::Gsv);
        }
        kinds
    }
}

/// Unsolicited sentence as forwarded to subscribers, unchanged from wire form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NmeaSentence {
    pub kind: SentenceKind,
    pub talker: String,
    pub line: String,
    pub fields: Vec<String>,
}

impl NmeaSentence {
    pub fn new(kind: SentenceKind, line: &str, tokens: &[&str]) -> Self {
        let talker = tokens
            .first()
            .and_then(|address| address.get(..2))
            .unwrap_or_default()
            .to_string();

        Self {
            kind,
            talker,
            line: line.to_string(),
            fields: tokens.iter().map(|t| t.to_string()).collect(),
        }
    }
}

/// Unsolicited match table forwarding every reported sentence kind to `sink`.
///
/// The callbacks only do a non-blocking broadcast send; lagging or absent
/// subscribers never stall line dispatch.
pub fn sentence_matches(sink: &broadcast::Sender<NmeaSentence>) -> Vec<UnsolicitedMatch> {
    SentenceKind::reported()
        .into_iter()
        .map(|kind| {
            let sink = sink.clone();
            UnsolicitedMatch::new(Matcher::new(kind.pattern()), move |line, tokens| {
                let _ = sink.send(NmeaSentence::new(kind, line, tokens));
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_known_pmtk_commands() {
        assert_eq!(frame("PMTK161,0"), "$PMTK161,0*28");
        assert_eq!(frame("PMTK000"), "$PMTK000*32");
        assert_eq!(frame("PMTK220,500"), "$PMTK220,500*2B");
    }

    #[test]
    fn parse_strips_envelope() {
        let sentence = Sentence::parse("$PMTK001,161,3*36\r").expect("valid sentence");
        assert_eq!(sentence.body, "PMTK001,161,3");
        assert_eq!(sentence.tokens(), vec!["PMTK001", "161", "3"]);
    }

    #[test]
    fn parse_rejects_bad_checksum() {
        let err = Sentence::parse("$PMTK001,161,3*37").unwrap_err();
        assert_eq!(err, FrameError::ChecksumMismatch { computed: 0x36, received: "37".into() });
    }

    #[test]
    fn parse_keeps_raw_lines() {
        let sentence = Sentence::parse("garbage after wake").expect("raw line");
        assert_eq!(sentence.body, "garbage after wake");
    }

    #[test]
    fn sentence_carries_talker() {
        let tokens = ["GNRMC", "123519", "A"];
        let sentence = NmeaSentence::new(SentenceKind::Rmc, "$GNRMC,123519,A*00", &tokens);
        assert_eq!(sentence.talker, "GN");
        assert_eq!(sentence.fields.len(), 3);
    }
}
