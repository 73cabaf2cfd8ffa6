//! In-memory transport emulating a receiver that answers PMTK commands.
//!
//! Used by the integration tests and handy for exercising the driver without hardware.
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use super::{Result, Transport, TransportError};
use crate::nmea;

/// Produces the reply lines for one request body. Replies not starting with `$` get framed.
pub type Responder = Box<dyn FnMut(&str) -> Vec<String> + Send>;

#[derive(Default)]
struct MockState {
    open: bool,
    fail_open: bool,
    fail_close: bool,
    responder: Option<Responder>,
    reply_delay: Duration,
    writes: Vec<String>,
    write_times: Vec<Instant>,
    open_calls: Vec<Instant>,
    close_calls: Vec<Instant>,
    outstanding: usize,
    max_outstanding: usize,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    inbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    inbound_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: Vec<u8>,
}

/// Test-side view of a [`MockTransport`]
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
    inbound_tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl MockTransport {
    /// New closed transport that answers like a receiver with protocol v2.2 firmware
    pub fn new() -> (Self, MockHandle) {
        let state = Arc::new(Mutex::new(MockState {
            responder: Some(Box::new(acknowledge_pmtk)),
            ..Default::default()
        }));
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let handle = MockHandle { state: state.clone(), inbound_tx: inbound_tx.clone() };
        (Self { state, inbound_tx, inbound_rx, pending: Vec::new() }, handle)
    }

    fn respond(&self, line: &str) {
        let body = match nmea::Sentence::parse(line) {
            Ok(sentence) => sentence.body.to_string(),
            Err(_) => line.trim_start_matches('$').to_string(),
        };

        let (replies, delay) = {
            let mut state = lock(&self.state);
            state.writes.push(line.to_string());
            state.write_times.push(Instant::now());
            let replies = match state.responder.as_mut() {
                Some(responder) => responder(&body),
                None => Vec::new(),
            };
            if replies.is_empty() {
                return;
            }
            state.outstanding += 1;
            state.max_outstanding = state.max_outstanding.max(state.outstanding);
            (replies, state.reply_delay)
        };

        let bytes: Vec<u8> = replies
            .iter()
            .flat_map(|reply| framed(reply).into_bytes())
            .collect();
        let state = self.state.clone();
        let inbound_tx = self.inbound_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            lock(&state).outstanding -= 1;
            let _ = inbound_tx.send(bytes);
        });
    }
}

fn framed(line: &str) -> String {
    if line.starts_with('$') {
        format!("{}\r\n", line)
    } else {
        format!("{}\r\n", nmea::frame(line))
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn open(&mut self, _timeout: Duration) -> Result<()> {
        let mut state = lock(&self.state);
        state.open_calls.push(Instant::now());
        if state.fail_open {
            return Err(TransportError::ConnectionFailed("mock open failure".into()));
        }
        if !state.open {
            while self.inbound_rx.try_recv().is_ok() {}
            self.pending.clear();
            state.open = true;
        }
        Ok(())
    }

    async fn close(&mut self, _timeout: Duration) -> Result<()> {
        let mut state = lock(&self.state);
        state.close_calls.push(Instant::now());
        state.open = false;
        if state.fail_close {
            return Err(TransportError::ConnectionFailed("mock close failure".into()));
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    async fn send_data(&mut self, data: &[u8]) -> Result<usize> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }

        let text = String::from_utf8_lossy(data);
        for line in text.split(['\r', '\n']).filter(|l| !l.is_empty()) {
            self.respond(line);
        }
        Ok(data.len())
    }

    async fn read_data(&mut self, buffer: &mut [u8], timeout_ms: u64) -> Result<usize> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }

        if self.pending.is_empty() {
            match tokio::time::timeout(Duration::from_millis(timeout_ms), self.inbound_rx.recv()).await {
                Ok(Some(bytes)) => self.pending = bytes,
                Ok(None) | Err(_) => return Err(TransportError::Timeout),
            }
        }

        let n = self.pending.len().min(buffer.len());
        buffer[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

impl MockHandle {
    /// Replace the reply logic. The responder runs under the mock's lock and must not call back into the handle.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&str) -> Vec<String> + Send + 'static,
    {
        lock(&self.state).responder = Some(Box::new(responder));
    }

    pub fn set_reply_delay(&self, delay: Duration) {
        lock(&self.state).reply_delay = delay;
    }

    pub fn set_fail_open(&self, fail: bool) {
        lock(&self.state).fail_open = fail;
    }

    pub fn set_fail_close(&self, fail: bool) {
        lock(&self.state).fail_close = fail;
    }

    /// Push a line as if the receiver emitted it on its own; framed unless it starts with `$`
    pub fn inject_line(&self, line: &str) {
        let _ = self.inbound_tx.send(framed(line).into_bytes());
    }

    /// Every line written so far, framed as sent
    pub fn writes(&self) -> Vec<String> {
        lock(&self.state).writes.clone()
    }

    /// Bodies of the PMTK requests written so far, e.g. `PMTK220,500`
    pub fn requests(&self) -> Vec<String> {
        lock(&self.state)
            .writes
            .iter()
            .filter_map(|line| nmea::Sentence::parse(line).ok().map(|s| s.body.to_string()))
            .collect()
    }

    /// Lines written so far with the time each was written
    pub fn writes_at(&self) -> Vec<(Instant, String)> {
        let state = lock(&self.state);
        state.write_times.iter().copied().zip(state.writes.iter().cloned()).collect()
    }

    pub fn clear_writes(&self) {
        let mut state = lock(&self.state);
        state.writes.clear();
        state.write_times.clear();
    }

    pub fn open_calls(&self) -> Vec<Instant> {
        lock(&self.state).open_calls.clone()
    }

    pub fn close_calls(&self) -> Vec<Instant> {
        lock(&self.state).close_calls.clone()
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    /// Highest number of requests that were waiting for a reply at the same time
    pub fn max_outstanding(&self) -> usize {
        lock(&self.state).max_outstanding
    }
}

/// Default responder: acknowledges every PMTK command with success the way the module does
pub fn acknowledge_pmtk(body: &str) -> Vec<String> {
    let Some(rest) = body.strip_prefix("PMTK") else {
        return Vec::new();
    };
    let (id, args) = match rest.split_once(',') {
        Some((id, args)) => (id, Some(args)),
        None => (rest, None),
    };

    let reply = match (id, args) {
        ("355", _) => "PMTK001,355,3,1,1,0,0,0".to_string(),
        // unknown command
        ("000", _) => "PMTK001,0,1".to_string(),
        ("220" | "353", Some(args)) => format!("PMTK001,{},3,{}", id, args),
        _ => format!("PMTK001,{},3", id),
    };
    vec![reply]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acknowledges_like_the_module() {
        assert_eq!(acknowledge_pmtk("PMTK220,500"), vec!["PMTK001,220,3,500"]);
        assert_eq!(acknowledge_pmtk("PMTK161,0"), vec!["PMTK001,161,3"]);
        assert_eq!(acknowledge_pmtk("PMTK353,1,1,0,0,0"), vec!["PMTK001,353,3,1,1,0,0,0"]);
        assert!(acknowledge_pmtk("GPGGA,1").is_empty());
    }

    #[tokio::test]
    async fn replies_arrive_after_write() {
        let (mut transport, handle) = MockTransport::new();
        transport.open(Duration::from_secs(1)).await.expect("open");
        transport.send_data(b"$PMTK220,500*2B\r\n").await.expect("send");

        let mut buf = [0u8; 64];
        let n = transport.read_data(&mut buf, 500).await.expect("reply");
        assert_eq!(&buf[..n], b"$PMTK001,220,3,500*29\r\n");
        assert_eq!(handle.requests(), vec!["PMTK220,500"]);
        assert_eq!(handle.max_outstanding(), 1);
    }

    #[tokio::test]
    async fn closed_transport_rejects_io() {
        let (mut transport, _handle) = MockTransport::new();
        assert!(matches!(transport.send_data(b"x").await, Err(TransportError::NotOpen)));
    }
}
