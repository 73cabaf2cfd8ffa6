//! Chat reader task: owns line reception, drives the pending script, dispatches unsolicited lines
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

use crate::nmea::Sentence;
use crate::serial::{SharedTransport, TransportError};
use super::types::*;
use super::ChatError;

const READ_POLL_MS: u64 = 25;
const TICK_MS: u64 = 5;

/// What the reader has to do after a line was dispatched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineAction {
    None,
    /// The pending script advanced to a step whose request must be written
    Send(String),
}

/// Line routing state shared by the reader task and tests: the pending script,
/// the unsolicited match table and the metrics.
pub struct Dispatcher {
    unsol_matches: Arc<Vec<UnsolicitedMatch>>,
    pending: Option<PendingScript>,
    pub metrics: ChatMetrics,
}

impl Dispatcher {
    pub fn new(unsol_matches: Arc<Vec<UnsolicitedMatch>>, metrics: ChatMetrics) -> Self {
        Self { unsol_matches, pending: None, metrics }
    }

    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    /// Start a script. Returns the first request to write, if any.
    pub fn begin(
        &mut self,
        script: Script,
        responder: oneshot::Sender<Result<ScriptOutcome, ChatError>>,
    ) -> LineAction {
        if self.pending.is_some() {
            let _ = responder.send(Err(ChatError::Busy));
            return LineAction::None;
        }
        if script.steps.is_empty() {
            self.metrics.scripts_completed += 1;
            let _ = responder.send(Ok(ScriptOutcome::default()));
            return LineAction::None;
        }

        log::debug!("Running script '{}' ({} steps)", script.name, script.steps.len());
        let request = script.steps[0].request.clone();
        self.pending = Some(PendingScript {
            script,
            step: 0,
            started: tokio::time::Instant::now(),
            responder,
            outcome: ScriptOutcome::default(),
        });
        if request.is_empty() { LineAction::None } else { LineAction::Send(request) }
    }

    /// Route one received line
    pub fn dispatch_line(&mut self, line: &str) -> LineAction {
        self.metrics.lines_read += 1;

        let sentence = match Sentence::parse(line) {
            Ok(sentence) => sentence,
            Err(e) => {
                self.metrics.checksum_errors += 1;
                // A step waiting for any line takes it as is (standby wake-up garbage)
                if self.awaits_any_line() {
                    let raw = Sentence { line, body: line };
                    if let Some(action) = self.dispatch_to_script(&raw, &raw.tokens()) {
                        return action;
                    }
                }
                log::debug!("Dropping line '{}': {}", line, e);
                return LineAction::None;
            }
        };
        let tokens = sentence.tokens();

        if let Some(action) = self.dispatch_to_script(&sentence, &tokens) {
            return action;
        }

        match self.unsol_matches.iter().find(|m| m.matcher.is_match(sentence.body)) {
            Some(unsol) => {
                self.metrics.unsolicited_lines += 1;
                (unsol.callback)(sentence.line, &tokens);
            }
            None => self.metrics.unclassified_lines += 1,
        }
        LineAction::None
    }

    fn awaits_any_line(&self) -> bool {
        matches!(&self.pending, Some(p) if p.script.steps[p.step].response.is_any())
    }

    /// Returns `None` when the line did not concern the pending script
    fn dispatch_to_script(&mut self, sentence: &Sentence<'_>, tokens: &[&str]) -> Option<LineAction> {
        let pending = self.pending.as_mut()?;
        pending.outcome.lines.push(sentence.line.to_string());

        if pending.script.abort_matches.iter().any(|m| m.is_match(sentence.body)) {
            let done = self.pending.take()?;
            self.metrics.script_aborts += 1;
            log::warn!("Script '{}' aborted by '{}'", done.script.name, sentence.line);
            let _ = done.responder.send(Err(ChatError::Aborted {
                script: done.script.name,
                line: sentence.line.to_string(),
            }));
            return Some(LineAction::None);
        }

        let step = &pending.script.steps[pending.step];
        if !step.response.is_match(sentence.body) {
            return None;
        }
        if let Some(decode) = step.response.callback() {
            if let Some(response) = decode(tokens) {
                pending.outcome.response = Some(response);
            }
        }

        pending.step += 1;
        if pending.step < pending.script.steps.len() {
            let request = pending.script.steps[pending.step].request.clone();
            return Some(if request.is_empty() { LineAction::None } else { LineAction::Send(request) });
        }

        let done = self.pending.take()?;
        let latency_ms = done.started.elapsed().as_millis() as u64;
        self.metrics.scripts_completed += 1;
        self.metrics.script_last_latency_ms = Some(latency_ms);
        self.metrics.script_max_latency_ms = Some(match self.metrics.script_max_latency_ms {
            Some(m) => m.max(latency_ms),
            None => latency_ms,
        });
        let _ = done.responder.send(Ok(done.outcome));
        Some(LineAction::None)
    }

    /// Fail the pending script if its budget is spent. Returns true when it timed out.
    pub fn check_timeout(&mut self) -> bool {
        let expired = matches!(&self.pending, Some(p) if p.started.elapsed() > p.script.timeout);
        if !expired {
            return false;
        }
        let Some(done) = self.pending.take() else {
            return false;
        };

        self.metrics.script_timeouts += 1;
        // Diagnostic log with partial buffer for troubleshooting timeouts
        if !done.outcome.lines.is_empty() {
            log::warn!("Script '{}' timeout after {:?}; lines seen: {:?}", done.script.name, done.script.timeout, done.outcome.lines);
        } else {
            log::warn!("Script '{}' timeout after {:?}; no lines received", done.script.name, done.script.timeout);
        }
        let _ = done.responder.send(Err(ChatError::Timeout {
            script: done.script.name,
            timeout: done.script.timeout,
        }));
        true
    }

    /// Fail the pending script with the given error
    pub fn fail_pending(&mut self, error: ChatError) {
        if let Some(done) = self.pending.take() {
            let _ = done.responder.send(Err(error));
        }
    }
}

pub(crate) async fn reader_task(
    transport: SharedTransport,
    mut cmd_rx: mpsc::Receiver<ChatCommand>,
    unsol_matches: Arc<Vec<UnsolicitedMatch>>,
    metrics_tx: Arc<watch::Sender<ChatMetrics>>,
    receive_buf_size: usize,
) {
    use tokio::select;
    use tokio::time::sleep;

    let mut partial = String::new();
    let mut dispatcher = Dispatcher::new(unsol_matches, metrics_tx.borrow().clone());

    loop {
        if dispatcher.check_timeout() {
            metrics_tx.send_replace(dispatcher.metrics.clone());
        }

        select! {
            maybe_cmd = cmd_rx.recv() => {
                match maybe_cmd {
                    Some(ChatCommand::Run { script, responder }) => {
                        if let LineAction::Send(request) = dispatcher.begin(script, responder) {
                            if let Err(e) = write_line(&transport, &request).await {
                                record_error(&mut dispatcher.metrics, &e);
                                dispatcher.fail_pending(ChatError::Transport(e));
                            }
                        }
                    }
                    Some(ChatCommand::Shutdown) | None => break,
                }
            },
            read_res = async {
                let mut buf = vec![0u8; receive_buf_size];
                let mut guard = transport.lock().await;
                guard.read_data(&mut buf, READ_POLL_MS).await.map(|n| { buf.truncate(n); buf })
            } => {
                match read_res {
                    Ok(bytes) if !bytes.is_empty() => {
                        match std::str::from_utf8(&bytes) {
                            Ok(s) => partial.push_str(s),
                            Err(_) => {
                                dispatcher.metrics.utf8_decode_errors += 1;
                                partial.push_str(&String::from_utf8_lossy(&bytes));
                            }
                        }

                        while let Some(pos) = partial.find(['\n', '\r']) {
                            let line: String = partial.drain(..=pos).collect();
                            let line = line.trim();
                            if line.is_empty() {
                                continue;
                            }
                            if let LineAction::Send(request) = dispatcher.dispatch_line(line) {
                                if let Err(e) = write_line(&transport, &request).await {
                                    record_error(&mut dispatcher.metrics, &e);
                                    dispatcher.fail_pending(ChatError::Transport(e));
                                }
                            }
                        }

                        if partial.len() > receive_buf_size {
                            log::debug!("Discarding {} bytes without delimiter", partial.len());
                            partial.clear();
                            dispatcher.metrics.partial_buffer_trims += 1;
                        }
                        metrics_tx.send_replace(dispatcher.metrics.clone());
                    },
                    Ok(_) => {},
                    Err(TransportError::Timeout) => {},
                    Err(e) => {
                        log::error!("Chat reader stopping on transport error: {}", e);
                        record_error(&mut dispatcher.metrics, &e);
                        metrics_tx.send_replace(dispatcher.metrics.clone());
                        dispatcher.fail_pending(ChatError::Transport(e));
                        break;
                    }
                }
            },
            // Wakes the loop so an idle line still gets its timeout check
            _ = sleep(Duration::from_millis(TICK_MS)) => {}
        }
    }

    dispatcher.fail_pending(ChatError::ReaderTerminated);
    metrics_tx.send_replace(dispatcher.metrics.clone());
}

async fn write_line(transport: &SharedTransport, request: &str) -> Result<(), TransportError> {
    let line = format!("{}\r\n", request);
    let mut guard = transport.lock().await;
    guard.send_data(line.as_bytes()).await?;
    Ok(())
}

fn record_error(metrics: &mut ChatMetrics, error: &TransportError) {
    metrics.last_error = Some(error.to_string());
}
