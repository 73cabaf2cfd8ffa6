pub mod types;
pub mod reader;

pub use reader::{Dispatcher, LineAction};
pub use types::{ChatMetrics, Matcher, MatchCallback, Script, ScriptOutcome, ScriptStep, UnsolicitedMatch};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::serial::{SharedTransport, TransportError};
use types::ChatCommand;

const COMMAND_CAPACITY: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Script '{script}' timed out after {timeout:?}")]
    Timeout { script: String, timeout: Duration },

    #[error("Script '{script}' aborted by '{line}'")]
    Aborted { script: String, line: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Another script is in flight")]
    Busy,

    #[error("Chat is not attached to a transport")]
    NotAttached,

    #[error("Chat reader terminated")]
    ReaderTerminated,
}

pub type Result<T> = std::result::Result<T, ChatError>;

struct ChatLink {
    cmd_tx: mpsc::Sender<ChatCommand>,
    task: JoinHandle<()>,
}

/// Line-oriented chat over a [`SharedTransport`].
///
/// While attached, a reader task splits incoming bytes into lines and routes them to
/// the running script or to the unsolicited match table. Scripts run one at a time.
pub struct Chat {
    unsol_matches: Arc<Vec<UnsolicitedMatch>>,
    receive_buf_size: usize,
    link: Option<ChatLink>,
    metrics_tx: Arc<watch::Sender<ChatMetrics>>,
    metrics_rx: watch::Receiver<ChatMetrics>,
}

impl Chat {
    pub fn new(unsol_matches: Vec<UnsolicitedMatch>, receive_buf_size: usize) -> Self {
        let (metrics_tx, metrics_rx) = watch::channel(ChatMetrics::default());
        Self {
            unsol_matches: Arc::new(unsol_matches),
            receive_buf_size,
            link: None,
            metrics_tx: Arc::new(metrics_tx),
            metrics_rx,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.link.is_some()
    }

    /// Start receiving from `transport`. Re-attaching first detaches the running reader.
    pub async fn attach(&mut self, transport: SharedTransport) {
        if self.link.is_some() {
            log::debug!("Chat already attached, re-attaching");
            self.detach().await;
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        let task = tokio::spawn(reader::reader_task(
            transport,
            cmd_rx,
            self.unsol_matches.clone(),
            self.metrics_tx.clone(),
            self.receive_buf_size,
        ));
        self.link = Some(ChatLink { cmd_tx, task });
    }

    /// Stop the reader task; a script still in flight fails with `ReaderTerminated`
    pub async fn detach(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };

        let _ = link.cmd_tx.send(ChatCommand::Shutdown).await;
        if let Err(e) = link.task.await {
            log::warn!("Chat reader ended abnormally: {}", e);
        }
    }

    /// Run `script` to completion, abort or timeout
    pub async fn run_script(&self, script: &Script) -> Result<ScriptOutcome> {
        let link = self.link.as_ref().ok_or(ChatError::NotAttached)?;

        let (tx, rx) = oneshot::channel();
        link.cmd_tx
            .send(ChatCommand::Run { script: script.clone(), responder: tx })
            .await
            .map_err(|_| ChatError::ReaderTerminated)?;
        rx.await.map_err(|_| ChatError::ReaderTerminated)?
    }

    pub fn metrics(&self) -> ChatMetrics {
        self.metrics_rx.borrow().clone()
    }

    pub fn metrics_receiver(&self) -> watch::Receiver<ChatMetrics> {
        self.metrics_rx.clone()
    }
}

impl Drop for Chat {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            link.task.abort();
        }
    }
}
