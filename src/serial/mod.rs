pub mod interface;
pub mod mock;

pub use interface::SerialTransport;
pub use mock::{MockHandle, MockTransport};

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialPortInfo {
    pub port_name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Transport not open")]
    NotOpen,

    #[error("Communication timeout")]
    Timeout,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Byte-stream channel to the receiver.
///
/// `open`/`close` are bounded by the given timeout and are idempotent: opening an
/// open transport or closing a closed one succeeds without side effects.
#[async_trait::async_trait]
pub trait Transport: Send {
    async fn open(&mut self, timeout: Duration) -> Result<()>;

    async fn close(&mut self, timeout: Duration) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Write all of `data`, returning the number of bytes written
    async fn send_data(&mut self, data: &[u8]) -> Result<usize>;

    /// Read whatever is available, waiting at most `timeout_ms` for the first byte.
    /// Returns `TransportError::Timeout` when nothing arrived.
    async fn read_data(&mut self, buffer: &mut [u8], timeout_ms: u64) -> Result<usize>;
}

/// Transport shared between the driver (open/close) and the chat reader task (read/write)
pub type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

pub fn shared<T: Transport + 'static>(transport: T) -> SharedTransport {
    Arc::new(Mutex::new(Box::new(transport)))
}
