pub mod driver;
pub mod models;
pub mod pmtk;
pub mod power;

pub use driver::{Lx6, Lx6Builder};
pub use models::*;
pub use pmtk::{EncodeError, PmtkScript, ScratchBuffer};
pub use power::PowerManaged;

use crate::chat::ChatError;
use crate::serial::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum GnssError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodeError),

    #[error("Operation not supported by the module")]
    NotSupported,

    #[error("Chat error: {0}")]
    Chat(#[from] ChatError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Power action {action:?} not possible while {state:?}")]
    InvalidState { action: PowerAction, state: PowerState },
}

/// Flat classification of [`GnssError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    Encoding,
    NotSupported,
    Timeout,
    Aborted,
    Transport,
    MalformedResponse,
    InvalidState,
}

impl GnssError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GnssError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            GnssError::Encoding(_) => ErrorKind::Encoding,
            GnssError::NotSupported => ErrorKind::NotSupported,
            GnssError::Chat(ChatError::Timeout { .. }) => ErrorKind::Timeout,
            GnssError::Chat(ChatError::Aborted { .. }) => ErrorKind::Aborted,
            GnssError::Chat(_) | GnssError::Transport(_) => ErrorKind::Transport,
            GnssError::MalformedResponse(_) => ErrorKind::MalformedResponse,
            GnssError::InvalidState { .. } => ErrorKind::InvalidState,
        }
    }
}

pub type Result<T> = std::result::Result<T, GnssError>;
