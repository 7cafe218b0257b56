use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Protocol errors
    #[error("Frame too large: {size} bytes (max {max_size})")]
    FrameTooLarge { size: usize, max_size: usize },

    #[error("Invalid frame: {message}")]
    InvalidFrame { message: String },

    #[error("Checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    // Device errors
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device {0} has no writable control characteristic")]
    NotControllable(String),

    #[error("Invalid device address: {0}")]
    InvalidAddress(String),

    #[error("Invalid device name: {0}")]
    InvalidName(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // Radio errors
    #[error("Radio error: {0}")]
    Radio(String),

    #[error("Hub is not running")]
    HubStopped,

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a new invalid frame error.
    pub fn invalid_frame(message: impl Into<String>) -> Self {
        Self::InvalidFrame {
            message: message.into(),
        }
    }

    /// Create a new invalid state transition error.
    pub fn transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
