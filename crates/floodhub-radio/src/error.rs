//! Error types for radio operations.
//!
//! A [`RadioError`] means the stack refused a request outright. Failures
//! reported asynchronously travel as a [`GattStatus`](crate::GattStatus)
//! inside the completion event instead.

/// Result type alias for radio operations.
pub type Result<T> = std::result::Result<T, RadioError>;

/// Errors returned synchronously by the radio stack.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RadioError {
    /// The stack rejected the request.
    #[error("{operation} rejected: {reason}")]
    Rejected { operation: String, reason: String },

    /// The slot has no client registration.
    #[error("Slot {slot} is not registered")]
    NotRegistered { slot: usize },

    /// No open link with that connection id.
    #[error("Unknown connection {conn_id}")]
    UnknownConnection { conn_id: u16 },

    /// The event channel to the engine is gone.
    #[error("Radio event channel closed")]
    ChannelClosed,

    /// The stack does not support the operation.
    #[error("Unsupported operation: {operation}")]
    Unsupported { operation: String },
}

impl RadioError {
    /// Create a new rejected request error.
    pub fn rejected(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a new unsupported operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }
}

impl From<RadioError> for floodhub_core::Error {
    fn from(err: RadioError) -> Self {
        floodhub_core::Error::Radio(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_error() {
        let error = RadioError::rejected("open", "stack busy");
        assert!(matches!(error, RadioError::Rejected { .. }));
        assert_eq!(error.to_string(), "open rejected: stack busy");
    }

    #[test]
    fn test_not_registered_error() {
        let error = RadioError::NotRegistered { slot: 2 };
        assert_eq!(error.to_string(), "Slot 2 is not registered");
    }

    #[test]
    fn test_unsupported_error() {
        let error = RadioError::unsupported("set_tx_power");
        assert_eq!(error.to_string(), "Unsupported operation: set_tx_power");
    }

    #[test]
    fn test_into_core_error() {
        let error: floodhub_core::Error = RadioError::ChannelClosed.into();
        assert!(matches!(error, floodhub_core::Error::Radio(_)));
        assert_eq!(error.to_string(), "Radio error: Radio event channel closed");
    }
}
