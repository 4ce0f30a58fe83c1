//! Error types for transport operations.
//!
//! Covers the ways a byte link to the validator can fail: it was never
//! opened, it went away, a write did not go through, or the underlying I/O
//! reported an error.

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors that can occur while talking to the validator link.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Link is not open or has been closed.
    #[error("Device disconnected: {device}")]
    Disconnected { device: String },

    /// Opening the link failed.
    #[error("Open failed: {message}")]
    OpenFailed { message: String },

    /// A byte could not be written.
    #[error("Write failed: {message}")]
    WriteFailed { message: String },

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Create a new disconnected error.
    pub fn disconnected(device: impl Into<String>) -> Self {
        Self::Disconnected {
            device: device.into(),
        }
    }

    /// Create a new open failed error.
    pub fn open_failed(message: impl Into<String>) -> Self {
        Self::OpenFailed {
            message: message.into(),
        }
    }

    /// Create a new write failed error.
    pub fn write_failed(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }

    /// Whether the link is gone and the session has to be torn down.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
            || matches!(self, Self::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnected_error() {
        let error = TransportError::disconnected("mock-validator");
        assert!(error.is_disconnect());
        assert_eq!(error.to_string(), "Device disconnected: mock-validator");
    }

    #[test]
    fn test_open_failed_error() {
        let error = TransportError::open_failed("/dev/ttyUSB0 busy");
        assert_eq!(error.to_string(), "Open failed: /dev/ttyUSB0 busy");
    }

    #[test]
    fn test_write_failed_error() {
        let error = TransportError::write_failed("broken pipe");
        assert_eq!(error.to_string(), "Write failed: broken pipe");
    }

    #[test]
    fn test_eof_is_disconnect() {
        let error = TransportError::from(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        assert!(error.is_disconnect());

        let error = TransportError::from(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert!(!error.is_disconnect());
    }
}
