//! Error types for the variopro library.

use thiserror::Error;

/// The umbrella error returned to the host by driver operations.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Frame encoding error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Module enumeration failed.
    #[error("enumeration error: {0}")]
    Enumeration(#[from] EnumerationError),

    /// The host pushed a cell buffer the registry cannot route.
    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),

    /// No session is established.
    #[error("not connected")]
    NotConnected,
}

impl From<tokio_serial::Error> for DriverError {
    fn from(e: tokio_serial::Error) -> Self {
        Self::Transport(TransportError::Serial(e))
    }
}

impl From<std::io::Error> for DriverError {
    fn from(e: std::io::Error) -> Self {
        Self::Transport(TransportError::Io(e))
    }
}

impl DriverError {
    /// Returns true if the error ended the session.
    #[must_use]
    pub const fn is_disconnect(&self) -> bool {
        matches!(self, Self::Transport(TransportError::Disconnected))
    }
}

/// Transport-level errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The link went away. Fatal to the session.
    #[error("device disconnected")]
    Disconnected,

    /// No data arrived within the wait bound.
    ///
    /// Absorbed by [`Transport::wait_for_data`](crate::transport::Transport::wait_for_data),
    /// which reports it as `Ok(false)`.
    #[error("timed out waiting for data")]
    Timeout,

    /// Serial port error while opening or configuring the port.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error on an open port.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Frame-specific errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Trailing check byte did not match the frame contents.
    #[error("checksum mismatch: expected 0x{expected:02x}, got 0x{actual:02x}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    /// Declared length is not valid for the info type.
    #[error("bad length {length} for info type 0x{info_type:02x}")]
    BadLength { info_type: u8, length: usize },

    /// Byte after the sync byte is not a known info type.
    #[error("unknown info type 0x{0:02x}")]
    UnknownInfoType(u8),

    /// A new sync byte arrived before the current frame was complete.
    #[error("frame interrupted after {0} bytes")]
    Interrupted(usize),

    /// Body does not match any packet layout for its info type.
    #[error("unexpected body for info type 0x{info_type:02x}: {reason}")]
    UnexpectedBody { info_type: u8, reason: &'static str },

    /// Body exceeds what a one-byte length field can carry.
    #[error("frame too large: {size} bytes exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },

    /// Packet kind has no wire representation.
    #[error("packet kind {0} cannot be encoded")]
    NotEncodable(&'static str),
}

/// Enumeration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnumerationError {
    /// No main module answered the handshake.
    #[error("no main module answered within {timeout_ms}ms")]
    NoMainModule { timeout_ms: u64 },
}

/// Cell routing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// Buffer length differs from the reported display length.
    #[error("cell buffer has {actual} cells, display reports {expected}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Result type alias for variopro operations.
pub type Result<T> = std::result::Result<T, DriverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_classification() {
        assert!(DriverError::from(TransportError::Disconnected).is_disconnect());
        assert!(!DriverError::NotConnected.is_disconnect());
        assert!(
            !DriverError::from(RoutingError::LengthMismatch {
                expected: 96,
                actual: 50
            })
            .is_disconnect()
        );
    }

    #[test]
    fn test_error_messages() {
        let err = DriverError::from(RoutingError::LengthMismatch {
            expected: 96,
            actual: 50,
        });
        assert_eq!(
            err.to_string(),
            "routing error: cell buffer has 50 cells, display reports 96"
        );

        let err = FrameError::ChecksumMismatch {
            expected: 0x1b,
            actual: 0x00,
        };
        assert_eq!(
            err.to_string(),
            "checksum mismatch: expected 0x1b, got 0x00"
        );
    }
}
