//! Error types for payload decoding, scanning and trimming
//!
//! Three failure modes are distinguished so callers can pick a policy:
//! - `OutOfRange`: a read would run past the end of the buffer
//! - `Format`: a structural invariant of the payload is violated
//! - `UnsupportedRecordType`: no decoder is registered for a record tag
//!
//! Only the last one is considered recoverable (skip the record and go on).

use thiserror::Error;

/// Errors raised while reading raw DAQ payloads
#[derive(Error, Debug)]
pub enum PayloadError {
    /// A fixed-width read extends past the end of the buffer
    #[error("read of {width} bytes at offset {offset} overruns buffer of {len} bytes")]
    OutOfRange {
        offset: usize,
        width: usize,
        len: usize,
    },

    /// Corrupt or inconsistent payload structure
    #[error("Malformed payload: {0}")]
    Format(String),

    /// Record tag with no registered decoder
    #[error("Unsupported record type: {0}")]
    UnsupportedRecordType(u32),

    /// I/O error (payload files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PayloadError {
    /// Create a format error
    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    /// Create an out-of-range error
    pub fn out_of_range(offset: usize, width: usize, len: usize) -> Self {
        Self::OutOfRange { offset, width, len }
    }

    /// Whether the caller may skip the offending record and continue
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::UnsupportedRecordType(_))
    }
}

/// Result type alias using PayloadError
pub type PayloadResult<T> = Result<T, PayloadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PayloadError::out_of_range(43, 8, 50);
        assert_eq!(
            err.to_string(),
            "read of 8 bytes at offset 43 overruns buffer of 50 bytes"
        );

        let err = PayloadError::format("record count mismatch");
        assert_eq!(err.to_string(), "Malformed payload: record count mismatch");

        let err = PayloadError::UnsupportedRecordType(42);
        assert_eq!(err.to_string(), "Unsupported record type: 42");
    }

    #[test]
    fn test_recoverable() {
        assert!(PayloadError::UnsupportedRecordType(7).is_recoverable());
        assert!(!PayloadError::format("bad").is_recoverable());
        assert!(!PayloadError::out_of_range(0, 4, 0).is_recoverable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let err: PayloadError = io_err.into();
        assert!(matches!(err, PayloadError::Io(_)));
    }
}
