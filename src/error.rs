//! # Exchange Error Types
//!
//! Every failure in the exchange aborts the session. `FailureKind` is the
//! copyable summary recorded in the session's `Failed` state.

use std::io::ErrorKind;

use thiserror::Error;

/// Main error type for exchange operations
#[derive(Error, Debug)]
pub enum ExchangeError {
    /// Connect, bind, listen, read or write failure
    #[error("Transport error: {0}")]
    TransportError(std::io::Error),

    /// Peer closed the channel before the exchange completed
    #[error("Transport closed by peer")]
    TransportClosed,

    /// Key pair generation or parameter validation failed
    #[error("Key generation failed: {0}")]
    KeyGenError(String),

    /// Peer public value is out of range or degenerate
    #[error("Invalid peer public value: {0}")]
    InvalidPeerValue(String),

    /// Shared secret shorter than the cipher key
    #[error("Secret too short for cipher key: need {expected} bytes, got {actual}")]
    KeyTooShort { expected: usize, actual: usize },

    /// IV length differs from the block size
    #[error("Invalid IV length: expected {expected}, got {actual}")]
    InvalidIvLength { expected: usize, actual: usize },

    /// PKCS#7 padding did not verify after decryption
    #[error("Invalid padding")]
    PaddingError,

    /// Ciphertext length is zero or not a multiple of the block size
    #[error("Invalid ciphertext length: {0}")]
    CiphertextLengthError(usize),

    /// Other cipher failure (RNG for IVs, cipher construction)
    #[error("Cipher error: {0}")]
    CipherError(String),

    /// Malformed frame on the wire
    #[error("Frame error: {0}")]
    FrameError(String),

    /// Frame or message exceeds protocol bounds
    #[error("Message exceeds maximum size: {size} > {max}")]
    MessageTooLarge { size: usize, max: usize },

    /// Peer sent a frame type the state machine was not expecting
    #[error("Unexpected message: expected {expected}, got {actual}")]
    UnexpectedMessage { expected: String, actual: String },

    /// Step invoked in the wrong state
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Transport operation exceeded its timeout
    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),
}

/// Result type alias for exchange operations
pub type ExchangeResult<T> = Result<T, ExchangeError>;

impl From<std::io::Error> for ExchangeError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            ErrorKind::UnexpectedEof
            | ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::WriteZero => ExchangeError::TransportClosed,
            _ => ExchangeError::TransportError(e),
        }
    }
}

/// Copyable classification of an `ExchangeError`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transport,
    TransportClosed,
    KeyGen,
    InvalidPeerValue,
    KeyTooShort,
    InvalidIvLength,
    Padding,
    CiphertextLength,
    Cipher,
    Frame,
    MessageTooLarge,
    UnexpectedMessage,
    InvalidStateTransition,
    Timeout,
}

impl ExchangeError {
    /// Classify this error for state tracking
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::TransportError(_) => FailureKind::Transport,
            Self::TransportClosed => FailureKind::TransportClosed,
            Self::KeyGenError(_) => FailureKind::KeyGen,
            Self::InvalidPeerValue(_) => FailureKind::InvalidPeerValue,
            Self::KeyTooShort { .. } => FailureKind::KeyTooShort,
            Self::InvalidIvLength { .. } => FailureKind::InvalidIvLength,
            Self::PaddingError => FailureKind::Padding,
            Self::CiphertextLengthError(_) => FailureKind::CiphertextLength,
            Self::CipherError(_) => FailureKind::Cipher,
            Self::FrameError(_) => FailureKind::Frame,
            Self::MessageTooLarge { .. } => FailureKind::MessageTooLarge,
            Self::UnexpectedMessage { .. } => FailureKind::UnexpectedMessage,
            Self::InvalidStateTransition { .. } => FailureKind::InvalidStateTransition,
            Self::Timeout(_) => FailureKind::Timeout,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_stream_errors_map_to_transport_closed() {
        for kind in [ErrorKind::UnexpectedEof, ErrorKind::BrokenPipe, ErrorKind::ConnectionReset] {
            let err: ExchangeError = std::io::Error::new(kind, "gone").into();
            assert_eq!(err.kind(), FailureKind::TransportClosed);
        }
    }

    #[test]
    fn test_other_io_errors_stay_transport_errors() {
        let err: ExchangeError = std::io::Error::new(ErrorKind::AddrInUse, "busy").into();
        assert_eq!(err.kind(), FailureKind::Transport);
        assert!(err.to_string().contains("busy"));
    }
}
