//! Communication link error types

use errors::DanthermError;
use thiserror::Error;

/// Result type for dantherm-comlink operations
pub type Result<T> = std::result::Result<T, ComLinkError>;

/// Communication link errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ComLinkError {
    /// Connection could not be established or was lost
    #[error("Connection error: {0}")]
    Connection(String),

    /// Operation attempted without an open connection
    #[error("Not connected")]
    NotConnected,

    /// IO errors
    #[error("IO error: {0}")]
    Io(String),

    /// Timeout errors
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Malformed frame or unexpected response
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Device answered with a Modbus exception
    #[error(
        "Modbus exception: function 0x{function:02X}, code 0x{code:02X} ({})",
        exception_description(*code)
    )]
    Exception { function: u8, code: u8 },

    /// Register words could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Value could not be encoded into register words
    #[error("Encode error: {0}")]
    Encode(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Human-readable Modbus exception code
pub fn exception_description(code: u8) -> &'static str {
    match code {
        0x01 => "Illegal Function",
        0x02 => "Illegal Data Address",
        0x03 => "Illegal Data Value",
        0x04 => "Server Device Failure",
        0x05 => "Acknowledge",
        0x06 => "Server Device Busy",
        0x0A => "Gateway Path Unavailable",
        0x0B => "Gateway Target Failed to Respond",
        _ => "Unknown Exception",
    }
}

impl From<std::io::Error> for ComLinkError {
    fn from(err: std::io::Error) -> Self {
        ComLinkError::Io(err.to_string())
    }
}

// Helper methods for creating errors
impl ComLinkError {
    pub fn connection(msg: impl Into<String>) -> Self {
        ComLinkError::Connection(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        ComLinkError::Io(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        ComLinkError::Timeout(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        ComLinkError::Protocol(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        ComLinkError::Decode(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        ComLinkError::Encode(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        ComLinkError::Config(msg.into())
    }

    /// Connection-level failure: the link is unusable until reconnected
    pub fn needs_reconnect(&self) -> bool {
        match self {
            ComLinkError::Io(_) | ComLinkError::Connection(_) | ComLinkError::NotConnected => true,
            ComLinkError::Timeout(_) => true,
            _ => false,
        }
    }

    /// Device-side rejection rather than a link problem
    pub fn is_exception(&self) -> bool {
        matches!(self, ComLinkError::Exception { .. })
    }
}

impl From<ComLinkError> for DanthermError {
    fn from(err: ComLinkError) -> Self {
        match err {
            ComLinkError::Connection(msg) => DanthermError::Transport(msg),
            ComLinkError::NotConnected => DanthermError::NotConnected("device".to_string()),
            ComLinkError::Io(msg) => DanthermError::Transport(msg),
            ComLinkError::Timeout(msg) => DanthermError::Timeout(msg),
            ComLinkError::Protocol(msg) => DanthermError::Transport(msg),
            exception @ ComLinkError::Exception { .. } => {
                DanthermError::Transport(exception.to_string())
            },
            ComLinkError::Decode(msg) => DanthermError::Decode(msg),
            ComLinkError::Encode(msg) => DanthermError::Encode(msg),
            ComLinkError::Config(msg) => DanthermError::Configuration(msg),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_needs_reconnect() {
        assert!(ComLinkError::io("Broken pipe").needs_reconnect());
        assert!(ComLinkError::NotConnected.needs_reconnect());
        assert!(ComLinkError::timeout("no response").needs_reconnect());
        assert!(!ComLinkError::Exception {
            function: 0x03,
            code: 0x02
        }
        .needs_reconnect());
        assert!(!ComLinkError::decode("short").needs_reconnect());
    }

    #[test]
    fn test_exception_display() {
        let err = ComLinkError::Exception {
            function: 0x83,
            code: 0x02,
        };
        assert_eq!(
            err.to_string(),
            "Modbus exception: function 0x83, code 0x02 (Illegal Data Address)"
        );
    }

    #[test]
    fn test_into_dantherm_error() {
        let err: DanthermError = ComLinkError::encode("negative into UInt32").into();
        assert!(matches!(err, DanthermError::Encode(_)));

        let err: DanthermError = ComLinkError::timeout("10s").into();
        assert!(err.is_retryable());
    }
}
