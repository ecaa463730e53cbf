//! Unified error handling for the Dantherm ventilation service
//!
//! One error enum is shared by the device layer, the queues and the
//! adaptive engine so that failures can travel through completion handles
//! without being re-wrapped at every layer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

// ============================================================================
// ErrorInfo - user-facing error description
// ============================================================================

/// Error information returned to service callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error code (HTTP-like status)
    pub code: u16,
    /// Error message
    pub message: String,
    /// Detailed error description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Field-specific errors for validation
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub field_errors: HashMap<String, Vec<String>>,
}

impl ErrorInfo {
    /// Create a new ErrorInfo with just a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: 500,
            message: message.into(),
            details: None,
            field_errors: HashMap::new(),
        }
    }

    /// Set the error code
    pub fn with_code(mut self, code: u16) -> Self {
        self.code = code;
        self
    }

    /// Add details
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Add a field error
    pub fn add_field_error(mut self, field: impl Into<String>, error: impl Into<String>) -> Self {
        self.field_errors
            .entry(field.into())
            .or_default()
            .push(error.into());
        self
    }
}

// ============================================================================
// DanthermError - Main error type
// ============================================================================

/// Main error type for the Dantherm service
#[derive(Debug, Error)]
pub enum DanthermError {
    // ======================================
    // Transport Errors
    // ======================================
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timeout waiting for response from {0}")]
    Timeout(String),

    #[error("Not connected to {0}")]
    NotConnected(String),

    #[error("Connection failed: {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Update failed: {0}")]
    UpdateFailed(String),

    // ======================================
    // Codec Errors
    // ======================================
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Invalid time format: {0}")]
    InvalidTimeFormat(String),

    #[error("Invalid filter lifetime: {0} (expected 0..=360 days)")]
    InvalidFilterLifetime(i64),

    #[error("Invalid entity: {0}")]
    InvalidEntity(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // ======================================
    // Firmware Errors
    // ======================================
    #[error("Unsupported by firmware {firmware}: {}", fields.join(", "))]
    UnsupportedFirmware { firmware: String, fields: Vec<String> },

    // ======================================
    // Persistence & Runtime Errors
    // ======================================
    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Queue closed: {0}")]
    QueueClosed(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using DanthermError
pub type DanthermResult<T> = Result<T, DanthermError>;

impl DanthermError {
    /// Get the HTTP-like status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            Self::InvalidTimeFormat(_)
            | Self::InvalidFilterLifetime(_)
            | Self::InvalidOperation(_)
            | Self::Configuration(_)
            | Self::Decode(_)
            | Self::Encode(_) => 400,

            // 404 Not Found
            Self::InvalidEntity(_) => 404,

            // 422 Unprocessable
            Self::UnsupportedFirmware { .. } => 422,

            // 502 Bad Gateway
            Self::Transport(_) | Self::ConnectionFailed { .. } | Self::UpdateFailed(_) => 502,

            // 503 Service Unavailable
            Self::NotConnected(_) | Self::QueueClosed(_) => 503,

            // 504 Gateway Timeout
            Self::Timeout(_) => 504,

            Self::Store(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Internal(_)
            | Self::Other(_) => 500,
        }
    }

    /// Stable error code for logs and service responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::NotConnected(_) => "NOT_CONNECTED",
            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::UpdateFailed(_) => "UPDATE_FAILED",
            Self::Decode(_) => "DECODE_ERROR",
            Self::Encode(_) => "ENCODE_ERROR",
            Self::InvalidTimeFormat(_) => "INVALID_TIME_FORMAT",
            Self::InvalidFilterLifetime(_) => "INVALID_FILTER_LIFETIME",
            Self::InvalidEntity(_) => "INVALID_ENTITY",
            Self::InvalidOperation(_) => "INVALID_OPERATION",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::UnsupportedFirmware { .. } => "UNSUPPORTED_FIRMWARE",
            Self::Store(_) => "STORE_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::QueueClosed(_) => "QUEUE_CLOSED",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Other(_) => "OTHER_ERROR",
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::Timeout(_)
                | Self::NotConnected(_)
                | Self::ConnectionFailed { .. }
                | Self::UpdateFailed(_)
        )
    }

    /// Configuration errors are reported synchronously to the caller
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidTimeFormat(_)
                | Self::InvalidFilterLifetime(_)
                | Self::InvalidEntity(_)
                | Self::InvalidOperation(_)
                | Self::Configuration(_)
                | Self::UnsupportedFirmware { .. }
        )
    }

    /// Log level this error should be reported at
    pub fn log_level(&self) -> tracing::Level {
        use tracing::Level;
        if self.is_configuration() {
            Level::INFO
        } else if self.is_retryable() {
            Level::WARN
        } else {
            Level::ERROR
        }
    }

    /// Convert to ErrorInfo for service responses
    pub fn to_error_info(&self) -> ErrorInfo {
        let mut error_info = ErrorInfo::new(self.to_string()).with_code(self.status_code());

        match self {
            Self::UnsupportedFirmware { firmware, fields } => {
                error_info = error_info.with_details(format!("firmware {}", firmware));
                for field in fields {
                    error_info = error_info.add_field_error(field, "unsupported by firmware");
                }
            },
            Self::InvalidTimeFormat(value) => {
                error_info = error_info.add_field_error("time", format!("{} is not HH:MM", value));
            },
            Self::InvalidFilterLifetime(value) => {
                error_info = error_info
                    .add_field_error("filter_lifetime", format!("{} out of range", value));
            },
            _ => {},
        }

        error_info
    }

    /// Owned copy of this error, for resolving several completion handles
    pub fn duplicate(&self) -> Self {
        match self {
            Self::Transport(s) => Self::Transport(s.clone()),
            Self::Timeout(s) => Self::Timeout(s.clone()),
            Self::NotConnected(s) => Self::NotConnected(s.clone()),
            Self::ConnectionFailed { endpoint, reason } => Self::ConnectionFailed {
                endpoint: endpoint.clone(),
                reason: reason.clone(),
            },
            Self::UpdateFailed(s) => Self::UpdateFailed(s.clone()),
            Self::Decode(s) => Self::Decode(s.clone()),
            Self::Encode(s) => Self::Encode(s.clone()),
            Self::InvalidTimeFormat(s) => Self::InvalidTimeFormat(s.clone()),
            Self::InvalidFilterLifetime(v) => Self::InvalidFilterLifetime(*v),
            Self::InvalidEntity(s) => Self::InvalidEntity(s.clone()),
            Self::InvalidOperation(s) => Self::InvalidOperation(s.clone()),
            Self::Configuration(s) => Self::Configuration(s.clone()),
            Self::UnsupportedFirmware { firmware, fields } => Self::UnsupportedFirmware {
                firmware: firmware.clone(),
                fields: fields.clone(),
            },
            Self::Store(s) => Self::Store(s.clone()),
            Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
            Self::Serialization(s) => Self::Serialization(s.clone()),
            Self::QueueClosed(s) => Self::QueueClosed(s.clone()),
            Self::Internal(s) => Self::Internal(s.clone()),
            Self::Other(e) => Self::Internal(e.to_string()),
        }
    }
}

// Conversion traits for common error types
impl From<serde_json::Error> for DanthermError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for DanthermError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::num::ParseIntError> for DanthermError {
    fn from(err: std::num::ParseIntError) -> Self {
        Self::Configuration(format!("Invalid integer: {}", err))
    }
}

// Helper macros for creating errors
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::DanthermError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::DanthermError::Configuration(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! transport_error {
    ($msg:expr) => {
        $crate::DanthermError::Transport($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::DanthermError::Transport(format!($fmt, $($arg)*))
    };
}

// Tests
#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(DanthermError::InvalidTimeFormat("25:00".into()).status_code(), 400);
        assert_eq!(DanthermError::InvalidEntity("nope".into()).status_code(), 404);
        assert_eq!(DanthermError::Transport("reset".into()).status_code(), 502);
        assert_eq!(DanthermError::NotConnected("dev".into()).status_code(), 503);
        assert_eq!(DanthermError::Timeout("dev".into()).status_code(), 504);
        assert_eq!(DanthermError::Internal("x".into()).status_code(), 500);
    }

    #[test]
    fn test_error_retryable() {
        assert!(DanthermError::Timeout("dev".into()).is_retryable());
        assert!(DanthermError::ConnectionFailed {
            endpoint: "10.0.0.2:502".into(),
            reason: "refused".into()
        }
        .is_retryable());
        assert!(!DanthermError::InvalidFilterLifetime(400).is_retryable());
        assert!(!DanthermError::Encode("negative".into()).is_retryable());
    }

    #[test]
    fn test_configuration_errors_are_distinct_from_transport() {
        assert!(DanthermError::InvalidTimeFormat("7".into()).is_configuration());
        assert!(DanthermError::UnsupportedFirmware {
            firmware: "(2.60)".into(),
            fields: vec!["bypass_minimum_temperature".into()]
        }
        .is_configuration());
        assert!(!DanthermError::Transport("broken pipe".into()).is_configuration());
    }

    #[test]
    fn test_unsupported_firmware_message_lists_fields() {
        let error = DanthermError::UnsupportedFirmware {
            firmware: "(2.60)".into(),
            fields: vec![
                "bypass_minimum_temperature".into(),
                "manual_bypass_duration".into(),
            ],
        };
        let text = error.to_string();
        assert!(text.contains("bypass_minimum_temperature, manual_bypass_duration"));

        let info = error.to_error_info();
        assert_eq!(info.code, 422);
        assert!(info.field_errors.contains_key("manual_bypass_duration"));
    }

    #[test]
    fn test_duplicate_keeps_variant() {
        let error = DanthermError::InvalidFilterLifetime(361);
        let copy = error.duplicate();
        assert_eq!(copy.error_code(), "INVALID_FILTER_LIFETIME");
        assert_eq!(copy.to_string(), error.to_string());
    }

    #[test]
    fn test_macros() {
        let error = config_error!("scan interval {} too small", 1);
        assert_eq!(error.error_code(), "CONFIGURATION_ERROR");
        let error = transport_error!("reset");
        assert_eq!(error.error_code(), "TRANSPORT_ERROR");
    }
}
