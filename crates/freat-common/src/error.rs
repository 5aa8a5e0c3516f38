//! Error types for Freat
//!
//! Every failure a client can observe maps onto one of these variants; the
//! dispatcher converts them into error responses, so none of them ever
//! terminates a connection.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid JSON format")]
    MalformedRequest,

    #[error("Missing '{0}' field")]
    MissingField(&'static str),

    #[error("Invalid '{0}' field")]
    InvalidField(&'static str),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Not attached to any process")]
    NotAttached,

    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("No active scan. Run a first scan before a next scan")]
    NoActiveScan,

    #[error("Invalid scan_type: {0}. Must be 'first' or 'next'")]
    InvalidScanType(String),

    #[error("Unsupported width: {0}")]
    UnsupportedWidth(u64),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Backend-level failure carrying the underlying message.
    pub fn backend(msg: impl Into<String>) -> Self {
        Error::Backend(msg.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_display() {
        let err = Error::MissingField("value");
        assert_eq!(format!("{}", err), "Missing 'value' field");
    }

    #[test]
    fn test_unknown_command_display() {
        let err = Error::UnknownCommand("frobnicate".to_string());
        assert_eq!(format!("{}", err), "Unknown command: frobnicate");
    }

    #[test]
    fn test_not_attached_display() {
        assert_eq!(
            format!("{}", Error::NotAttached),
            "Not attached to any process"
        );
    }

    #[test]
    fn test_process_not_found_display() {
        let err = Error::ProcessNotFound("game.exe".to_string());
        assert!(format!("{}", err).contains("game.exe"));
    }

    #[test]
    fn test_invalid_scan_type_display() {
        let err = Error::InvalidScanType("middle".to_string());
        let msg = format!("{}", err);
        assert!(msg.contains("middle"));
        assert!(msg.contains("'first' or 'next'"));
    }

    #[test]
    fn test_unsupported_width_display() {
        let err = Error::UnsupportedWidth(3);
        assert_eq!(format!("{}", err), "Unsupported width: 3");
    }

    #[test]
    fn test_backend_helper() {
        let err = Error::backend("process died");
        match err {
            Error::Backend(msg) => assert_eq!(msg, "process died"),
            _ => panic!("Expected Backend error"),
        }
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Internal(_)));
    }
}
