//! Wire protocol types
//!
//! Requests are JSON objects carrying a `command` field plus command-specific
//! parameters; every request produces exactly one [`Response`]. Messages are
//! framed on the wire with a 4-byte little-endian length prefix.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Maximum framed message size (16MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// The closed set of commands a client can issue.
///
/// Dispatch is an exhaustive match over this enum, so adding a command is a
/// compile-time-checked addition rather than a stringly-typed branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Attach,
    Detach,
    ScanMemory,
    ReadMemory,
    WriteMemory,
    GetMemoryMaps,
    GetScanResults,
    GetProcesses,
    GetTimingStats,
}

impl CommandKind {
    /// Parse a wire command name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "attach" => Some(Self::Attach),
            "detach" => Some(Self::Detach),
            "scan_memory" => Some(Self::ScanMemory),
            "read_memory" => Some(Self::ReadMemory),
            "write_memory" => Some(Self::WriteMemory),
            "get_memory_maps" => Some(Self::GetMemoryMaps),
            "get_scan_results" => Some(Self::GetScanResults),
            "get_processes" => Some(Self::GetProcesses),
            "get_timing_stats" => Some(Self::GetTimingStats),
            _ => None,
        }
    }

    /// Wire name of the command
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Attach => "attach",
            Self::Detach => "detach",
            Self::ScanMemory => "scan_memory",
            Self::ReadMemory => "read_memory",
            Self::WriteMemory => "write_memory",
            Self::GetMemoryMaps => "get_memory_maps",
            Self::GetScanResults => "get_scan_results",
            Self::GetProcesses => "get_processes",
            Self::GetTimingStats => "get_timing_stats",
        }
    }
}

/// Whether a scan establishes a fresh candidate set or narrows the current one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanType {
    First,
    Next,
}

impl ScanType {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "first" => Ok(Self::First),
            "next" => Ok(Self::Next),
            other => Err(Error::InvalidScanType(other.to_string())),
        }
    }
}

/// Response status discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// One response per request.
///
/// Success responses carry either a `result` payload or a human-readable
/// `message` depending on the command; error responses carry `error`. The
/// originating command name is echoed for client correlation, and is null
/// only for requests that could not be parsed at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub command: Option<String>,
}

impl Response {
    /// Success response with a `result` payload
    pub fn result(command: CommandKind, result: serde_json::Value) -> Self {
        Self {
            status: Status::Success,
            result: Some(result),
            message: None,
            error: None,
            command: Some(command.as_str().to_string()),
        }
    }

    /// Success response with a `message` (attach/detach/write_memory)
    pub fn message(command: CommandKind, message: impl Into<String>) -> Self {
        Self {
            status: Status::Success,
            result: None,
            message: Some(message.into()),
            error: None,
            command: Some(command.as_str().to_string()),
        }
    }

    /// Error response echoing the command name when one was recognisable
    pub fn failure(command: Option<&str>, error: &Error) -> Self {
        Self {
            status: Status::Error,
            result: None,
            message: None,
            error: Some(error.to_string()),
            command: command.map(str::to_string),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}
