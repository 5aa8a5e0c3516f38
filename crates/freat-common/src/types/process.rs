//! Process enumeration and attach targets

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// One `get_processes` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
}

/// How an `attach` request identifies the target process.
///
/// Integers and all-digit strings are PIDs, anything else is a process name
/// to be resolved through backend enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachTarget {
    Pid(u32),
    Name(String),
}

impl AttachTarget {
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        if let Some(pid) = value.as_u64() {
            let pid = u32::try_from(pid).map_err(|_| Error::InvalidField("target"))?;
            return Ok(Self::Pid(pid));
        }
        if let Some(s) = value.as_str() {
            if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
                let pid = s.parse().map_err(|_| Error::InvalidField("target"))?;
                return Ok(Self::Pid(pid));
            }
            if !s.is_empty() {
                return Ok(Self::Name(s.to_string()));
            }
        }
        Err(Error::InvalidField("target"))
    }
}

impl std::fmt::Display for AttachTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pid(pid) => write!(f, "{}", pid),
            Self::Name(name) => write!(f, "{}", name),
        }
    }
}
