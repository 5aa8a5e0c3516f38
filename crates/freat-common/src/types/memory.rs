//! Memory-related types

use serde::{Deserialize, Serialize};

/// Memory protection flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protection {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl Protection {
    pub fn new(read: bool, write: bool, execute: bool) -> Self {
        Self {
            read,
            write,
            execute,
        }
    }

    /// Parse a `/proc/<pid>/maps` style permission string such as `rw-p`
    pub fn from_perms(perms: &str) -> Self {
        let mut chars = perms.chars();
        Self {
            read: chars.next() == Some('r'),
            write: chars.next() == Some('w'),
            execute: chars.next() == Some('x'),
        }
    }

    /// Render as a three-character `rwx` string
    pub fn as_str(&self) -> String {
        let mut s = String::with_capacity(3);
        s.push(if self.read { 'r' } else { '-' });
        s.push(if self.write { 'w' } else { '-' });
        s.push(if self.execute { 'x' } else { '-' });
        s
    }
}

/// A region of target process memory, as enumerated by the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRegion {
    pub base: usize,
    pub size: usize,
    pub protection: Protection,
    /// Backing file path, if any
    pub path: Option<String>,
}

impl MemoryRegion {
    pub fn end(&self) -> usize {
        self.base.saturating_add(self.size)
    }
}

/// Wire representation of one `get_memory_maps` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryMap {
    pub name: String,
    pub base_address: String,
    pub protection: String,
}

impl MemoryMap {
    pub fn from_region(region: &MemoryRegion) -> Option<Self> {
        let path = region.path.as_deref()?;
        let name = std::path::Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(path)
            .to_string();
        Some(Self {
            name,
            base_address: format!("0x{:x}", region.base),
            protection: region.protection.as_str(),
        })
    }
}
