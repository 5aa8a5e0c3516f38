//! Instrumentation backend boundary
//!
//! Everything below the session layer is an opaque capability: attach to a
//! process, then read, write and enumerate its memory through the returned
//! handle. The scan state machine and dispatcher are written purely against
//! these traits; `freat-procfs` provides the Linux implementation and
//! [`crate::testing`] an in-memory one.

use freat_common::{MemoryMap, MemoryRegion, ProcessEntry, Result};

/// A live instrumentation capability for one machine.
pub trait Instrumentation: Send + Sync + 'static {
    /// Enumerate running processes in a stable order.
    fn processes(&self) -> Result<Vec<ProcessEntry>>;

    /// Attach to a process by PID.
    ///
    /// Attachment includes whatever companion setup the backend needs (for
    /// an injection-based backend, loading its scanning routine). On error
    /// no resources remain allocated.
    fn attach(&self, pid: u32) -> Result<Box<dyn ProcessHandle>>;
}

/// An exclusive handle to one attached process.
///
/// Handles are owned by exactly one session and released through
/// [`ProcessHandle::detach`].
pub trait ProcessHandle: Send + Sync {
    fn pid(&self) -> u32;

    /// Readable, writable data regions eligible for value scanning.
    fn regions(&self) -> Result<Vec<MemoryRegion>>;

    /// Named mappings for `get_memory_maps` (file-backed executable ranges).
    fn memory_maps(&self) -> Result<Vec<MemoryMap>>;

    /// Read up to `len` bytes at `address`. May return fewer bytes at a
    /// region boundary; an empty read is an error.
    fn read(&self, address: usize, len: usize) -> Result<Vec<u8>>;

    /// Write `data` at `address`.
    fn write(&self, address: usize, data: &[u8]) -> Result<()>;

    /// Release the attachment. Must be idempotent; called at most once by
    /// the session layer, which tolerates (and only logs) failure here.
    fn detach(&self) -> Result<()>;
}
