//! Shared data types

pub mod memory;
pub mod process;
pub mod scan;

pub use memory::{MemoryMap, MemoryRegion, Protection};
pub use process::{AttachTarget, ProcessEntry};
pub use scan::{ScanHit, ScanResultsPage, ValueWidth};
