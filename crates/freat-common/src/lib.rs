//! Freat Common Types
//!
//! Shared wire-protocol definitions, error taxonomy and value encoding
//! helpers used by all Freat components.

pub mod error;
pub mod logging;
pub mod protocol;
pub mod types;

pub use error::{Error, Result};
pub use logging::{init_logging, LogConfig};
pub use protocol::{CommandKind, Response, ScanType, Status, MAX_MESSAGE_SIZE};
pub use types::*;

// Re-export tracing macros for convenience
pub use tracing::{debug, error, info, trace, warn};
