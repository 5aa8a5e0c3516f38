//! Freat Core
//!
//! The protocol/session layer of the Freat memory scanning server: the
//! session manager, command dispatcher, iterative scan state machine and
//! timing collector, written against the [`backend`] trait boundary so any
//! instrumentation capability can sit underneath.

pub mod backend;
pub mod dispatch;
pub mod scan;
pub mod session;
pub mod testing;
pub mod timing;

pub use backend::{Instrumentation, ProcessHandle};
pub use dispatch::Dispatcher;
pub use scan::{ScanState, ScanValue};
pub use session::{SessionId, SessionManager};
pub use timing::TimingCollector;
