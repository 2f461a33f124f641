//! Check plugin process execution (C1).
//!
//! Spawns a plugin without a shell, captures its stdout, maps its exit
//! status, and enforces a timeout (SIGTERM, escalating to SIGKILL after a
//! grace period). A [`WorkerPool`] bounds how many plugins run at once.

pub mod error;
pub mod invocation;
pub mod pool;

pub use error::{Error, Result};
pub use invocation::{run, CheckInvocation, CheckOutcome};
pub use pool::WorkerPool;
