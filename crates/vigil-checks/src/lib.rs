//! Check scheduling (C2) and state-machine evaluation (C3).

pub mod error;
pub mod scheduler;
pub mod state_machine;

pub use error::{Error, Result};
pub use scheduler::{AlwaysAuthoritative, AuthorityOracle, Scheduler};
