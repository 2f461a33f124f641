//! In-process event bus (C4).
//!
//! Every state-affecting change in the registry is published as an
//! [`Event`] over a fixed set of [`EventKind`]s. Subscribers (the check
//! scheduler, the cluster router, the persistence sweep) each get an
//! independent channel; the subscriber list itself is a copy-on-write
//! snapshot behind an `ArcSwap` so publishing never blocks on a lock
//! (§4.4).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
