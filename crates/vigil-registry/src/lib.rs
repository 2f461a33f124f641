//! Typed object registry (C8).
//!
//! Every [`Host`], [`Service`], [`Endpoint`], and [`Zone`] lives in the
//! registry under a `(type, name)` identity. Attributes fall into three
//! kinds (§4.8):
//!
//! * **Config** — set once at load, never mutated at runtime.
//! * **State** — mutated at runtime, persisted (C9), replicated (C7).
//!   Every write to a State attribute publishes an event on the
//!   [`vigil_events::Bus`].
//! * **Ephemeral** — derived on read (e.g. a host's reachability), never
//!   stored or replicated.
//!
//! Each object carries its own lock so a long-held read (e.g. while
//! serializing a `CheckResult` over the wire) never blocks an unrelated
//! object's scheduler tick.

mod error;
mod registry;
mod state;

pub use error::{Error, Result};
pub use registry::Registry;
