//! C7: the cluster router — authority decisions, event relay, and
//! inbound message application (§4.7).

mod authority;
mod error;
mod pattern;
mod router;

pub use authority::{snapshot_authority_patterns, Authority, PeerConnectivity};
pub use error::{ClusterError, Result};
pub use router::Router;
