//! Cluster participants: [`Endpoint`]s grouped into [`Zone`]s.

use std::collections::BTreeSet;

use crate::time::Timestamp;

/// An endpoint's identity is the CN of its X.509 certificate (§3).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct EndpointName(pub String);

impl std::fmt::Display for EndpointName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named participant in the cluster.
///
/// `connected` is derived at runtime by `vigil-mesh` and is not itself
/// persisted; the rest are State attributes replicated via the
/// `SetLogPosition` ack protocol (§4.7).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Endpoint {
    pub name: EndpointName,
    /// `None` for an endpoint we only ever accept inbound connections
    /// from (never dial).
    pub host_port: Option<(String, u16)>,
    pub last_seen: Option<Timestamp>,
    /// Highest `ts` we have acked to this peer.
    pub remote_log_position: Timestamp,
    /// Highest `ts` this peer has acked to us.
    pub local_log_position: Timestamp,
    pub subscriptions: BTreeSet<String>,
    /// Ephemeral: whether the mesh currently has a live connection to
    /// this peer. Never persisted and never replicated.
    #[serde(skip, default)]
    pub connected: bool,
}

impl Endpoint {
    pub fn new(name: EndpointName) -> Self {
        let epoch = Timestamp::from_secs(0.0);
        Self {
            name,
            host_port: None,
            last_seen: None,
            remote_log_position: epoch,
            local_log_position: epoch,
            subscriptions: BTreeSet::new(),
            connected: false,
        }
    }

    #[must_use]
    pub fn dialing(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host_port = Some((host.into(), port));
        self
    }

    pub fn is_outbound(&self) -> bool {
        self.host_port.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct ZoneName(pub String);

/// A named group of endpoints with an optional parent zone; used only by
/// the cluster router for authority decisions (§4.7).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Zone {
    pub name: ZoneName,
    pub endpoints: Vec<EndpointName>,
    pub parent: Option<ZoneName>,
}

impl Zone {
    pub fn new(name: ZoneName) -> Self {
        Self {
            name,
            endpoints: Vec::new(),
            parent: None,
        }
    }
}
