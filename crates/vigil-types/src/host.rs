//! The [`Host`] entity: a container for services plus a dependency set.

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct HostName(pub String);

impl std::fmt::Display for HostName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A host groups services and declares which of its own services (or
/// other hosts) it depends on. "Up"/"reachable" are derived by evaluating
/// `reachability_services` — never stored (§3).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Host {
    pub name: HostName,
    /// Names of this host's own services whose state determines whether
    /// the host itself is considered reachable.
    pub reachability_services: Vec<crate::ServiceName>,
    /// Other hosts this host depends on; if any is unreachable, so is
    /// this one (evaluated recursively by the caller, not stored here).
    pub depends_on: Vec<HostName>,
}

impl Host {
    pub fn new(name: HostName) -> Self {
        Self {
            name,
            reachability_services: Vec::new(),
            depends_on: Vec::new(),
        }
    }
}
