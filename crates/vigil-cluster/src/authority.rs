//! The authority rule (§4.7): which endpoint, if any, currently owns a
//! service, decided from a service's authority patterns, who's connected,
//! and the zone graph.

use std::collections::HashMap;
use std::sync::Arc;

use vigil_registry::Registry;
use vigil_types::{EndpointName, ObjectKey, ZoneName};

use crate::pattern;

/// Whatever can answer "do we have a live connection to this peer right
/// now?" — narrowed to exactly what the authority rule needs so tests
/// don't have to stand up a real `vigil_mesh::Mesh` (TLS certs and all)
/// just to exercise pattern/zone logic.
pub trait PeerConnectivity: Send + Sync {
    fn is_connected(&self, name: &EndpointName) -> bool;
}

impl PeerConnectivity for vigil_mesh::Mesh {
    fn is_connected(&self, name: &EndpointName) -> bool {
        vigil_mesh::Mesh::is_connected(self, name)
    }
}

/// Snapshot of every service's authority pattern list, taken once at
/// startup — `authority` is a Config attribute (§3), never mutated after
/// load, so caching it here lets the oracle answer synchronously instead
/// of taking the service's async lock on every scheduler tick.
pub struct Authority {
    registry: Arc<Registry>,
    connectivity: Arc<dyn PeerConnectivity>,
    self_name: EndpointName,
    patterns: HashMap<ObjectKey, Vec<String>>,
}

impl Authority {
    pub fn new(
        registry: Arc<Registry>,
        connectivity: Arc<dyn PeerConnectivity>,
        self_name: EndpointName,
        patterns: HashMap<ObjectKey, Vec<String>>,
    ) -> Self {
        Self {
            registry,
            connectivity,
            self_name,
            patterns,
        }
    }

    /// The first endpoint, in deterministic (sorted-name) order, that
    /// matches the service's authority patterns, is connected (or is
    /// us), and is reachable via the zone graph.
    pub fn authoritative_checker(&self, key: &ObjectKey) -> Option<EndpointName> {
        let patterns = self.patterns.get(key)?;
        let mut names = self.registry.endpoint_names();
        names.sort();

        names.into_iter().find(|name| {
            pattern::matches_any(patterns, &name.0) && self.is_reachable_candidate(name) && self.zone_reachable(name)
        })
    }

    pub fn is_authoritative(&self, key: &ObjectKey) -> bool {
        self.authoritative_checker(key).is_some_and(|name| name == self.self_name)
    }

    fn is_reachable_candidate(&self, name: &EndpointName) -> bool {
        *name == self.self_name || self.connectivity.is_connected(name)
    }

    /// A candidate is reachable if it shares a zone with us, or one
    /// zone's ancestor chain contains the other — the zone tree models
    /// the cluster's relay topology, so two endpoints in unrelated
    /// branches can't see each other's messages. An endpoint in no zone
    /// at all is reachable unconditionally (zones are optional, §3).
    fn zone_reachable(&self, name: &EndpointName) -> bool {
        let Some(self_zone) = self.zone_of(&self.self_name) else {
            return true;
        };
        let Some(candidate_zone) = self.zone_of(name) else {
            return true;
        };
        if self_zone == candidate_zone {
            return true;
        }
        self.ancestors(&self_zone).contains(&candidate_zone) || self.ancestors(&candidate_zone).contains(&self_zone)
    }

    fn zone_of(&self, name: &EndpointName) -> Option<ZoneName> {
        self.registry
            .iter_zones()
            .into_iter()
            .find(|zone| zone.endpoints.contains(name))
            .map(|zone| zone.name.clone())
    }

    fn ancestors(&self, zone: &ZoneName) -> Vec<ZoneName> {
        let mut chain = Vec::new();
        let mut current = self.registry.get_zone(zone);
        while let Some(zone) = current {
            let Some(parent) = zone.parent.clone() else { break };
            chain.push(parent.clone());
            current = self.registry.get_zone(&parent);
        }
        chain
    }
}

impl vigil_checks::AuthorityOracle for Authority {
    fn is_authoritative(&self, key: &ObjectKey) -> bool {
        Authority::is_authoritative(self, key)
    }
}

/// Builds the startup snapshot `Authority::new` needs, reading each
/// service's `authority` field once while the registry is otherwise
/// idle (before C2/C5/C7 start).
pub async fn snapshot_authority_patterns(registry: &Registry) -> HashMap<ObjectKey, Vec<String>> {
    let mut patterns = HashMap::new();
    for handle in registry.iter_services() {
        let service = handle.read().await;
        patterns.insert(service.key(), service.authority.clone());
    }
    patterns
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use vigil_events::Bus;
    use vigil_types::{Endpoint, HostName, Service, ServiceName, Zone};

    struct FakeConnectivity(Mutex<HashSet<EndpointName>>);

    impl FakeConnectivity {
        fn new(connected: &[&str]) -> Arc<Self> {
            Arc::new(Self(Mutex::new(connected.iter().map(|n| EndpointName((*n).to_string())).collect())))
        }
    }

    impl PeerConnectivity for FakeConnectivity {
        fn is_connected(&self, name: &EndpointName) -> bool {
            self.0.lock().unwrap().contains(name)
        }
    }

    fn sample_service(name: &str, authority: Vec<&str>) -> Service {
        Service::new(
            HostName("h1".into()),
            ServiceName(name.into()),
            vec!["/bin/true".into()],
            60.0,
            10.0,
            3,
            authority.into_iter().map(str::to_string).collect(),
        )
    }

    #[tokio::test]
    async fn self_is_authoritative_when_no_other_endpoint_matches() {
        let registry = Arc::new(Registry::new(Bus::new()));
        registry.register_service(sample_service("ping", vec!["*"])).unwrap();
        registry.register_endpoint(Endpoint::new(EndpointName("self".into()))).unwrap();

        let patterns = snapshot_authority_patterns(&registry).await;
        let authority = Authority::new(Arc::clone(&registry), FakeConnectivity::new(&[]), EndpointName("self".into()), patterns);

        let key = ObjectKey::service(HostName("h1".into()), ServiceName("ping".into()));
        assert!(authority.is_authoritative(&key));
    }

    #[tokio::test]
    async fn disconnected_peer_is_skipped_in_favor_of_next_match() {
        let registry = Arc::new(Registry::new(Bus::new()));
        registry.register_service(sample_service("ping", vec!["*"])).unwrap();
        registry.register_endpoint(Endpoint::new(EndpointName("a-peer".into()))).unwrap();
        registry.register_endpoint(Endpoint::new(EndpointName("self".into()))).unwrap();

        let patterns = snapshot_authority_patterns(&registry).await;
        let authority = Authority::new(registry, FakeConnectivity::new(&[]), EndpointName("self".into()), patterns);

        let key = ObjectKey::service(HostName("h1".into()), ServiceName("ping".into()));
        // "a-peer" sorts first but isn't connected and isn't self, so
        // "self" is the next eligible candidate.
        assert_eq!(authority.authoritative_checker(&key), Some(EndpointName("self".into())));
    }

    #[tokio::test]
    async fn connected_peer_before_self_in_sort_order_wins() {
        let registry = Arc::new(Registry::new(Bus::new()));
        registry.register_service(sample_service("ping", vec!["*"])).unwrap();
        registry.register_endpoint(Endpoint::new(EndpointName("a-peer".into()))).unwrap();
        registry.register_endpoint(Endpoint::new(EndpointName("self".into()))).unwrap();

        let patterns = snapshot_authority_patterns(&registry).await;
        let authority = Authority::new(registry, FakeConnectivity::new(&["a-peer"]), EndpointName("self".into()), patterns);

        let key = ObjectKey::service(HostName("h1".into()), ServiceName("ping".into()));
        assert_eq!(authority.authoritative_checker(&key), Some(EndpointName("a-peer".into())));
        assert!(!authority.is_authoritative(&key));
    }

    #[tokio::test]
    async fn pattern_excludes_service_from_authority_list() {
        let registry = Arc::new(Registry::new(Bus::new()));
        registry.register_service(sample_service("ping", vec!["sat-*"])).unwrap();
        registry.register_endpoint(Endpoint::new(EndpointName("self".into()))).unwrap();

        let patterns = snapshot_authority_patterns(&registry).await;
        let authority = Authority::new(registry, FakeConnectivity::new(&[]), EndpointName("self".into()), patterns);

        let key = ObjectKey::service(HostName("h1".into()), ServiceName("ping".into()));
        assert!(authority.authoritative_checker(&key).is_none());
    }

    #[tokio::test]
    async fn unrelated_zone_makes_a_matching_peer_unreachable() {
        let registry = Arc::new(Registry::new(Bus::new()));
        registry.register_service(sample_service("ping", vec!["*"])).unwrap();
        registry.register_endpoint(Endpoint::new(EndpointName("self".into()))).unwrap();
        registry.register_endpoint(Endpoint::new(EndpointName("far-peer".into()))).unwrap();
        let mut self_zone = Zone::new(vigil_types::ZoneName("zone-a".into()));
        self_zone.endpoints.push(EndpointName("self".into()));
        let mut far_zone = Zone::new(vigil_types::ZoneName("zone-b".into()));
        far_zone.endpoints.push(EndpointName("far-peer".into()));
        registry.register_zone(self_zone).unwrap();
        registry.register_zone(far_zone).unwrap();

        let patterns = snapshot_authority_patterns(&registry).await;
        let authority = Authority::new(registry, FakeConnectivity::new(&["far-peer"]), EndpointName("self".into()), patterns);

        let key = ObjectKey::service(HostName("h1".into()), ServiceName("ping".into()));
        // "far-peer" sorts before "self" alphabetically and is
        // connected, but sits in an unrelated zone, so authority falls
        // through to "self".
        assert_eq!(authority.authoritative_checker(&key), Some(EndpointName("self".into())));
    }

    #[tokio::test]
    async fn shared_parent_zone_is_reachable() {
        let registry = Arc::new(Registry::new(Bus::new()));
        registry.register_service(sample_service("ping", vec!["*"])).unwrap();
        registry.register_endpoint(Endpoint::new(EndpointName("self".into()))).unwrap();
        registry.register_endpoint(Endpoint::new(EndpointName("child-peer".into()))).unwrap();

        let mut parent = Zone::new(vigil_types::ZoneName("root".into()));
        parent.endpoints.push(EndpointName("self".into()));
        registry.register_zone(parent).unwrap();

        let mut child = Zone::new(vigil_types::ZoneName("leaf".into()));
        child.endpoints.push(EndpointName("child-peer".into()));
        child.parent = Some(vigil_types::ZoneName("root".into()));
        registry.register_zone(child).unwrap();

        let patterns = snapshot_authority_patterns(&registry).await;
        let authority = Authority::new(registry, FakeConnectivity::new(&["child-peer"]), EndpointName("self".into()), patterns);

        let key = ObjectKey::service(HostName("h1".into()), ServiceName("ping".into()));
        assert_eq!(authority.authoritative_checker(&key), Some(EndpointName("child-peer".into())));
    }
}
