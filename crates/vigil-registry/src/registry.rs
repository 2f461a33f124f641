//! The registry itself: four typed stores plus the mutation helpers that
//! keep State-attribute writes and event publication atomic with each
//! other from a caller's point of view.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock as SyncRwLock;
use tokio::sync::RwLock as AsyncRwLock;

use vigil_events::{Bus, Event, EventKind};
use vigil_types::{
    Acknowledgement, Comment, CommentId, Downtime, DowntimeId, Endpoint, EndpointName, Host,
    HostName, ObjectKey, Service, ServiceName, State, StateType, Timestamp, Zone, ZoneName,
};

use crate::error::{Error, Result};
use crate::state::StateRecord;

/// Config-attribute-only objects never need an async lock: nothing
/// mutates them after registration, so a plain `Arc` suffices.
type ConfigStore<K, V> = SyncRwLock<HashMap<K, Arc<V>>>;
/// Objects with State attributes get a `tokio::sync::RwLock` per object
/// so a handler can hold the lock across an `.await` (e.g. while
/// serializing a `CheckResult` for the replay log).
type StateStore<K, V> = SyncRwLock<HashMap<K, Arc<AsyncRwLock<V>>>>;

pub struct Registry {
    hosts: ConfigStore<HostName, Host>,
    services: StateStore<ObjectKey, Service>,
    endpoints: StateStore<EndpointName, Endpoint>,
    zones: ConfigStore<ZoneName, Zone>,
    bus: Bus,
}

impl Registry {
    pub fn new(bus: Bus) -> Self {
        Self {
            hosts: SyncRwLock::new(HashMap::new()),
            services: SyncRwLock::new(HashMap::new()),
            endpoints: SyncRwLock::new(HashMap::new()),
            zones: SyncRwLock::new(HashMap::new()),
            bus,
        }
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    // ---- registration (Config attributes, set once at load) ----------

    pub fn register_host(&self, host: Host) -> Result<()> {
        let mut hosts = self.hosts.write();
        if hosts.contains_key(&host.name) {
            return Err(Error::HostExists(host.name));
        }
        hosts.insert(host.name.clone(), Arc::new(host));
        Ok(())
    }

    pub fn register_service(&self, service: Service) -> Result<()> {
        let key = service.key();
        let mut services = self.services.write();
        if services.contains_key(&key) {
            return Err(Error::ServiceExists {
                host: service.host_name,
                service: service.service_name,
            });
        }
        services.insert(key, Arc::new(AsyncRwLock::new(service)));
        Ok(())
    }

    pub fn register_endpoint(&self, endpoint: Endpoint) -> Result<()> {
        let mut endpoints = self.endpoints.write();
        if endpoints.contains_key(&endpoint.name) {
            return Err(Error::EndpointExists(endpoint.name));
        }
        endpoints.insert(endpoint.name.clone(), Arc::new(AsyncRwLock::new(endpoint)));
        Ok(())
    }

    pub fn register_zone(&self, zone: Zone) -> Result<()> {
        let mut zones = self.zones.write();
        if zones.contains_key(&zone.name) {
            return Err(Error::ZoneExists(zone.name));
        }
        zones.insert(zone.name.clone(), Arc::new(zone));
        Ok(())
    }

    // ---- lookup / iteration --------------------------------------------

    pub fn get_host(&self, name: &HostName) -> Option<Arc<Host>> {
        self.hosts.read().get(name).cloned()
    }

    pub fn get_service(&self, key: &ObjectKey) -> Option<Arc<AsyncRwLock<Service>>> {
        self.services.read().get(key).cloned()
    }

    pub fn get_endpoint(&self, name: &EndpointName) -> Option<Arc<AsyncRwLock<Endpoint>>> {
        self.endpoints.read().get(name).cloned()
    }

    pub fn get_zone(&self, name: &ZoneName) -> Option<Arc<Zone>> {
        self.zones.read().get(name).cloned()
    }

    pub fn iter_hosts(&self) -> Vec<Arc<Host>> {
        self.hosts.read().values().cloned().collect()
    }

    pub fn iter_services(&self) -> Vec<Arc<AsyncRwLock<Service>>> {
        self.services.read().values().cloned().collect()
    }

    pub fn iter_endpoints(&self) -> Vec<Arc<AsyncRwLock<Endpoint>>> {
        self.endpoints.read().values().cloned().collect()
    }

    pub fn iter_zones(&self) -> Vec<Arc<Zone>> {
        self.zones.read().values().cloned().collect()
    }

    /// Every registered endpoint's identity, with no lock held on any
    /// individual endpoint — used by the cluster router's authority rule,
    /// which needs a synchronous candidate list (§4.7).
    pub fn endpoint_names(&self) -> Vec<EndpointName> {
        self.endpoints.read().keys().cloned().collect()
    }

    // ---- State-attribute mutations, each publishing its event ---------
    //
    // Every method below: takes the service lock, mutates exactly the
    // attribute(s) named in its `EventKind`, releases the lock, then
    // publishes. `authority` is the endpoint name that originated the
    // change, or `None` for a local write (§4.4, §4.7).

    pub async fn set_check_result(
        &self,
        key: &ObjectKey,
        result: vigil_types::CheckResult,
        state: State,
        state_type: StateType,
        current_attempt: u32,
        authority: Option<String>,
    ) -> Result<()> {
        let handle = self.require_service(key)?;
        {
            let mut service = handle.write().await;
            service.state = state;
            service.state_type = state_type;
            service.current_attempt = current_attempt;
            service.last_check_result = Some(result.clone());
        }
        self.bus.publish(Event::new(
            EventKind::NewCheckResult,
            key.clone(),
            authority,
            serde_json::json!({
                "check_result": result,
                "state": state,
                "state_type": state_type,
                "current_attempt": current_attempt,
            }),
        ));
        Ok(())
    }

    pub async fn set_next_check(
        &self,
        key: &ObjectKey,
        next_check: Timestamp,
        authority: Option<String>,
    ) -> Result<()> {
        let handle = self.require_service(key)?;
        handle.write().await.next_check = next_check;
        self.bus.publish(Event::new(
            EventKind::NextCheckChanged,
            key.clone(),
            authority,
            serde_json::json!({ "next_check": next_check }),
        ));
        Ok(())
    }

    pub async fn set_force_next_check(
        &self,
        key: &ObjectKey,
        forced: bool,
        authority: Option<String>,
    ) -> Result<()> {
        let handle = self.require_service(key)?;
        handle.write().await.force_next_check = forced;
        self.bus.publish(Event::new(
            EventKind::ForceNextCheckChanged,
            key.clone(),
            authority,
            serde_json::json!({ "forced": forced }),
        ));
        Ok(())
    }

    pub async fn set_next_notification(
        &self,
        key: &ObjectKey,
        next_notification: Timestamp,
        authority: Option<String>,
    ) -> Result<()> {
        let handle = self.require_service(key)?;
        handle.write().await.next_notification = next_notification;
        self.bus.publish(Event::new(
            EventKind::NextNotificationChanged,
            key.clone(),
            authority,
            serde_json::json!({ "next_notification": next_notification }),
        ));
        Ok(())
    }

    pub async fn set_force_next_notification(
        &self,
        key: &ObjectKey,
        forced: bool,
        authority: Option<String>,
    ) -> Result<()> {
        let handle = self.require_service(key)?;
        handle.write().await.force_next_notification = forced;
        self.bus.publish(Event::new(
            EventKind::ForceNextNotificationChanged,
            key.clone(),
            authority,
            serde_json::json!({ "forced": forced }),
        ));
        Ok(())
    }

    pub async fn set_enable_active_checks(
        &self,
        key: &ObjectKey,
        enabled: bool,
        authority: Option<String>,
    ) -> Result<()> {
        let handle = self.require_service(key)?;
        handle.write().await.enable_active_checks = enabled;
        self.bus.publish(Event::new(
            EventKind::EnableActiveChecksChanged,
            key.clone(),
            authority,
            serde_json::json!({ "enabled": enabled }),
        ));
        Ok(())
    }

    pub async fn set_enable_passive_checks(
        &self,
        key: &ObjectKey,
        enabled: bool,
        authority: Option<String>,
    ) -> Result<()> {
        let handle = self.require_service(key)?;
        handle.write().await.enable_passive_checks = enabled;
        self.bus.publish(Event::new(
            EventKind::EnablePassiveChecksChanged,
            key.clone(),
            authority,
            serde_json::json!({ "enabled": enabled }),
        ));
        Ok(())
    }

    pub async fn set_enable_notifications(
        &self,
        key: &ObjectKey,
        enabled: bool,
        authority: Option<String>,
    ) -> Result<()> {
        let handle = self.require_service(key)?;
        handle.write().await.enable_notifications = enabled;
        self.bus.publish(Event::new(
            EventKind::EnableNotificationsChanged,
            key.clone(),
            authority,
            serde_json::json!({ "enabled": enabled }),
        ));
        Ok(())
    }

    pub async fn set_enable_flapping(
        &self,
        key: &ObjectKey,
        enabled: bool,
        authority: Option<String>,
    ) -> Result<()> {
        let handle = self.require_service(key)?;
        handle.write().await.enable_flapping = enabled;
        self.bus.publish(Event::new(
            EventKind::EnableFlappingChanged,
            key.clone(),
            authority,
            serde_json::json!({ "enabled": enabled }),
        ));
        Ok(())
    }

    pub async fn add_comment(
        &self,
        key: &ObjectKey,
        comment: Comment,
        authority: Option<String>,
    ) -> Result<()> {
        let handle = self.require_service(key)?;
        handle.write().await.comments.push(comment.clone());
        self.bus.publish(Event::new(
            EventKind::CommentAdded,
            key.clone(),
            authority,
            serde_json::json!({ "comment": comment }),
        ));
        Ok(())
    }

    pub async fn remove_comment(
        &self,
        key: &ObjectKey,
        id: CommentId,
        authority: Option<String>,
    ) -> Result<()> {
        let handle = self.require_service(key)?;
        handle.write().await.comments.retain(|c| c.id != id);
        self.bus.publish(Event::new(
            EventKind::CommentRemoved,
            key.clone(),
            authority,
            serde_json::json!({ "id": id }),
        ));
        Ok(())
    }

    pub async fn add_downtime(
        &self,
        key: &ObjectKey,
        downtime: Downtime,
        authority: Option<String>,
    ) -> Result<()> {
        let handle = self.require_service(key)?;
        handle.write().await.downtimes.push(downtime.clone());
        self.bus.publish(Event::new(
            EventKind::DowntimeAdded,
            key.clone(),
            authority,
            serde_json::json!({ "downtime": downtime }),
        ));
        Ok(())
    }

    pub async fn remove_downtime(
        &self,
        key: &ObjectKey,
        id: DowntimeId,
        authority: Option<String>,
    ) -> Result<()> {
        let handle = self.require_service(key)?;
        handle.write().await.downtimes.retain(|d| d.id != id);
        self.bus.publish(Event::new(
            EventKind::DowntimeRemoved,
            key.clone(),
            authority,
            serde_json::json!({ "id": id }),
        ));
        Ok(())
    }

    pub async fn set_acknowledgement(
        &self,
        key: &ObjectKey,
        ack: Acknowledgement,
        authority: Option<String>,
    ) -> Result<()> {
        let handle = self.require_service(key)?;
        handle.write().await.acknowledgement = Some(ack.clone());
        self.bus.publish(Event::new(
            EventKind::AcknowledgementSet,
            key.clone(),
            authority,
            serde_json::json!({ "acknowledgement": ack }),
        ));
        Ok(())
    }

    pub async fn clear_acknowledgement(
        &self,
        key: &ObjectKey,
        authority: Option<String>,
    ) -> Result<()> {
        let handle = self.require_service(key)?;
        handle.write().await.acknowledgement = None;
        self.bus.publish(Event::new(
            EventKind::AcknowledgementCleared,
            key.clone(),
            authority,
            serde_json::json!({}),
        ));
        Ok(())
    }

    /// Endpoint log-position bookkeeping (§4.7's ack protocol). Not part
    /// of the closed `EventKind` set — the cluster router reads the
    /// registry directly rather than subscribing to it.
    pub async fn set_endpoint_log_position(
        &self,
        name: &EndpointName,
        remote_log_position: Option<Timestamp>,
        local_log_position: Option<Timestamp>,
    ) -> Result<()> {
        let handle = self
            .endpoints
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NoSuchEndpoint(name.clone()))?;
        let mut endpoint = handle.write().await;
        if let Some(remote) = remote_log_position {
            endpoint.remote_log_position = remote;
        }
        if let Some(local) = local_log_position {
            endpoint.local_log_position = local;
        }
        Ok(())
    }

    pub async fn set_endpoint_last_seen(
        &self,
        name: &EndpointName,
        last_seen: Timestamp,
    ) -> Result<()> {
        let handle = self
            .endpoints
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NoSuchEndpoint(name.clone()))?;
        handle.write().await.last_seen = Some(last_seen);
        Ok(())
    }

    /// Ephemeral, not replicated or persisted — see [`Endpoint::connected`].
    pub async fn set_endpoint_connected(&self, name: &EndpointName, connected: bool) -> Result<()> {
        let handle = self
            .endpoints
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NoSuchEndpoint(name.clone()))?;
        handle.write().await.connected = connected;
        Ok(())
    }

    fn require_service(&self, key: &ObjectKey) -> Result<Arc<AsyncRwLock<Service>>> {
        self.services
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NoSuchService {
                host: key.host.clone(),
                service: key
                    .service
                    .clone()
                    .unwrap_or_else(|| ServiceName(String::new())),
            })
    }

    // ---- persistence (C9) -----------------------------------------------

    /// Dumps every Service and Endpoint State attribute as flat
    /// `(object, attribute, value)` records, in a stable order so
    /// `state.dat` diffs sanely between runs.
    pub async fn snapshot_state(&self) -> Vec<StateRecord> {
        let mut records = Vec::new();

        let mut services: Vec<_> = self.services.read().iter().map(|(k, v)| (k.clone(), Arc::clone(v))).collect();
        services.sort_by(|(a, _), (b, _)| a.to_string().cmp(&b.to_string()));
        for (key, handle) in services {
            let service = handle.read().await;
            push_service_state(&mut records, &key, &service);
        }

        let mut endpoints: Vec<_> = self.endpoints.read().iter().map(|(k, v)| (k.clone(), Arc::clone(v))).collect();
        endpoints.sort_by(|(a, _), (b, _)| a.0.cmp(&b.0));
        for (name, handle) in endpoints {
            let endpoint = handle.read().await;
            let key = ObjectKey::host(HostName(format!("endpoint:{}", name.0)));
            push_endpoint_state(&mut records, &key, &endpoint);
        }

        records
    }

    /// Applies one restored record. Unknown objects and unknown
    /// attribute names are skipped rather than erroring (§4.9).
    pub async fn restore_state_record(&self, record: StateRecord) {
        if let Some(name) = record
            .object
            .to_string()
            .strip_prefix("endpoint:")
            .map(str::to_string)
        {
            if let Some(handle) = self.endpoints.read().get(&EndpointName(name)).cloned() {
                apply_endpoint_attribute(&mut *handle.write().await, &record);
            }
            return;
        }

        if let Some(handle) = self.services.read().get(&record.object).cloned() {
            apply_service_attribute(&mut *handle.write().await, &record);
        }
    }
}

fn push_service_state(records: &mut Vec<StateRecord>, key: &ObjectKey, service: &Service) {
    macro_rules! rec {
        ($attr:literal, $value:expr) => {
            records.push(StateRecord {
                object: key.clone(),
                attribute: $attr.to_string(),
                value: serde_json::to_value($value).unwrap_or(serde_json::Value::Null),
            })
        };
    }
    rec!("state", service.state);
    rec!("state_type", service.state_type);
    rec!("current_attempt", service.current_attempt);
    rec!("next_check", service.next_check);
    rec!("force_next_check", service.force_next_check);
    rec!("next_notification", service.next_notification);
    rec!("force_next_notification", service.force_next_notification);
    rec!("last_check_result", &service.last_check_result);
    rec!("last_state_change", service.last_state_change);
    rec!("last_hard_state_change", service.last_hard_state_change);
    rec!("enable_active_checks", service.enable_active_checks);
    rec!("enable_passive_checks", service.enable_passive_checks);
    rec!("enable_notifications", service.enable_notifications);
    rec!("enable_flapping", service.enable_flapping);
    rec!("acknowledgement", &service.acknowledgement);
    rec!("comments", &service.comments);
    rec!("downtimes", &service.downtimes);
}

fn push_endpoint_state(records: &mut Vec<StateRecord>, key: &ObjectKey, endpoint: &Endpoint) {
    macro_rules! rec {
        ($attr:literal, $value:expr) => {
            records.push(StateRecord {
                object: key.clone(),
                attribute: $attr.to_string(),
                value: serde_json::to_value($value).unwrap_or(serde_json::Value::Null),
            })
        };
    }
    rec!("last_seen", endpoint.last_seen);
    rec!("remote_log_position", endpoint.remote_log_position);
    rec!("local_log_position", endpoint.local_log_position);
}

fn apply_service_attribute(service: &mut Service, record: &StateRecord) {
    macro_rules! apply {
        ($field:expr) => {
            if let Ok(value) = serde_json::from_value(record.value.clone()) {
                $field = value;
            }
        };
    }
    match record.attribute.as_str() {
        "state" => apply!(service.state),
        "state_type" => apply!(service.state_type),
        "current_attempt" => apply!(service.current_attempt),
        "next_check" => apply!(service.next_check),
        "force_next_check" => apply!(service.force_next_check),
        "next_notification" => apply!(service.next_notification),
        "force_next_notification" => apply!(service.force_next_notification),
        "last_check_result" => apply!(service.last_check_result),
        "last_state_change" => apply!(service.last_state_change),
        "last_hard_state_change" => apply!(service.last_hard_state_change),
        "enable_active_checks" => apply!(service.enable_active_checks),
        "enable_passive_checks" => apply!(service.enable_passive_checks),
        "enable_notifications" => apply!(service.enable_notifications),
        "enable_flapping" => apply!(service.enable_flapping),
        "acknowledgement" => apply!(service.acknowledgement),
        "comments" => apply!(service.comments),
        "downtimes" => apply!(service.downtimes),
        _ => {} // forward-compat: unknown attribute, skip.
    }
}

fn apply_endpoint_attribute(endpoint: &mut Endpoint, record: &StateRecord) {
    macro_rules! apply {
        ($field:expr) => {
            if let Ok(value) = serde_json::from_value(record.value.clone()) {
                $field = value;
            }
        };
    }
    match record.attribute.as_str() {
        "last_seen" => apply!(endpoint.last_seen),
        "remote_log_position" => apply!(endpoint.remote_log_position),
        "local_log_position" => apply!(endpoint.local_log_position),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_types::ServiceName;

    fn sample_service() -> Service {
        Service::new(
            HostName("h1".into()),
            ServiceName("ping".into()),
            vec!["/bin/true".into()],
            60.0,
            10.0,
            3,
            vec!["*".into()],
        )
    }

    #[tokio::test]
    async fn register_and_fetch_service() {
        let registry = Registry::new(Bus::new());
        registry.register_service(sample_service()).unwrap();
        let key = ObjectKey::service(HostName("h1".into()), ServiceName("ping".into()));
        assert!(registry.get_service(&key).is_some());
    }

    #[tokio::test]
    async fn duplicate_registration_fails() {
        let registry = Registry::new(Bus::new());
        registry.register_service(sample_service()).unwrap();
        let err = registry.register_service(sample_service()).unwrap_err();
        assert!(matches!(err, Error::ServiceExists { .. }));
    }

    #[tokio::test]
    async fn set_next_check_publishes_event() {
        let bus = Bus::new();
        let mut rx = bus.subscribe();
        let registry = Registry::new(bus);
        registry.register_service(sample_service()).unwrap();
        let key = ObjectKey::service(HostName("h1".into()), ServiceName("ping".into()));

        registry
            .set_next_check(&key, Timestamp::from_secs(123.0), None)
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::NextCheckChanged);

        let handle = registry.get_service(&key).unwrap();
        assert_eq!(handle.read().await.next_check, Timestamp::from_secs(123.0));
    }

    #[tokio::test]
    async fn snapshot_and_restore_round_trips() {
        let registry = Registry::new(Bus::new());
        registry.register_service(sample_service()).unwrap();
        let key = ObjectKey::service(HostName("h1".into()), ServiceName("ping".into()));
        registry
            .set_next_check(&key, Timestamp::from_secs(77.0), None)
            .await
            .unwrap();

        let records = registry.snapshot_state().await;
        assert!(records.iter().any(|r| r.attribute == "next_check"));

        let other = Registry::new(Bus::new());
        other.register_service(sample_service()).unwrap();
        for record in records {
            other.restore_state_record(record).await;
        }
        let handle = other.get_service(&key).unwrap();
        assert_eq!(handle.read().await.next_check, Timestamp::from_secs(77.0));
    }

    #[tokio::test]
    async fn restore_skips_unknown_object() {
        let registry = Registry::new(Bus::new());
        let bogus_key = ObjectKey::service(HostName("ghost".into()), ServiceName("x".into()));
        registry
            .restore_state_record(StateRecord {
                object: bogus_key,
                attribute: "next_check".to_string(),
                value: serde_json::json!(1.0),
            })
            .await;
        // No panic, nothing registered: success is simply not crashing.
    }
}
