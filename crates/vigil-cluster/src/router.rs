//! C7: the cluster router (§4.7) — relays locally-originated changes to
//! connected peers, applies peer-originated ones, and keeps the replay
//! log's ack protocol moving.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use vigil_checks::state_machine;
use vigil_events::{Event, EventKind};
use vigil_mesh::Mesh;
use vigil_registry::Registry;
use vigil_replay::{LogRecord, ReplayLog};
use vigil_types::{Acknowledgement, CommentId, DowntimeId, EndpointName, Message, Method, ObjectKey, ServiceRef, Timestamp};

use crate::authority::Authority;
use crate::error::Result;

const ACK_INTERVAL: Duration = Duration::from_secs(5);
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);
const CATCH_UP_INTERVAL: Duration = Duration::from_secs(2);

/// Subscribes to the event bus, relays every persistent change outward,
/// and applies every inbound one that clears the authority check.
pub struct Router {
    registry: Arc<Registry>,
    mesh: Arc<Mesh>,
    replay: Arc<ReplayLog>,
    authority: Arc<Authority>,
    /// Highest message `ts` we've applied from each peer — drained into
    /// outbound `SetLogPosition` acks on a timer.
    acked: AsyncMutex<HashMap<EndpointName, Timestamp>>,
}

impl Router {
    pub fn new(registry: Arc<Registry>, mesh: Arc<Mesh>, replay: Arc<ReplayLog>, authority: Arc<Authority>) -> Self {
        Self {
            registry,
            mesh,
            replay,
            authority,
            acked: AsyncMutex::new(HashMap::new()),
        }
    }

    /// Runs the router until `shutdown` is cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut events = self.registry.bus().subscribe();
        let mut ack_ticker = tokio::time::interval(ACK_INTERVAL);
        let mut sweep_ticker = tokio::time::interval(SWEEP_INTERVAL);
        let mut catch_up_ticker = tokio::time::interval(CATCH_UP_INTERVAL);
        let mut caught_up = HashSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("cluster router shutting down");
                    return;
                }
                event = events.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => return,
                    }
                }
                _ = ack_ticker.tick() => self.send_acks().await,
                _ = sweep_ticker.tick() => self.sweep().await,
                _ = catch_up_ticker.tick() => self.catch_up_new_peers(&mut caught_up).await,
            }
        }
    }

    async fn handle_event(&self, event: Event) {
        if event.kind == EventKind::MessageReceived {
            self.apply_inbound(event).await;
        } else {
            self.relay(event).await;
        }
    }

    // ---- outbound: local change -> wire message -------------------------

    async fn relay(&self, event: Event) {
        let Some(method) = event_to_method(&event) else { return };
        let message = Message::new(method).stamped(event.ts);

        if message.method.is_persistent() {
            let record = LogRecord::new(event.ts, event.authority.clone(), message.clone());
            if let Err(err) = self.replay.append(&record) {
                warn!(%err, "failed to append relay log record");
            }
        }

        let origin = event.authority.as_deref();
        for peer in self.mesh.connected_peers() {
            if Some(peer.0.as_str()) == origin {
                continue;
            }
            self.mesh.send(&peer, message.clone());
        }
    }

    // ---- inbound: wire message -> registry write -------------------------

    async fn apply_inbound(&self, event: Event) {
        let Some(sender) = event.authority.clone() else {
            warn!("MessageReceived event with no sender, ignoring");
            return;
        };

        let message: Message = match serde_json::from_value(event.payload.clone()) {
            Ok(message) => message,
            Err(err) => {
                warn!(peer = %sender, %err, "malformed inbound cluster message, ignoring");
                return;
            }
        };

        if let Some(ts) = message.ts {
            if self.is_stale(&sender, ts).await {
                debug!(peer = %sender, "dropping stale inbound cluster message");
                return;
            }
            self.note_applied(&sender, ts).await;
        }

        if let Err(err) = self.apply_method(&sender, message.method).await {
            warn!(peer = %sender, %err, "failed to apply inbound cluster message");
        }
    }

    /// A message is stale once its `ts` no longer exceeds the highest
    /// `ts` we've already applied from this sender (§5, §8): re-applying
    /// it would, e.g., re-run the state machine on a duplicate
    /// `CheckResult` and corrupt `current_attempt`.
    async fn is_stale(&self, sender: &str, ts: Timestamp) -> bool {
        let acked = self.acked.lock().await;
        match acked.get(&EndpointName(sender.to_string())) {
            Some(current) => !ts.is_newer_than(*current),
            None => false,
        }
    }

    async fn note_applied(&self, sender: &str, ts: Timestamp) {
        let mut acked = self.acked.lock().await;
        match acked.get_mut(&EndpointName(sender.to_string())) {
            Some(current) if ts.is_newer_than(*current) => *current = ts,
            Some(_) => {}
            None => {
                acked.insert(EndpointName(sender.to_string()), ts);
            }
        }
    }

    async fn apply_method(&self, sender: &str, method: Method) -> Result<()> {
        let sender_name = EndpointName(sender.to_string());
        let auth = Some(sender.to_string());

        match method {
            Method::HeartBeat | Method::Config { .. } => Ok(()),

            Method::SetLogPosition { log_position } => {
                self.registry
                    .set_endpoint_log_position(&sender_name, None, Some(log_position))
                    .await?;
                Ok(())
            }

            Method::CheckResult { service, check_result } => {
                let key = ObjectKey::service(service.host, service.service);
                if !self.authorized(&sender_name, &key) {
                    return Ok(());
                }
                let Some(handle) = self.registry.get_service(&key) else { return Ok(()) };
                let (old_state, old_state_type, current_attempt, max_check_attempts) = {
                    let service = handle.read().await;
                    (service.state, service.state_type, service.current_attempt, service.max_check_attempts)
                };
                // The wire carries only the raw result, not a precomputed
                // transition: every node re-derives state independently
                // from its own view, the same way a locally-run check does.
                let t = state_machine::transition(old_state, old_state_type, current_attempt, max_check_attempts, &check_result);
                self.registry
                    .set_check_result(&key, check_result, t.state, t.state_type, t.current_attempt, auth)
                    .await?;
                Ok(())
            }

            Method::SetNextCheck { service, next_check } => {
                let key = ObjectKey::service(service.host, service.service);
                if self.authorized(&sender_name, &key) {
                    self.registry.set_next_check(&key, next_check, auth).await?;
                }
                Ok(())
            }

            Method::SetForceNextCheck { service, forced } => {
                let key = ObjectKey::service(service.host, service.service);
                if self.authorized(&sender_name, &key) {
                    self.registry.set_force_next_check(&key, forced, auth).await?;
                }
                Ok(())
            }

            Method::SetNextNotification { service, next_notification } => {
                let key = ObjectKey::service(service.host, service.service);
                if self.authorized(&sender_name, &key) {
                    self.registry.set_next_notification(&key, next_notification, auth).await?;
                }
                Ok(())
            }

            Method::SetForceNextNotification { service, forced } => {
                let key = ObjectKey::service(service.host, service.service);
                if self.authorized(&sender_name, &key) {
                    self.registry.set_force_next_notification(&key, forced, auth).await?;
                }
                Ok(())
            }

            Method::SetEnableActiveChecks { service, enabled } => {
                let key = ObjectKey::service(service.host, service.service);
                if self.authorized(&sender_name, &key) {
                    self.registry.set_enable_active_checks(&key, enabled, auth).await?;
                }
                Ok(())
            }

            Method::SetEnablePassiveChecks { service, enabled } => {
                let key = ObjectKey::service(service.host, service.service);
                if self.authorized(&sender_name, &key) {
                    self.registry.set_enable_passive_checks(&key, enabled, auth).await?;
                }
                Ok(())
            }

            Method::SetEnableNotifications { service, enabled } => {
                let key = ObjectKey::service(service.host, service.service);
                if self.authorized(&sender_name, &key) {
                    self.registry.set_enable_notifications(&key, enabled, auth).await?;
                }
                Ok(())
            }

            Method::SetEnableFlapping { service, enabled } => {
                let key = ObjectKey::service(service.host, service.service);
                if self.authorized(&sender_name, &key) {
                    self.registry.set_enable_flapping(&key, enabled, auth).await?;
                }
                Ok(())
            }

            Method::AddComment { service, comment } => {
                let key = ObjectKey::service(service.host, service.service);
                if self.authorized(&sender_name, &key) {
                    self.registry.add_comment(&key, comment, auth).await?;
                }
                Ok(())
            }

            Method::RemoveComment { service, id } => {
                let key = ObjectKey::service(service.host, service.service);
                if self.authorized(&sender_name, &key) {
                    self.registry.remove_comment(&key, CommentId(id), auth).await?;
                }
                Ok(())
            }

            Method::AddDowntime { service, downtime } => {
                let key = ObjectKey::service(service.host, service.service);
                if self.authorized(&sender_name, &key) {
                    self.registry.add_downtime(&key, downtime, auth).await?;
                }
                Ok(())
            }

            Method::RemoveDowntime { service, id } => {
                let key = ObjectKey::service(service.host, service.service);
                if self.authorized(&sender_name, &key) {
                    self.registry.remove_downtime(&key, DowntimeId(id), auth).await?;
                }
                Ok(())
            }

            Method::SetAcknowledgement { service, author, comment, kind, expiry } => {
                let key = ObjectKey::service(service.host, service.service);
                if self.authorized(&sender_name, &key) {
                    let ack = Acknowledgement { author, comment, kind, expiry };
                    self.registry.set_acknowledgement(&key, ack, auth).await?;
                }
                Ok(())
            }

            Method::ClearAcknowledgement { service } => {
                let key = ObjectKey::service(service.host, service.service);
                if self.authorized(&sender_name, &key) {
                    self.registry.clear_acknowledgement(&key, auth).await?;
                }
                Ok(())
            }
        }
    }

    /// A sender may write an object only if it's the authoritative
    /// checker for it — otherwise the message is a stale peer's and is
    /// dropped rather than errored (§4.7).
    fn authorized(&self, sender: &EndpointName, key: &ObjectKey) -> bool {
        self.authority.authoritative_checker(key).as_ref() == Some(sender)
    }

    // ---- ack protocol and log maintenance --------------------------------

    async fn send_acks(&self) {
        let snapshot: Vec<(EndpointName, Timestamp)> = {
            let acked = self.acked.lock().await;
            acked.iter().map(|(name, ts)| (name.clone(), *ts)).collect()
        };

        for (peer, ts) in snapshot {
            if !self.mesh.is_connected(&peer) {
                continue;
            }
            let message = Message::new(Method::SetLogPosition { log_position: ts }).stamped(Timestamp::now());
            if self.mesh.send(&peer, message) {
                if let Err(err) = self.registry.set_endpoint_log_position(&peer, Some(ts), None).await {
                    warn!(peer = %peer, %err, "failed to record sent ack");
                }
            }
        }
    }

    /// Truncates the replay log to what every peer has already
    /// acknowledged — the minimum `local_log_position` across every
    /// known endpoint (§4.6, §4.7).
    async fn sweep(&self) {
        let mut min: Option<f64> = None;
        for handle in self.registry.iter_endpoints() {
            let secs = handle.read().await.local_log_position.as_secs();
            min = Some(min.map_or(secs, |current: f64| current.min(secs)));
        }
        let Some(min) = min else { return };
        match self.replay.sweep(Timestamp::from_secs(min)) {
            Ok(_) => {}
            Err(err) => warn!(%err, "failed to sweep replay log"),
        }
    }

    /// Brings a freshly (re)connected peer up to date: rotates the log so
    /// replay never races the writer, then streams every record since
    /// what that peer last acked.
    async fn catch_up_new_peers(&self, caught_up: &mut HashSet<EndpointName>) {
        let connected: HashSet<EndpointName> = self.mesh.connected_peers().into_iter().collect();
        caught_up.retain(|name| connected.contains(name));

        for name in &connected {
            if caught_up.contains(name) {
                continue;
            }
            self.catch_up_peer(name).await;
            caught_up.insert(name.clone());
        }
    }

    async fn catch_up_peer(&self, name: &EndpointName) {
        if let Err(err) = self.replay.rotate() {
            warn!(peer = %name, %err, "failed to rotate replay log before catch-up");
        }
        let Some(handle) = self.registry.get_endpoint(name) else { return };
        let since = handle.read().await.local_log_position;
        for record in self.replay.stream_since(since, &name.0) {
            self.mesh.send(name, record.message);
        }
    }
}

fn service_ref(key: &ObjectKey) -> Option<ServiceRef> {
    Some(ServiceRef {
        host: key.host.clone(),
        service: key.service.clone()?,
    })
}

/// Event -> wire message mapping (§4.7). `None` means "nothing to
/// relay" — either the event carries no service (a purely local
/// endpoint-bookkeeping change) or it's the inbound-apply marker, which
/// is handled separately in [`Router::handle_event`].
fn event_to_method(event: &Event) -> Option<Method> {
    let service = service_ref(&event.object)?;
    let payload = &event.payload;

    let method = match event.kind {
        EventKind::MessageReceived => return None,

        EventKind::NewCheckResult => Method::CheckResult {
            service,
            check_result: serde_json::from_value(payload.get("check_result")?.clone()).ok()?,
        },
        EventKind::NextCheckChanged => Method::SetNextCheck {
            service,
            next_check: serde_json::from_value(payload.get("next_check")?.clone()).ok()?,
        },
        EventKind::ForceNextCheckChanged => Method::SetForceNextCheck {
            service,
            forced: payload.get("forced")?.as_bool()?,
        },
        EventKind::NextNotificationChanged => Method::SetNextNotification {
            service,
            next_notification: serde_json::from_value(payload.get("next_notification")?.clone()).ok()?,
        },
        EventKind::ForceNextNotificationChanged => Method::SetForceNextNotification {
            service,
            forced: payload.get("forced")?.as_bool()?,
        },
        EventKind::EnableActiveChecksChanged => Method::SetEnableActiveChecks {
            service,
            enabled: payload.get("enabled")?.as_bool()?,
        },
        EventKind::EnablePassiveChecksChanged => Method::SetEnablePassiveChecks {
            service,
            enabled: payload.get("enabled")?.as_bool()?,
        },
        EventKind::EnableNotificationsChanged => Method::SetEnableNotifications {
            service,
            enabled: payload.get("enabled")?.as_bool()?,
        },
        EventKind::EnableFlappingChanged => Method::SetEnableFlapping {
            service,
            enabled: payload.get("enabled")?.as_bool()?,
        },
        EventKind::CommentAdded => Method::AddComment {
            service,
            comment: serde_json::from_value(payload.get("comment")?.clone()).ok()?,
        },
        EventKind::CommentRemoved => Method::RemoveComment {
            service,
            id: payload.get("id")?.as_u64()?,
        },
        EventKind::DowntimeAdded => Method::AddDowntime {
            service,
            downtime: serde_json::from_value(payload.get("downtime")?.clone()).ok()?,
        },
        EventKind::DowntimeRemoved => Method::RemoveDowntime {
            service,
            id: payload.get("id")?.as_u64()?,
        },
        EventKind::AcknowledgementSet => {
            let ack: Acknowledgement = serde_json::from_value(payload.get("acknowledgement")?.clone()).ok()?;
            Method::SetAcknowledgement {
                service,
                author: ack.author,
                comment: ack.comment,
                kind: ack.kind,
                expiry: ack.expiry,
            }
        }
        EventKind::AcknowledgementCleared => Method::ClearAcknowledgement { service },
    };

    Some(method)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_types::{HostName, ServiceName, State, StateType};

    fn check_result_event(host: &str, service: &str) -> Event {
        let now = Timestamp::now();
        let result = vigil_types::CheckResult::from_plugin_output(now, now, now, now, 0, "OK");
        Event::new(
            EventKind::NewCheckResult,
            ObjectKey::service(HostName(host.into()), ServiceName(service.into())),
            None,
            serde_json::json!({
                "check_result": result,
                "state": State::Ok,
                "state_type": StateType::Hard,
                "current_attempt": 1,
            }),
        )
    }

    #[test]
    fn new_check_result_maps_to_check_result_method() {
        let event = check_result_event("h1", "ping");
        let method = event_to_method(&event).expect("mappable event");
        assert!(matches!(method, Method::CheckResult { .. }));
        assert_eq!(method.name(), "cluster::CheckResult");
    }

    #[test]
    fn host_only_event_has_no_wire_mapping() {
        let event = Event::new(
            EventKind::NewCheckResult,
            ObjectKey::host(HostName("endpoint:peer-a".into())),
            None,
            serde_json::json!({}),
        );
        assert!(event_to_method(&event).is_none());
    }

    #[test]
    fn message_received_is_never_relayed() {
        let event = Event::new(
            EventKind::MessageReceived,
            ObjectKey::host(HostName("endpoint:peer-a".into())),
            Some("peer-a".into()),
            serde_json::json!({}),
        );
        assert!(event_to_method(&event).is_none());
    }

    #[test]
    fn acknowledgement_set_carries_every_field() {
        let ack = Acknowledgement {
            author: "ops".into(),
            comment: "known issue".into(),
            kind: vigil_types::AcknowledgementType::Sticky,
            expiry: None,
        };
        let event = Event::new(
            EventKind::AcknowledgementSet,
            ObjectKey::service(HostName("h1".into()), ServiceName("ping".into())),
            Some("peer-a".into()),
            serde_json::json!({ "acknowledgement": ack }),
        );
        let method = event_to_method(&event).expect("mappable event");
        match method {
            Method::SetAcknowledgement { author, comment, .. } => {
                assert_eq!(author, "ops");
                assert_eq!(comment, "known issue");
            }
            other => panic!("unexpected method: {other:?}"),
        }
    }
}
