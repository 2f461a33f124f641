//! The [`Service`] entity and its state-machine-adjacent value types.
//!
//! This module defines the *shape* of a service; the transition rules that
//! push one `State`/`StateType`/attempt combination to the next live in
//! `vigil-checks` (C3), which is the only thing allowed to mutate them.

use crate::check_result::CheckResult;
use crate::host::HostName;
use crate::time::Timestamp;

/// A service's observed health, derived from the exit status of its check
/// plugin (§3, exit→state mapping).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum State {
    Ok,
    Warning,
    Critical,
    Unknown,
}

/// Whether a non-OK `State` has been confirmed by `max_check_attempts`
/// consecutive failures (`Hard`) or is still within its retry window
/// (`Soft`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum StateType {
    Soft,
    Hard,
}

/// Newtype for a service's name, distinct from its host's name so the two
/// can't be swapped at a call site.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct ServiceName(pub String);

impl std::fmt::Display for ServiceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Acknowledgement kind: whether it auto-clears on the next OK (`Normal`)
/// or must be cleared explicitly (`Sticky`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AcknowledgementType {
    None,
    Normal,
    Sticky,
}

/// An operator's acknowledgement of a non-OK state.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Acknowledgement {
    pub author: String,
    pub comment: String,
    pub kind: AcknowledgementType,
    /// `None` means the acknowledgement never expires on its own.
    pub expiry: Option<Timestamp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct CommentId(pub u64);

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub author: String,
    pub text: String,
    pub created: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct DowntimeId(pub u64);

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Downtime {
    pub id: DowntimeId,
    pub author: String,
    pub comment: String,
    pub start: Timestamp,
    pub end: Timestamp,
    pub fixed: bool,
}

/// The central checkable entity: `(host_name, service_name)` plus
/// immutable config attributes and mutable, replicated, persisted state
/// attributes (§3).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Service {
    // Identity
    pub host_name: HostName,
    pub service_name: ServiceName,

    // Config attributes — set once at load, never mutated at runtime.
    pub check_command: Vec<String>,
    pub check_interval: f64,
    pub retry_interval: f64,
    pub max_check_attempts: u32,
    /// Endpoint name patterns, in priority order; see the authority rule
    /// in §4.7.
    pub authority: Vec<String>,

    // State attributes — mutable, replicated, persisted.
    pub state: State,
    pub state_type: StateType,
    pub current_attempt: u32,
    pub next_check: Timestamp,
    pub force_next_check: bool,
    /// Next notification time. Nothing in this core dispatches
    /// notifications, but the attribute is still part of the replicated
    /// state so a peer running the full notification subsystem stays in
    /// sync (§1, notification dispatcher is a non-goal, not the field).
    pub next_notification: Timestamp,
    pub force_next_notification: bool,
    pub last_check_result: Option<CheckResult>,
    pub last_state_change: Timestamp,
    pub last_hard_state_change: Timestamp,
    pub enable_active_checks: bool,
    pub enable_passive_checks: bool,
    pub enable_notifications: bool,
    pub enable_flapping: bool,
    pub acknowledgement: Option<Acknowledgement>,
    pub comments: Vec<Comment>,
    pub downtimes: Vec<Downtime>,
}

impl Service {
    /// Creates a freshly-configured service with no check history yet.
    ///
    /// `next_check` is left at `now` — the scheduler randomizes an unseen
    /// service's first `next_check` within `[now, now + check_interval)`
    /// per §4.2, so callers should not rely on this value directly.
    pub fn new(
        host_name: HostName,
        service_name: ServiceName,
        check_command: Vec<String>,
        check_interval: f64,
        retry_interval: f64,
        max_check_attempts: u32,
        authority: Vec<String>,
    ) -> Self {
        let now = Timestamp::now();
        Self {
            host_name,
            service_name,
            check_command,
            check_interval,
            retry_interval,
            max_check_attempts,
            authority,
            state: State::Ok,
            state_type: StateType::Hard,
            current_attempt: 1,
            next_check: now,
            force_next_check: false,
            next_notification: now,
            force_next_notification: false,
            last_check_result: None,
            last_state_change: now,
            last_hard_state_change: now,
            enable_active_checks: true,
            enable_passive_checks: true,
            enable_notifications: true,
            enable_flapping: true,
            acknowledgement: None,
            comments: Vec::new(),
            downtimes: Vec::new(),
        }
    }

    pub fn key(&self) -> crate::ObjectKey {
        crate::ObjectKey::service(self.host_name.clone(), self.service_name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_service_starts_ok_hard_attempt_one() {
        let svc = Service::new(
            HostName("h1".into()),
            ServiceName("ping".into()),
            vec!["/usr/lib/vigil/check_ping".into()],
            60.0,
            10.0,
            3,
            vec!["*".into()],
        );
        assert_eq!(svc.state, State::Ok);
        assert_eq!(svc.state_type, StateType::Hard);
        assert_eq!(svc.current_attempt, 1);
    }
}
