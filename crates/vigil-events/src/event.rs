//! The closed set of events the bus carries.

use vigil_types::{ObjectKey, Timestamp};

/// Every kind of state-affecting change the engine publishes (§4.4). This
/// set is closed by design: a new kind of change gets a new variant here
/// rather than a stringly-typed catch-all, so every subscriber's `match`
/// is exhaustive and the compiler flags the ones that need updating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EventKind {
    NewCheckResult,
    NextCheckChanged,
    NextNotificationChanged,
    ForceNextCheckChanged,
    ForceNextNotificationChanged,
    EnableActiveChecksChanged,
    EnablePassiveChecksChanged,
    EnableNotificationsChanged,
    EnableFlappingChanged,
    CommentAdded,
    CommentRemoved,
    DowntimeAdded,
    DowntimeRemoved,
    AcknowledgementSet,
    AcknowledgementCleared,
    MessageReceived,
}

/// One occurrence of an [`EventKind`] against a specific object.
///
/// `authority` names the endpoint whose write produced this event, or
/// `None` for a purely local change (an active check result, a local
/// operator action). The cluster router (C7) uses this to avoid
/// re-relaying a change back to the peer that originated it.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub object: ObjectKey,
    pub authority: Option<String>,
    pub ts: Timestamp,
    /// The new value, already serialized — the bus doesn't need to know
    /// the shape, only subscribers that care about a given `kind` do.
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(
        kind: EventKind,
        object: ObjectKey,
        authority: Option<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            object,
            authority,
            ts: Timestamp::now(),
            payload,
        }
    }
}
