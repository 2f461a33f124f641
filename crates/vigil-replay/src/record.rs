//! The replay log's record shape: `{ts, except, message}` (§4.6, §6).

use serde::{Deserialize, Serialize};
use vigil_types::{Message, Timestamp};

/// One relayed message, as it sits in the log.
///
/// `except` names the endpoint the message must not be re-sent to on
/// replay (the peer it originated from, or the local node for a
/// self-originated change) — see the relay rule in §4.7.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub ts: Timestamp,
    pub except: Option<String>,
    pub message: Message,
}

impl LogRecord {
    pub fn new(ts: Timestamp, except: Option<String>, message: Message) -> Self {
        Self { ts, except, message }
    }
}
