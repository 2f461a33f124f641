//! The wire/disk shape of a State attribute, used by persistence (C9)
//! and by the cluster router's inbound-apply dispatch (C7).

use vigil_types::ObjectKey;

/// One `(object, attribute, value)` triple. Kept attribute-at-a-time
/// (rather than dumping the whole object) so `vigil-persist` can skip an
/// individual attribute it no longer recognizes without losing the rest
/// of the object (§4.9, forward/backward compatibility).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StateRecord {
    pub object: ObjectKey,
    pub attribute: String,
    pub value: serde_json::Value,
}
