//! The cluster wire message: a `{jsonrpc, method, params, ts}` envelope
//! over a closed set of `cluster::` methods (§6).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::check_result::CheckResult;
use crate::service::{AcknowledgementType, Comment, Downtime};
use crate::time::Timestamp;
use crate::{HostName, ServiceName};

const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("malformed message envelope: {0}")]
    Malformed(String),
    #[error("unknown method: {0}")]
    UnknownMethod(String),
    #[error("invalid params for {method}: {source}")]
    InvalidParams {
        method: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// A fully-qualified check identity as it appears in message params.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRef {
    pub host: HostName,
    pub service: ServiceName,
}

/// One member of the closed method set in §6. Each variant's payload is
/// exactly that method's `params` object.
#[derive(Debug, Clone, PartialEq)]
pub enum Method {
    HeartBeat,
    CheckResult {
        service: ServiceRef,
        check_result: CheckResult,
    },
    SetNextCheck {
        service: ServiceRef,
        next_check: Timestamp,
    },
    SetForceNextCheck {
        service: ServiceRef,
        forced: bool,
    },
    SetNextNotification {
        service: ServiceRef,
        next_notification: Timestamp,
    },
    SetForceNextNotification {
        service: ServiceRef,
        forced: bool,
    },
    SetEnableActiveChecks {
        service: ServiceRef,
        enabled: bool,
    },
    SetEnablePassiveChecks {
        service: ServiceRef,
        enabled: bool,
    },
    SetEnableNotifications {
        service: ServiceRef,
        enabled: bool,
    },
    SetEnableFlapping {
        service: ServiceRef,
        enabled: bool,
    },
    AddComment {
        service: ServiceRef,
        comment: Comment,
    },
    RemoveComment {
        service: ServiceRef,
        id: u64,
    },
    AddDowntime {
        service: ServiceRef,
        downtime: Downtime,
    },
    RemoveDowntime {
        service: ServiceRef,
        id: u64,
    },
    SetAcknowledgement {
        service: ServiceRef,
        author: String,
        comment: String,
        kind: AcknowledgementType,
        expiry: Option<Timestamp>,
    },
    ClearAcknowledgement {
        service: ServiceRef,
    },
    SetLogPosition {
        log_position: Timestamp,
    },
    /// Carried for completeness of the closed method set; the config
    /// distribution protocol itself is out of scope for this core (§1).
    Config {
        identity: String,
        config_files: std::collections::BTreeMap<String, Value>,
    },
}

impl Method {
    /// The `method` string as it appears on the wire, e.g.
    /// `"cluster::CheckResult"`.
    pub fn name(&self) -> &'static str {
        match self {
            Method::HeartBeat => "cluster::HeartBeat",
            Method::CheckResult { .. } => "cluster::CheckResult",
            Method::SetNextCheck { .. } => "cluster::SetNextCheck",
            Method::SetForceNextCheck { .. } => "cluster::SetForceNextCheck",
            Method::SetNextNotification { .. } => "cluster::SetNextNotification",
            Method::SetForceNextNotification { .. } => "cluster::SetForceNextNotification",
            Method::SetEnableActiveChecks { .. } => "cluster::SetEnableActiveChecks",
            Method::SetEnablePassiveChecks { .. } => "cluster::SetEnablePassiveChecks",
            Method::SetEnableNotifications { .. } => "cluster::SetEnableNotifications",
            Method::SetEnableFlapping { .. } => "cluster::SetEnableFlapping",
            Method::AddComment { .. } => "cluster::AddComment",
            Method::RemoveComment { .. } => "cluster::RemoveComment",
            Method::AddDowntime { .. } => "cluster::AddDowntime",
            Method::RemoveDowntime { .. } => "cluster::RemoveDowntime",
            Method::SetAcknowledgement { .. } => "cluster::SetAcknowledgement",
            Method::ClearAcknowledgement { .. } => "cluster::ClearAcknowledgement",
            Method::SetLogPosition { .. } => "cluster::SetLogPosition",
            Method::Config { .. } => "cluster::Config",
        }
    }

    /// Whether this method is replayed from the log on reconnect.
    /// Heartbeats are transient and are never logged (§4.7, "Relay").
    pub fn is_persistent(&self) -> bool {
        !matches!(self, Method::HeartBeat)
    }

    fn params(&self) -> Value {
        match self {
            Method::HeartBeat => Value::Null,
            other => serde_json::to_value(ParamsView(other)).unwrap_or(Value::Null),
        }
    }
}

/// Private helper so `Method`'s by-variant params can be serialized with
/// `#[derive(Serialize)]` machinery instead of hand-building a `Value` per
/// arm.
struct ParamsView<'a>(&'a Method);

impl Serialize for ParamsView<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(None)?;
        match self.0 {
            Method::HeartBeat => {}
            Method::CheckResult { service, check_result } => {
                map.serialize_entry("service", service)?;
                map.serialize_entry("check_result", check_result)?;
            }
            Method::SetNextCheck { service, next_check } => {
                map.serialize_entry("service", service)?;
                map.serialize_entry("next_check", next_check)?;
            }
            Method::SetNextNotification {
                service,
                next_notification,
            } => {
                map.serialize_entry("service", service)?;
                map.serialize_entry("next_notification", next_notification)?;
            }
            Method::SetForceNextCheck { service, forced }
            | Method::SetForceNextNotification { service, forced } => {
                map.serialize_entry("service", service)?;
                map.serialize_entry("forced", forced)?;
            }
            Method::SetEnableActiveChecks { service, enabled }
            | Method::SetEnablePassiveChecks { service, enabled }
            | Method::SetEnableNotifications { service, enabled }
            | Method::SetEnableFlapping { service, enabled } => {
                map.serialize_entry("service", service)?;
                map.serialize_entry("enabled", enabled)?;
            }
            Method::AddComment { service, comment } => {
                map.serialize_entry("service", service)?;
                map.serialize_entry("comment", comment)?;
            }
            Method::RemoveComment { service, id } | Method::RemoveDowntime { service, id } => {
                map.serialize_entry("service", service)?;
                map.serialize_entry("id", id)?;
            }
            Method::AddDowntime { service, downtime } => {
                map.serialize_entry("service", service)?;
                map.serialize_entry("downtime", downtime)?;
            }
            Method::SetAcknowledgement {
                service,
                author,
                comment,
                kind,
                expiry,
            } => {
                map.serialize_entry("service", service)?;
                map.serialize_entry("author", author)?;
                map.serialize_entry("comment", comment)?;
                map.serialize_entry("type", kind)?;
                map.serialize_entry("expiry", expiry)?;
            }
            Method::ClearAcknowledgement { service } => {
                map.serialize_entry("service", service)?;
            }
            Method::SetLogPosition { log_position } => {
                map.serialize_entry("log_position", log_position)?;
            }
            Method::Config { identity, config_files } => {
                map.serialize_entry("identity", identity)?;
                map.serialize_entry("config_files", config_files)?;
            }
        }
        map.end()
    }
}

/// A full cluster message: the envelope plus its typed method.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub ts: Option<Timestamp>,
    pub method: Method,
}

impl Message {
    pub fn new(method: Method) -> Self {
        Self { ts: None, method }
    }

    #[must_use]
    pub fn stamped(mut self, ts: Timestamp) -> Self {
        self.ts = Some(ts);
        self
    }
}

#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    jsonrpc: String,
    method: String,
    #[serde(default)]
    params: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    ts: Option<Timestamp>,
}

impl Serialize for Message {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let envelope = WireEnvelope {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: self.method.name().to_string(),
            params: self.method.params(),
            ts: self.ts,
        };
        envelope.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let envelope = WireEnvelope::deserialize(deserializer)?;
        let method = decode_method(&envelope.method, envelope.params)
            .map_err(serde::de::Error::custom)?;
        Ok(Message { ts: envelope.ts, method })
    }
}

fn decode_method(name: &str, params: Value) -> Result<Method, MessageError> {
    macro_rules! parse {
        ($variant_name:expr) => {
            serde_json::from_value(params).map_err(|source| MessageError::InvalidParams {
                method: $variant_name,
                source,
            })
        };
    }

    Ok(match name {
        "cluster::HeartBeat" => Method::HeartBeat,
        "cluster::CheckResult" => {
            #[derive(Deserialize)]
            struct P {
                service: ServiceRef,
                check_result: CheckResult,
            }
            let p: P = parse!("cluster::CheckResult")?;
            Method::CheckResult {
                service: p.service,
                check_result: p.check_result,
            }
        }
        "cluster::SetNextCheck" => {
            #[derive(Deserialize)]
            struct P {
                service: ServiceRef,
                next_check: Timestamp,
            }
            let p: P = parse!("cluster::SetNextCheck")?;
            Method::SetNextCheck {
                service: p.service,
                next_check: p.next_check,
            }
        }
        "cluster::SetForceNextCheck" => {
            #[derive(Deserialize)]
            struct P {
                service: ServiceRef,
                forced: bool,
            }
            let p: P = parse!("cluster::SetForceNextCheck")?;
            Method::SetForceNextCheck {
                service: p.service,
                forced: p.forced,
            }
        }
        "cluster::SetNextNotification" => {
            #[derive(Deserialize)]
            struct P {
                service: ServiceRef,
                next_notification: Timestamp,
            }
            let p: P = parse!("cluster::SetNextNotification")?;
            Method::SetNextNotification {
                service: p.service,
                next_notification: p.next_notification,
            }
        }
        "cluster::SetForceNextNotification" => {
            #[derive(Deserialize)]
            struct P {
                service: ServiceRef,
                forced: bool,
            }
            let p: P = parse!("cluster::SetForceNextNotification")?;
            Method::SetForceNextNotification {
                service: p.service,
                forced: p.forced,
            }
        }
        "cluster::SetEnableActiveChecks" => {
            let p: EnabledParams = parse!("cluster::SetEnableActiveChecks")?;
            Method::SetEnableActiveChecks {
                service: p.service,
                enabled: p.enabled,
            }
        }
        "cluster::SetEnablePassiveChecks" => {
            let p: EnabledParams = parse!("cluster::SetEnablePassiveChecks")?;
            Method::SetEnablePassiveChecks {
                service: p.service,
                enabled: p.enabled,
            }
        }
        "cluster::SetEnableNotifications" => {
            let p: EnabledParams = parse!("cluster::SetEnableNotifications")?;
            Method::SetEnableNotifications {
                service: p.service,
                enabled: p.enabled,
            }
        }
        "cluster::SetEnableFlapping" => {
            let p: EnabledParams = parse!("cluster::SetEnableFlapping")?;
            Method::SetEnableFlapping {
                service: p.service,
                enabled: p.enabled,
            }
        }
        "cluster::AddComment" => {
            #[derive(Deserialize)]
            struct P {
                service: ServiceRef,
                comment: Comment,
            }
            let p: P = parse!("cluster::AddComment")?;
            Method::AddComment {
                service: p.service,
                comment: p.comment,
            }
        }
        "cluster::RemoveComment" => {
            let p: IdParams = parse!("cluster::RemoveComment")?;
            Method::RemoveComment {
                service: p.service,
                id: p.id,
            }
        }
        "cluster::AddDowntime" => {
            #[derive(Deserialize)]
            struct P {
                service: ServiceRef,
                downtime: Downtime,
            }
            let p: P = parse!("cluster::AddDowntime")?;
            Method::AddDowntime {
                service: p.service,
                downtime: p.downtime,
            }
        }
        "cluster::RemoveDowntime" => {
            let p: IdParams = parse!("cluster::RemoveDowntime")?;
            Method::RemoveDowntime {
                service: p.service,
                id: p.id,
            }
        }
        "cluster::SetAcknowledgement" => {
            #[derive(Deserialize)]
            struct P {
                service: ServiceRef,
                author: String,
                comment: String,
                #[serde(rename = "type")]
                kind: AcknowledgementType,
                expiry: Option<Timestamp>,
            }
            let p: P = parse!("cluster::SetAcknowledgement")?;
            Method::SetAcknowledgement {
                service: p.service,
                author: p.author,
                comment: p.comment,
                kind: p.kind,
                expiry: p.expiry,
            }
        }
        "cluster::ClearAcknowledgement" => {
            #[derive(Deserialize)]
            struct P {
                service: ServiceRef,
            }
            let p: P = parse!("cluster::ClearAcknowledgement")?;
            Method::ClearAcknowledgement { service: p.service }
        }
        "cluster::SetLogPosition" => {
            #[derive(Deserialize)]
            struct P {
                log_position: Timestamp,
            }
            let p: P = parse!("cluster::SetLogPosition")?;
            Method::SetLogPosition {
                log_position: p.log_position,
            }
        }
        "cluster::Config" => {
            #[derive(Deserialize)]
            struct P {
                identity: String,
                config_files: std::collections::BTreeMap<String, Value>,
            }
            let p: P = parse!("cluster::Config")?;
            Method::Config {
                identity: p.identity,
                config_files: p.config_files,
            }
        }
        other => return Err(MessageError::UnknownMethod(other.to_string())),
    })
}

#[derive(Deserialize)]
struct EnabledParams {
    service: ServiceRef,
    enabled: bool,
}

#[derive(Deserialize)]
struct IdParams {
    service: ServiceRef,
    id: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn svc() -> ServiceRef {
        ServiceRef {
            host: HostName("h1".into()),
            service: ServiceName("ping".into()),
        }
    }

    #[test]
    fn heartbeat_round_trips() {
        let msg = Message::new(Method::HeartBeat).stamped(Timestamp::from_secs(5.0));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"cluster::HeartBeat\""));
        let decoded: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn set_log_position_round_trips() {
        let msg = Message::new(Method::SetLogPosition {
            log_position: Timestamp::from_secs(42.0),
        });
        let json = serde_json::to_string(&msg).unwrap();
        let decoded: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn set_acknowledgement_round_trips() {
        let msg = Message::new(Method::SetAcknowledgement {
            service: svc(),
            author: "ops".into(),
            comment: "known issue".into(),
            kind: AcknowledgementType::Sticky,
            expiry: None,
        });
        let json = serde_json::to_string(&msg).unwrap();
        let decoded: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn set_next_notification_round_trips() {
        let msg = Message::new(Method::SetNextNotification {
            service: svc(),
            next_notification: Timestamp::from_secs(100.0),
        });
        let json = serde_json::to_string(&msg).unwrap();
        let decoded: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn unknown_method_is_rejected() {
        let json = r#"{"jsonrpc":"2.0","method":"cluster::Bogus","params":{}}"#;
        let err = serde_json::from_str::<Message>(json).unwrap_err();
        assert!(err.to_string().contains("unknown method"));
    }

    #[test]
    fn heartbeat_is_not_persistent() {
        assert!(!Method::HeartBeat.is_persistent());
        assert!(Method::SetLogPosition { log_position: Timestamp::from_secs(1.0) }.is_persistent());
    }
}
