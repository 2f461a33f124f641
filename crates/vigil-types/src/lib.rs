//! Core data model for the Vigil monitoring engine.
//!
//! This crate contains the types shared across every component of the
//! engine: the checkable entities ([`Service`], [`Host`]), the result of
//! running a plugin ([`CheckResult`]), the cluster participants
//! ([`Endpoint`], [`Zone`]), and the wire message shape ([`Message`]).
//!
//! None of these types know how to schedule, connect, or persist
//! themselves — that is the job of `vigil-checks`, `vigil-mesh`, and
//! `vigil-persist` respectively. This crate only defines what the data
//! *is*.

mod check_result;
mod endpoint;
mod host;
mod message;
mod service;
mod time;

pub use check_result::{CheckResult, CheckResultBuilder, PerformanceData};
pub use endpoint::{Endpoint, EndpointName, Zone, ZoneName};
pub use host::{Host, HostName};
pub use message::{Message, MessageError, Method, ServiceRef};
pub use service::{
    Acknowledgement, AcknowledgementType, Comment, CommentId, Downtime, DowntimeId, Service,
    ServiceName, State, StateType,
};
pub use time::Timestamp;

/// Identity of a checkable object: `(host_name, service_name)`.
///
/// A bare host (no service name) uses an empty `service` field; see
/// [`ObjectKey::host`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct ObjectKey {
    pub host: HostName,
    pub service: Option<ServiceName>,
}

impl ObjectKey {
    /// Identity for a host-level object.
    pub fn host(host: HostName) -> Self {
        Self { host, service: None }
    }

    /// Identity for a service on a host.
    pub fn service(host: HostName, service: ServiceName) -> Self {
        Self {
            host,
            service: Some(service),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.service {
            Some(svc) => write!(f, "{}!{}", self.host.0, svc.0),
            None => write!(f, "{}", self.host.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_key_display_matches_icinga_style() {
        let key = ObjectKey::service(HostName("web1".into()), ServiceName("http".into()));
        assert_eq!(key.to_string(), "web1!http");

        let host_key = ObjectKey::host(HostName("web1".into()));
        assert_eq!(host_key.to_string(), "web1");
    }
}
