//! Registry errors.

use thiserror::Error;
use vigil_types::{EndpointName, HostName, ServiceName, ZoneName};

#[derive(Debug, Error)]
pub enum Error {
    #[error("host {0:?} is already registered")]
    HostExists(HostName),

    #[error("service {host:?}!{service:?} is already registered")]
    ServiceExists {
        host: HostName,
        service: ServiceName,
    },

    #[error("endpoint {0:?} is already registered")]
    EndpointExists(EndpointName),

    #[error("zone {0:?} is already registered")]
    ZoneExists(ZoneName),

    #[error("no host named {0:?}")]
    NoSuchHost(HostName),

    #[error("no service {host:?}!{service:?}")]
    NoSuchService {
        host: HostName,
        service: ServiceName,
    },

    #[error("no endpoint named {0:?}")]
    NoSuchEndpoint(EndpointName),
}

pub type Result<T> = std::result::Result<T, Error>;
