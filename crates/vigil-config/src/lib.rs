//! Configuration loading for the Vigil monitoring engine.
//!
//! Hierarchical configuration loading from multiple sources, in increasing
//! precedence:
//! 1. Built-in defaults (lowest precedence)
//! 2. `~/.config/vigil/vigil.toml` (user defaults)
//! 3. `vigil.toml` (git-tracked, declares hosts/services/endpoints/zones)
//! 4. `vigil.local.toml` (gitignored, local overrides)
//! 5. `VIGIL_*` environment variables (highest precedence)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Top-level Vigil configuration: ambient settings plus the declared
/// monitoring topology (§3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VigilConfig {
    /// Directory the replay log and `state.dat` live under.
    pub state_dir: PathBuf,

    pub checks: CheckConfig,
    pub mesh: MeshConfig,
    pub replay: ReplayConfig,

    #[serde(rename = "host")]
    pub hosts: Vec<HostDef>,
    #[serde(rename = "endpoint")]
    pub endpoints: Vec<EndpointDef>,
    #[serde(rename = "zone")]
    pub zones: Vec<ZoneDef>,
}

impl Default for VigilConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".vigil/state"),
            checks: CheckConfig::default(),
            mesh: MeshConfig::default(),
            replay: ReplayConfig::default(),
            hosts: Vec::new(),
            endpoints: Vec::new(),
            zones: Vec::new(),
        }
    }
}

/// C1/C2: process runner and scheduler defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
    /// Upper bound on concurrently-running check processes (§4.1).
    pub worker_pool_size: u32,
    /// Fallback timeout, in seconds, for checks that don't declare one.
    pub default_timeout: f64,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 16,
            default_timeout: 60.0,
        }
    }
}

/// C5: endpoint connection / mTLS mesh defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Directory holding `ca.pem`, `cert.pem`, `key.pem`.
    pub cert_dir: PathBuf,
    /// Local address to accept inbound endpoint connections on.
    pub bind_address: String,
    pub heartbeat_interval: f64,
    pub heartbeat_timeout: f64,
    pub reconnect_interval: f64,
    /// Largest netstring frame accepted from a peer, in bytes (§4.6).
    pub max_frame_bytes: usize,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            cert_dir: PathBuf::from(".vigil/certs"),
            bind_address: "0.0.0.0:5665".to_string(),
            heartbeat_interval: 5.0,
            heartbeat_timeout: 60.0,
            reconnect_interval: 5.0,
            max_frame_bytes: 16 * 1024 * 1024,
        }
    }
}

/// C6: replay log defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Records per segment file before rotation (§4.6).
    pub max_records_per_file: u64,
    /// How often the truncation sweep runs, in seconds.
    pub sweep_interval: f64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            max_records_per_file: 50_000,
            sweep_interval: 60.0,
        }
    }
}

/// A `[[host]]` table: a host plus its nested `[[host.service]]` entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostDef {
    pub name: String,
    #[serde(default)]
    pub reachability_services: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, rename = "service")]
    pub services: Vec<ServiceDef>,
}

/// A `[[host.service]]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDef {
    pub name: String,
    pub check_command: Vec<String>,
    #[serde(default = "default_check_interval")]
    pub check_interval: f64,
    #[serde(default = "default_retry_interval")]
    pub retry_interval: f64,
    #[serde(default = "default_max_check_attempts")]
    pub max_check_attempts: u32,
    /// Endpoint-name patterns in priority order (§4.7). Defaults to
    /// `["*"]`, i.e. any endpoint may claim authority.
    #[serde(default = "default_authority")]
    pub authority: Vec<String>,
}

fn default_check_interval() -> f64 {
    60.0
}
fn default_retry_interval() -> f64 {
    10.0
}
fn default_max_check_attempts() -> u32 {
    3
}
fn default_authority() -> Vec<String> {
    vec!["*".to_string()]
}

/// A `[[endpoint]]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointDef {
    pub name: String,
    /// Present only for endpoints we dial; absent for inbound-only peers.
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// A `[[zone]]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneDef {
    pub name: String,
    #[serde(default)]
    pub endpoints: Vec<String>,
    pub parent: Option<String>,
}

impl VigilConfig {
    /// Load configuration from the current directory.
    pub fn load() -> anyhow::Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration looking for `vigil.toml` in a specific directory.
    pub fn load_from_dir(config_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        ConfigLoader::new().with_config_dir(config_dir).load()
    }

    /// Resolves relative paths against `base_dir`, falling back to XDG
    /// state/cert directories when the setting was left at its built-in
    /// relative default.
    fn resolve_paths(&mut self, base_dir: impl AsRef<Path>, paths: &Paths) -> Result<(), ConfigError> {
        let base = base_dir.as_ref();

        if self.state_dir == PathBuf::from(".vigil/state") {
            if let Ok(xdg_state) = paths.state_dir() {
                self.state_dir = xdg_state;
            }
        }
        if self.state_dir.is_relative() {
            self.state_dir = base.join(&self.state_dir);
        }

        if self.mesh.cert_dir == PathBuf::from(".vigil/certs") {
            if let Ok(xdg_certs) = paths.cert_dir() {
                self.mesh.cert_dir = xdg_certs;
            }
        }
        if self.mesh.cert_dir.is_relative() {
            self.mesh.cert_dir = base.join(&self.mesh.cert_dir);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = VigilConfig::default();
        assert_eq!(config.checks.worker_pool_size, 16);
        assert_eq!(config.replay.max_records_per_file, 50_000);
        assert!(config.hosts.is_empty());
    }

    #[test]
    fn test_path_resolution() {
        let mut config = VigilConfig::default();
        let paths = Paths::new();
        config
            .resolve_paths("/home/user/project", &paths)
            .unwrap();
        assert!(config.state_dir.is_absolute());
        assert!(config.mesh.cert_dir.is_absolute());
    }

    #[test]
    fn test_service_def_defaults() {
        let toml_src = r#"
            name = "http"
            check_command = ["/usr/lib/vigil/check_http"]
        "#;
        let svc: ServiceDef = toml::from_str(toml_src).unwrap();
        assert_eq!(svc.check_interval, 60.0);
        assert_eq!(svc.max_check_attempts, 3);
        assert_eq!(svc.authority, vec!["*".to_string()]);
    }
}
