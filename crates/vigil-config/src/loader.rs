//! Configuration loader with multi-source merging.

use crate::{Paths, VigilConfig};
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Configuration loader with builder pattern.
///
/// Sources merge in increasing precedence: built-in defaults, the user
/// config directory's `vigil.toml`, a project-local `vigil.toml` in
/// `with_config_dir`, a gitignored `vigil.local.toml` next to it, then
/// `VIGIL_*` environment variables.
pub struct ConfigLoader {
    config_dir: PathBuf,
    env_prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default config directory (current
    /// dir).
    pub fn new() -> Self {
        Self {
            config_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "VIGIL".to_string(),
        }
    }

    /// Set the directory to look for `vigil.toml` / `vigil.local.toml` in.
    pub fn with_config_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.config_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the environment variable prefix (default: `"VIGIL"`).
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Load configuration from all sources with proper precedence.
    pub fn load(self) -> Result<VigilConfig> {
        let mut builder = config::Config::builder();

        // 1. Built-in defaults.
        let defaults = VigilConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        // 2. User config (~/.config/vigil/vigil.toml, or VIGIL_CONFIG_DIR).
        let paths = Paths::new();
        if let Ok(user_config_dir) = paths.user_config_dir() {
            let user_config_file = Paths::config_file(&user_config_dir);
            if user_config_file.exists() {
                builder = builder.add_source(
                    config::File::from(user_config_file)
                        .required(false)
                        .format(config::FileFormat::Toml),
                );
            }
        }

        // 3. Project config (vigil.toml).
        let config_file = Paths::config_file(&self.config_dir);
        if config_file.exists() {
            builder = builder.add_source(
                config::File::from(config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // 4. Local config (vigil.local.toml, gitignored).
        let local_config_file = Paths::local_config_file(&self.config_dir);
        if local_config_file.exists() {
            builder = builder.add_source(
                config::File::from(local_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // 5. Environment variables (VIGIL_*).
        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build().context("failed to build configuration")?;

        let mut vigil_config: VigilConfig = config
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        vigil_config.resolve_paths(&self.config_dir, &paths)?;

        Ok(vigil_config)
    }

    /// Load configuration or return defaults if not found.
    pub fn load_or_default(self) -> VigilConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_defaults() {
        let temp_dir = tempdir().expect("failed to create temp dir");
        let config = ConfigLoader::new()
            .with_config_dir(temp_dir.path())
            .load()
            .expect("failed to load config");

        assert_eq!(config.checks.worker_pool_size, 16);
        assert!((config.mesh.heartbeat_interval - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_load_project_config() {
        let temp_dir = tempdir().expect("failed to create temp dir");
        let config_dir = temp_dir.path();

        let config_content = r#"
[checks]
worker_pool_size = 64
default_timeout = 30.0

[mesh]
heartbeat_interval = 2.0

[[host]]
name = "web1"

[[host.service]]
name = "http"
check_command = ["/usr/lib/vigil/check_http", "-H", "web1"]
check_interval = 30.0
"#;
        fs::write(Paths::config_file(config_dir), config_content).expect("failed to write config");

        let config = ConfigLoader::new()
            .with_config_dir(config_dir)
            .load()
            .expect("failed to load config");

        assert_eq!(config.checks.worker_pool_size, 64);
        assert!((config.mesh.heartbeat_interval - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.hosts.len(), 1);
        assert_eq!(config.hosts[0].services.len(), 1);
    }

    #[test]
    fn test_local_overrides() {
        let temp_dir = tempdir().expect("failed to create temp dir");
        let config_dir = temp_dir.path();

        fs::write(
            Paths::config_file(config_dir),
            "[checks]\nworker_pool_size = 8\n",
        )
        .expect("failed to write project config");

        fs::write(
            Paths::local_config_file(config_dir),
            "[checks]\nworker_pool_size = 99\n",
        )
        .expect("failed to write local config");

        let config = ConfigLoader::new()
            .with_config_dir(config_dir)
            .load()
            .expect("failed to load config");

        assert_eq!(config.checks.worker_pool_size, 99);
    }

    // Environment-variable precedence (VIGIL_CHECKS_WORKER_POOL_SIZE=4, etc.)
    // is exercised by integration tests rather than here, since the `config`
    // crate reads process environment at build() time and unit tests run
    // concurrently within one process.

    #[test]
    fn test_path_resolution() {
        let temp_dir = tempdir().expect("failed to create temp dir");
        let config_dir = temp_dir.path();

        let config = ConfigLoader::new()
            .with_config_dir(config_dir)
            .load()
            .expect("failed to load config");

        assert!(config.state_dir.is_absolute());
        assert!(config.mesh.cert_dir.is_absolute());
    }
}
