//! Path utilities and XDG directory discovery

use crate::ConfigError;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// XDG-compliant paths for Vigil.
pub struct Paths {
    project_dirs: Option<ProjectDirs>,
}

impl Paths {
    /// Create a new Paths instance with XDG discovery.
    pub fn new() -> Self {
        Self {
            project_dirs: ProjectDirs::from("dev", "Vigil", "vigil"),
        }
    }

    /// User config directory (`~/.config/vigil/`), overridable by
    /// `VIGIL_CONFIG_DIR`.
    pub fn user_config_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Ok(dir) = std::env::var("VIGIL_CONFIG_DIR") {
            return Ok(PathBuf::from(dir));
        }
        self.project_dirs
            .as_ref()
            .map(|p| p.config_dir().to_path_buf())
            .ok_or_else(|| {
                ConfigError::XdgError("failed to determine user config directory".to_string())
            })
    }

    /// State directory (replay log, `state.dat`), overridable by
    /// `VIGIL_STATE_DIR`. Defaults to `~/.local/state/vigil/`.
    pub fn state_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Ok(dir) = std::env::var("VIGIL_STATE_DIR") {
            return Ok(PathBuf::from(dir));
        }
        self.project_dirs
            .as_ref()
            .map(|p| p.data_local_dir().to_path_buf())
            .ok_or_else(|| {
                ConfigError::XdgError("failed to determine state directory".to_string())
            })
    }

    /// Directory holding the mesh's TLS material (CA cert, node cert and
    /// key), overridable by `VIGIL_CERT_DIR`. Defaults to a `certs/`
    /// subdirectory of the config directory.
    pub fn cert_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Ok(dir) = std::env::var("VIGIL_CERT_DIR") {
            return Ok(PathBuf::from(dir));
        }
        Ok(self.user_config_dir()?.join("certs"))
    }

    /// Main config file path (`vigil.toml`) under a given directory.
    pub fn config_file(config_dir: impl AsRef<Path>) -> PathBuf {
        config_dir.as_ref().join("vigil.toml")
    }

    /// Local override config file path (`vigil.local.toml`), meant to be
    /// gitignored.
    pub fn local_config_file(config_dir: impl AsRef<Path>) -> PathBuf {
        config_dir.as_ref().join("vigil.local.toml")
    }

    /// Whether a directory holds a `vigil.toml`.
    pub fn is_initialized(config_dir: impl AsRef<Path>) -> bool {
        Self::config_file(config_dir).exists()
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_xdg_paths() {
        let paths = Paths::new();

        if let Ok(config_dir) = paths.user_config_dir() {
            assert!(config_dir.to_string_lossy().contains("vigil"));
        }
    }

    #[test]
    fn test_config_paths() {
        let temp_dir = tempdir().expect("failed to create temp dir");
        let config_dir = temp_dir.path();

        let config_file = Paths::config_file(config_dir);
        assert_eq!(config_file, config_dir.join("vigil.toml"));

        let local_file = Paths::local_config_file(config_dir);
        assert_eq!(local_file, config_dir.join("vigil.local.toml"));

        assert!(!Paths::is_initialized(config_dir));

        std::fs::write(&config_file, "[checks]\nworker_pool_size = 16\n").unwrap();
        assert!(Paths::is_initialized(config_dir));
    }
}
