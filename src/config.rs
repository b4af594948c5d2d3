// src/config.rs
//! Configuration file parsing for kiln
//!
//! Supports TOML configuration files with the following sections:
//! - [paths] - Install and stage roots, recipe repositories, result cache
//! - [build] - Parallelism, failure policy, timeouts, base `PATH`
//!
//! The file is found by [`KilnConfig::discover`]: an explicit path first,
//! then `$KILN_CONFIG`, then `kiln/config.toml` under the platform config
//! directory. Without any of these the defaults apply.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable naming a config file
pub const CONFIG_ENV: &str = "KILN_CONFIG";

/// TOML configuration file structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KilnConfig {
    #[serde(default)]
    pub paths: PathsSection,

    #[serde(default)]
    pub build: BuildSection,
}

/// Filesystem locations
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsSection {
    /// Packages are installed under `<install_root>/<name>-<version>-<hash>`
    #[serde(default = "default_install_root")]
    pub install_root: PathBuf,

    /// Scratch directories for builds
    #[serde(default = "default_stage_root")]
    pub stage_root: PathBuf,

    /// Recipe repositories, searched in order
    #[serde(default)]
    pub repo_dirs: Vec<PathBuf>,

    /// Persisted concretization results
    #[serde(default = "default_cache_file")]
    pub cache_file: Option<PathBuf>,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            install_root: default_install_root(),
            stage_root: default_stage_root(),
            repo_dirs: Vec::new(),
            cache_file: default_cache_file(),
        }
    }
}

/// Scheduler settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildSection {
    /// Concurrent builds (0 = available parallelism)
    #[serde(default)]
    pub max_parallelism: usize,

    /// Cancel everything on the first failure
    #[serde(default)]
    pub fail_fast: bool,

    /// Keep stage directories of successful builds
    #[serde(default)]
    pub keep_stage: bool,

    /// Per-node time limit in seconds (0 = none)
    #[serde(default)]
    pub command_timeout_secs: u64,

    /// Appended to `PATH` after dependency `bin` directories
    #[serde(default = "default_base_path")]
    pub base_path: String,
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            max_parallelism: 0,
            fail_fast: false,
            keep_stage: false,
            command_timeout_secs: 0,
            base_path: default_base_path(),
        }
    }
}

fn default_install_root() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("kiln/install"))
        .unwrap_or_else(|| PathBuf::from("kiln/install"))
}

fn default_stage_root() -> PathBuf {
    std::env::temp_dir().join("kiln-stage")
}

fn default_cache_file() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join("kiln/concrete.json"))
}

fn default_base_path() -> String {
    "/usr/local/bin:/usr/bin:/bin".to_string()
}

impl KilnConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let config = Self::parse(&content)
            .map_err(|e| Error::ConfigError(format!("{}: {}", path.display(), e)))?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn parse(content: &str) -> Result<Self> {
        let config: KilnConfig =
            toml::from_str(content).map_err(|e| Error::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Find and load the configuration file, or fall back to defaults
    ///
    /// An explicit path or `$KILN_CONFIG` must exist; the platform default
    /// location is optional.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Self::load(Path::new(&path));
        }
        if let Some(path) = dirs::config_dir().map(|d| d.join("kiln/config.toml")) {
            if path.is_file() {
                return Self::load(&path);
            }
        }
        debug!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    fn validate(&self) -> Result<()> {
        if self.paths.install_root.as_os_str().is_empty() {
            return Err(Error::ConfigError("install_root must not be empty".to_string()));
        }
        if self.paths.stage_root.as_os_str().is_empty() {
            return Err(Error::ConfigError("stage_root must not be empty".to_string()));
        }
        if self.paths.install_root == self.paths.stage_root {
            return Err(Error::ConfigError(
                "install_root and stage_root must differ".to_string(),
            ));
        }
        Ok(())
    }

    /// Worker count, resolving 0 to the machine's parallelism
    pub fn max_parallelism(&self) -> usize {
        match self.build.max_parallelism {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            n => n,
        }
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        match self.build.command_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = KilnConfig::default();
        assert!(config.max_parallelism() >= 1);
        assert!(config.command_timeout().is_none());
        assert!(!config.build.fail_fast);
        assert!(config.paths.repo_dirs.is_empty());
        assert!(config.build.base_path.contains("/usr/bin"));
    }

    #[test]
    fn test_parse_sections() {
        let config = KilnConfig::parse(
            r#"
[paths]
install_root = "/opt/kiln"
stage_root = "/tmp/kiln"
repo_dirs = ["recipes", "/srv/recipes"]

[build]
max_parallelism = 6
fail_fast = true
command_timeout_secs = 3600
"#,
        )
        .unwrap();
        assert_eq!(config.paths.install_root, PathBuf::from("/opt/kiln"));
        assert_eq!(config.paths.repo_dirs.len(), 2);
        assert_eq!(config.max_parallelism(), 6);
        assert!(config.build.fail_fast);
        assert_eq!(config.command_timeout(), Some(Duration::from_secs(3600)));
        assert_eq!(config.build.base_path, default_base_path());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = KilnConfig::parse("[build]\nparallel = 4\n").unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn test_same_roots_rejected() {
        let err = KilnConfig::parse("[paths]\ninstall_root = \"/x\"\nstage_root = \"/x\"\n").unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn test_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kiln.toml");
        std::fs::write(&path, "[build]\nkeep_stage = true\n").unwrap();

        let config = KilnConfig::discover(Some(&path)).unwrap();
        assert!(config.build.keep_stage);
        assert!(KilnConfig::discover(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
