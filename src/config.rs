//! Layered configuration for the cadence orchestrator.
//!
//! Settings are read from `.cadence/cadence.toml` in the project
//! directory, then overridden by environment variables, then by CLI
//! flags (applied by the command layer). Every section and field is
//! optional; missing values take the defaults below.
//!
//! # Configuration File Format
//!
//! ```toml
//! [engine]
//! max_retries = 2
//! max_gateway_errors = 5
//! poll_interval_ms = 1000
//! backoff_base_ms = 500
//! backoff_cap_ms = 30000
//! validation_timeout_secs = 1800
//! review_timeout_secs = 86400
//!
//! [endpoints]
//! validation_url = "http://ci.internal:4770"
//! review_url = "http://reviews.internal:4770"
//! host_url = "http://vcs.internal:4770"
//!
//! [state]
//! dir = ".cadence"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::engine::EngineConfig;

/// Engine tunables as written in cadence.toml.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub max_retries: u32,
    pub max_gateway_errors: u32,
    pub poll_interval_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub validation_timeout_secs: u64,
    pub review_timeout_secs: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_retries: 2,
            max_gateway_errors: 5,
            poll_interval_ms: 1000,
            backoff_base_ms: 500,
            backoff_cap_ms: 30_000,
            validation_timeout_secs: 30 * 60,
            review_timeout_secs: 24 * 60 * 60,
        }
    }
}

/// Base URLs of the external collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointsSection {
    pub validation_url: String,
    pub review_url: String,
    pub host_url: String,
}

impl Default for EndpointsSection {
    fn default() -> Self {
        Self {
            validation_url: "http://localhost:4770".to_string(),
            review_url: "http://localhost:4770".to_string(),
            host_url: "http://localhost:4770".to_string(),
        }
    }
}

/// Where transition logs live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSection {
    pub dir: PathBuf,
}

impl Default for StateSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".cadence"),
        }
    }
}

/// Full configuration: file settings with environment overrides applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    pub engine: EngineSection,
    pub endpoints: EndpointsSection,
    pub state: StateSection,
}

impl CadenceConfig {
    /// Load configuration for a project directory.
    ///
    /// An explicitly given path must exist; the conventional
    /// `.cadence/cadence.toml` is optional and defaults apply when it
    /// is absent.
    pub fn load(project_dir: &Path, explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => {
                if !p.exists() {
                    anyhow::bail!("Config file not found: {}", p.display());
                }
                p.to_path_buf()
            }
            None => project_dir.join(".cadence").join("cadence.toml"),
        };

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env();
        Ok(config)
    }

    /// Apply environment overrides (`CADENCE_*`).
    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("CADENCE_VALIDATION_URL") {
            self.endpoints.validation_url = v;
        }
        if let Ok(v) = std::env::var("CADENCE_REVIEW_URL") {
            self.endpoints.review_url = v;
        }
        if let Ok(v) = std::env::var("CADENCE_HOST_URL") {
            self.endpoints.host_url = v;
        }
        if let Ok(v) = std::env::var("CADENCE_STATE_DIR") {
            self.state.dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CADENCE_MAX_RETRIES")
            && let Ok(parsed) = v.parse()
        {
            self.engine.max_retries = parsed;
        }
    }

    /// Map the file settings onto the engine's runtime config.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_max_retries(self.engine.max_retries)
            .with_max_gateway_errors(self.engine.max_gateway_errors)
            .with_poll_interval(Duration::from_millis(self.engine.poll_interval_ms))
            .with_backoff(
                Duration::from_millis(self.engine.backoff_base_ms),
                Duration::from_millis(self.engine.backoff_cap_ms),
            )
            .with_timeouts(
                Duration::from_secs(self.engine.validation_timeout_secs),
                Duration::from_secs(self.engine.review_timeout_secs),
            )
    }

    /// Resolve the state directory against the project directory.
    pub fn state_dir(&self, project_dir: &Path) -> PathBuf {
        if self.state.dir.is_absolute() {
            self.state.dir.clone()
        } else {
            project_dir.join(&self.state.dir)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_when_no_file() {
        let dir = tempdir().unwrap();
        let config = CadenceConfig::load(dir.path(), None).unwrap();

        assert_eq!(config.engine.max_retries, 2);
        assert_eq!(config.engine.poll_interval_ms, 1000);
        assert_eq!(config.endpoints.validation_url, "http://localhost:4770");
        assert_eq!(config.state.dir, PathBuf::from(".cadence"));
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let result = CadenceConfig::load(dir.path(), Some(&missing));
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("not found"));
    }

    #[test]
    fn test_partial_file_overrides_defaults() {
        let dir = tempdir().unwrap();
        let cadence_dir = dir.path().join(".cadence");
        fs::create_dir_all(&cadence_dir).unwrap();
        fs::write(
            cadence_dir.join("cadence.toml"),
            r#"
[engine]
max_retries = 7

[endpoints]
validation_url = "http://ci.internal:9000"
"#,
        )
        .unwrap();

        let config = CadenceConfig::load(dir.path(), None).unwrap();

        assert_eq!(config.engine.max_retries, 7);
        // Untouched fields keep defaults
        assert_eq!(config.engine.max_gateway_errors, 5);
        assert_eq!(config.endpoints.validation_url, "http://ci.internal:9000");
        assert_eq!(config.endpoints.review_url, "http://localhost:4770");
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cadence.toml");
        fs::write(&path, "[engine\nmax_retries = ").unwrap();

        let result = CadenceConfig::load(dir.path(), Some(&path));
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse config file")
        );
    }

    #[test]
    fn test_engine_config_mapping() {
        let mut config = CadenceConfig::default();
        config.engine.max_retries = 3;
        config.engine.poll_interval_ms = 50;
        config.engine.validation_timeout_secs = 10;

        let engine = config.engine_config();
        assert_eq!(engine.max_retries, 3);
        assert_eq!(engine.poll_interval, Duration::from_millis(50));
        assert_eq!(engine.validation_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_state_dir_resolution() {
        let config = CadenceConfig::default();
        let resolved = config.state_dir(Path::new("/project"));
        assert_eq!(resolved, PathBuf::from("/project/.cadence"));

        let mut absolute = CadenceConfig::default();
        absolute.state.dir = PathBuf::from("/var/lib/cadence");
        assert_eq!(
            absolute.state_dir(Path::new("/project")),
            PathBuf::from("/var/lib/cadence")
        );
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = CadenceConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: CadenceConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }
}
