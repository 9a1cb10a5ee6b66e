//! Config Layer (§4.K, ADDED): loads and edits `.kest/config.yaml`.
//!
//! No teacher counterpart (the teacher has no persisted config, just
//! CLI flags and env vars read by `telemetry::TelemetryConfig::from_env`).
//! Grounded in that same "plain struct + serde, env overrides at the
//! edges" shape, but backed by a YAML file via `serde_yaml` rather than
//! process environment variables, since the spec calls for a
//! `kest init`/`kest env` workflow that needs something to persist to.

use crate::errors::RunnerError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_PATH: &str = ".kest/config.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            headers: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Environment {
    pub base_url: String,
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KestConfig {
    pub version: u32,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub environments: HashMap<String, Environment>,
    pub active_env: String,
}

impl Default for KestConfig {
    fn default() -> Self {
        let mut environments = HashMap::new();
        environments.insert(
            "local".to_string(),
            Environment {
                base_url: "http://localhost:8080".to_string(),
                variables: HashMap::new(),
            },
        );
        Self {
            version: 1,
            defaults: Defaults::default(),
            environments,
            active_env: "local".to_string(),
        }
    }
}

impl KestConfig {
    /// Reads and parses `.kest/config.yaml`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RunnerError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| RunnerError::ConfigFileInvalid {
            reason: format!("could not read {}: {}", path.display(), e),
        })?;
        serde_yaml::from_str(&raw).map_err(|e| RunnerError::ConfigFileInvalid {
            reason: format!("could not parse {}: {}", path.display(), e),
        })
    }

    /// Loads from the well-known `.kest/config.yaml` location.
    pub fn load_default() -> Result<Self, RunnerError> {
        Self::load(CONFIG_PATH)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), RunnerError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_yaml::to_string(self).map_err(|e| RunnerError::ConfigFileInvalid {
            reason: format!("could not serialize config: {}", e),
        })?;
        fs::write(path, raw)?;
        Ok(())
    }

    /// `kest init`: writes a fresh default config, refusing to clobber
    /// an existing one.
    pub fn init(path: impl AsRef<Path>) -> Result<PathBuf, RunnerError> {
        let path = path.as_ref();
        if path.exists() {
            return Err(RunnerError::ConfigFileExists {
                path: path.display().to_string(),
            });
        }
        let config = KestConfig::default();
        config.save(path)?;
        Ok(path.to_path_buf())
    }

    pub fn init_default() -> Result<PathBuf, RunnerError> {
        Self::init(CONFIG_PATH)
    }

    pub fn environment(&self, name: &str) -> Result<&Environment, RunnerError> {
        self.environments
            .get(name)
            .ok_or_else(|| RunnerError::UnknownEnvironment {
                name: name.to_string(),
            })
    }

    pub fn active_environment(&self) -> Result<&Environment, RunnerError> {
        self.environment(&self.active_env)
    }

    /// `kest env use <name>`: switches the persisted active environment.
    pub fn use_environment(&mut self, name: &str) -> Result<(), RunnerError> {
        self.environment(name)?;
        self.active_env = name.to_string();
        Ok(())
    }

    /// `kest env list`: names with the active one marked, in a stable
    /// sorted order so output is deterministic across runs.
    pub fn list_environments(&self) -> Vec<(String, bool)> {
        let mut names: Vec<&String> = self.environments.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|n| (n.clone(), *n == self.active_env))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_one_local_environment() {
        let config = KestConfig::default();
        assert_eq!(config.active_env, "local");
        assert!(config.environments.contains_key("local"));
    }

    #[test]
    fn init_refuses_to_overwrite_existing_file() {
        let dir = std::env::temp_dir().join(format!("kest-config-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.yaml");
        fs::write(&path, "version: 1\nactive_env: local\n").unwrap();

        let result = KestConfig::init(&path);
        assert!(matches!(result, Err(RunnerError::ConfigFileExists { .. })));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn init_then_load_round_trips() {
        let dir = std::env::temp_dir().join(format!("kest-config-test-rt-{}", std::process::id()));
        let path = dir.join("config.yaml");
        let _ = fs::remove_dir_all(&dir);

        KestConfig::init(&path).expect("init should succeed on a fresh path");
        let loaded = KestConfig::load(&path).expect("load should succeed after init");
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.active_env, "local");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn use_environment_rejects_unknown_name() {
        let mut config = KestConfig::default();
        let result = config.use_environment("staging");
        assert!(matches!(result, Err(RunnerError::UnknownEnvironment { .. })));
        assert_eq!(config.active_env, "local");
    }

    #[test]
    fn use_environment_switches_active_env() {
        let mut config = KestConfig::default();
        config.environments.insert(
            "staging".to_string(),
            Environment {
                base_url: "https://staging.example.test".to_string(),
                variables: HashMap::new(),
            },
        );
        config.use_environment("staging").expect("staging exists");
        assert_eq!(config.active_env, "staging");
    }

    #[test]
    fn list_environments_marks_active_and_is_sorted() {
        let mut config = KestConfig::default();
        config.environments.insert(
            "prod".to_string(),
            Environment {
                base_url: "https://example.test".to_string(),
                variables: HashMap::new(),
            },
        );
        let list = config.list_environments();
        assert_eq!(list[0].0, "local");
        assert_eq!(list[1].0, "prod");
        assert!(list.iter().find(|(n, _)| n == "local").unwrap().1);
        assert!(!list.iter().find(|(n, _)| n == "prod").unwrap().1);
    }
}
