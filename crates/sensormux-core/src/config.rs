//! Configuration resolution for SensorMux.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (<config dir>/sensormux/settings.json)
//! 3. Project config (.sensormux/settings.json)
//! 4. Environment variables

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::frequency::{FrequencyPolicy, NonPositiveFrequency};
use crate::policy::{CapabilityPolicy, CapabilityRule};

/// Complete SensorMux configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub multiplexer: MultiplexerSettings,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Multiplexer behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiplexerSettings {
    /// Upper frequency cap in Hz applied on top of backend bounds.
    pub max_frequency: f64,
    /// Treatment of zero and negative requested frequencies.
    pub non_positive_frequency: NonPositiveFrequency,
    /// Throttle slow handles in continuous reporting mode.
    pub throttle_continuous: bool,
    /// Clear a handle's latest reading when its connection is suspended.
    pub clear_reading_on_suspend: bool,
}

impl Default for MultiplexerSettings {
    fn default() -> Self {
        Self {
            max_frequency: 60.0,
            non_positive_frequency: NonPositiveFrequency::Reject,
            throttle_continuous: true,
            clear_reading_on_suspend: false,
        }
    }
}

impl MultiplexerSettings {
    pub const fn frequency_policy(&self) -> FrequencyPolicy {
        FrequencyPolicy {
            max_frequency: self.max_frequency,
            non_positive: self.non_positive_frequency,
        }
    }
}

/// Capability policy configuration. Rules extend the built-in defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PolicyConfig {
    #[serde(default)]
    pub rules: Vec<CapabilityRule>,
}

impl PolicyConfig {
    /// Build the capability policy: built-in rules plus configured ones.
    pub fn build(&self) -> CapabilityPolicy {
        let mut policy = CapabilityPolicy::new();
        policy.add_rules(self.rules.clone());
        policy
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        let global = load_config_file(&global_path)?;
        merge_config(&mut config, global);
    }

    if let Some(dir) = project_dir {
        let project_path = dir.join(".sensormux").join("settings.json");
        if project_path.exists() {
            let project = load_config_file(&project_path)?;
            merge_config(&mut config, project);
        }
    }

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("sensormux").join("settings.json"))
}

/// Load a single config file.
pub fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_config(base: &mut Config, overlay: Config) {
    base.multiplexer = overlay.multiplexer;
    base.logging = overlay.logging;
    // Rules accumulate across layers
    base.policy.rules.extend(overlay.policy.rules);
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(val) = var("SENSORMUX_MAX_FREQUENCY")
        && let Ok(n) = val.parse::<f64>()
        && n.is_finite()
        && n > 0.0
    {
        config.multiplexer.max_frequency = n;
    }
    if let Some(val) = var("SENSORMUX_NON_POSITIVE_FREQUENCY") {
        match val.as_str() {
            "reject" => config.multiplexer.non_positive_frequency = NonPositiveFrequency::Reject,
            "clamp-to-minimum" => {
                config.multiplexer.non_positive_frequency = NonPositiveFrequency::ClampToMinimum;
            }
            _ => {}
        }
    }
    if let Some(val) = var("SENSORMUX_LOG_LEVEL") {
        config.logging.level = val;
    }
    if let Some(val) = var("SENSORMUX_LOG_JSON") {
        config.logging.json = matches!(val.as_str(), "1" | "true");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_caps_at_60hz() {
        let config = Config::default();
        assert!((config.multiplexer.max_frequency - 60.0).abs() < f64::EPSILON);
        assert_eq!(
            config.multiplexer.non_positive_frequency,
            NonPositiveFrequency::Reject
        );
        assert!(!config.multiplexer.clear_reading_on_suspend);
    }

    #[test]
    fn project_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg_dir = dir.path().join(".sensormux");
        std::fs::create_dir_all(&cfg_dir).unwrap();
        std::fs::write(
            cfg_dir.join("settings.json"),
            r#"{
                "multiplexer": { "max_frequency": 120.0, "non_positive_frequency": "clamp-to-minimum" },
                "policy": { "rules": [
                    { "id": "frame", "feature_pattern": "gyroscope",
                      "origin_pattern": "https://*", "action": "allow", "priority": 5 }
                ] }
            }"#,
        )
        .unwrap();

        let loaded = load_config_file(&cfg_dir.join("settings.json")).unwrap();
        let mut config = Config::default();
        merge_config(&mut config, loaded);

        assert!((config.multiplexer.max_frequency - 120.0).abs() < f64::EPSILON);
        assert_eq!(
            config.multiplexer.non_positive_frequency,
            NonPositiveFrequency::ClampToMinimum
        );
        // Unspecified fields keep defaults
        assert!(config.multiplexer.throttle_continuous);

        let policy = config.policy.build();
        assert_eq!(policy.rules().len(), 2);
        assert_eq!(policy.rules()[0].id, "frame");
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = load_config_file(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("SENSORMUX_MAX_FREQUENCY", "30"),
            ("SENSORMUX_NON_POSITIVE_FREQUENCY", "clamp-to-minimum"),
            ("SENSORMUX_LOG_LEVEL", "debug"),
            ("SENSORMUX_LOG_JSON", "true"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        apply_env_overrides(&mut config, |k| env.get(k).map(ToString::to_string));

        assert!((config.multiplexer.max_frequency - 30.0).abs() < f64::EPSILON);
        assert_eq!(
            config.multiplexer.non_positive_frequency,
            NonPositiveFrequency::ClampToMinimum
        );
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn invalid_env_frequency_ignored() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, |k| {
            (k == "SENSORMUX_MAX_FREQUENCY").then(|| "-5".to_string())
        });
        assert!((config.multiplexer.max_frequency - 60.0).abs() < f64::EPSILON);
    }
}
