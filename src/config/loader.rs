//! Configuration Loader
//!
//! Environment-aware configuration loading. Merges the optional YAML files in
//! the config directory with `RFM__*` environment overrides.

use super::error::{ConfigResult, ConfigurationError};
use super::RfmConfig;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const CONFIG_FILE_STEM: &str = "rfm-jobs";
const ENV_PREFIX: &str = "RFM";

/// Loaded configuration together with the environment it was resolved for
#[derive(Debug)]
pub struct ConfigManager {
    config: RfmConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment.
    /// Useful for tests that must not touch global environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let mut config = Self::load_and_merge_config(&config_directory, environment)?;

        if let Ok(database_url) = env::var("DATABASE_URL") {
            config.database.url = database_url;
        }

        config.validate()?;

        debug!(
            "Configuration loaded successfully: {}",
            serde_json::to_string_pretty(&Self::sanitize_config_for_logging(&config))
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration (tests, embedding applications)
    pub fn from_config(config: RfmConfig, environment: &str) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: PathBuf::from("config"),
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &RfmConfig {
        &self.config
    }

    /// Get the current environment
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Get the configuration directory
    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Sanitized configuration for debugging output
    pub fn debug_config(&self) -> serde_json::Value {
        Self::sanitize_config_for_logging(&self.config)
    }

    /// Detect current environment: RFM_ENV || APP_ENV || 'development'
    pub fn detect_environment() -> String {
        env::var("RFM_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    fn load_and_merge_config(
        config_directory: &Path,
        environment: &str,
    ) -> ConfigResult<RfmConfig> {
        let base_file = config_directory.join(format!("{CONFIG_FILE_STEM}.yaml"));
        let environment_file =
            config_directory.join(format!("{CONFIG_FILE_STEM}.{environment}.yaml"));

        let load_failed = |source| ConfigurationError::LoadFailed {
            config_directory: config_directory.to_path_buf(),
            source,
        };

        config::Config::builder()
            .add_source(config::File::from(base_file).required(false))
            .add_source(config::File::from(environment_file).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("task_runner.runner_command")
                    .try_parsing(true),
            )
            .build()
            .map_err(load_failed)?
            .try_deserialize::<RfmConfig>()
            .map_err(load_failed)
    }

    /// Mask credentials embedded in connection strings before logging
    fn sanitize_config_for_logging(config: &RfmConfig) -> serde_json::Value {
        let mut config_json = serde_json::json!(config);
        let sensitive_patterns = ["password", "secret", "token", "url"];
        Self::sanitize_json_recursive(&mut config_json, &sensitive_patterns);
        config_json
    }

    fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    let is_sensitive = sensitive_patterns
                        .iter()
                        .any(|pattern| key_lower.contains(pattern));

                    if is_sensitive {
                        if let serde_json::Value::String(s) = val {
                            // Keep the scheme, it is useful when debugging driver selection
                            let scheme = s.split(':').next().unwrap_or_default();
                            *val = serde_json::Value::String(format!("[MASKED: {scheme}:***]"));
                        } else {
                            *val = serde_json::Value::String("[MASKED]".to_string());
                        }
                    } else {
                        Self::sanitize_json_recursive(val, sensitive_patterns);
                    }
                }
            }
            serde_json::Value::Array(arr) => {
                for item in arr.iter_mut() {
                    Self::sanitize_json_recursive(item, sensitive_patterns);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_directory_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().join("absent")), "test")
                .unwrap();
        assert_eq!(manager.environment(), "test");
        assert_eq!(manager.config().task_runner.poll_interval_ms, 500);
    }

    #[test]
    fn test_environment_file_overrides_base_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut base = std::fs::File::create(dir.path().join("rfm-jobs.yaml")).unwrap();
        writeln!(
            base,
            "task_runner:\n  max_concurrency: 4\n  runner_command: [\"/usr/local/bin/rfm-task-runner\"]\ndriver:\n  stall_poll_threshold: 9"
        )
        .unwrap();
        let mut test_env = std::fs::File::create(dir.path().join("rfm-jobs.test.yaml")).unwrap();
        writeln!(test_env, "task_runner:\n  max_concurrency: 2").unwrap();

        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap();
        let config = manager.config();
        assert_eq!(config.task_runner.max_concurrency, 2);
        assert_eq!(
            config.task_runner.runner_command,
            vec!["/usr/local/bin/rfm-task-runner".to_string()]
        );
        assert_eq!(config.driver.stall_poll_threshold, 9);
    }

    #[test]
    fn test_invalid_values_are_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut base = std::fs::File::create(dir.path().join("rfm-jobs.yaml")).unwrap();
        writeln!(base, "driver:\n  poll_interval_ms: 0").unwrap();

        let result =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test");
        assert!(matches!(
            result,
            Err(ConfigurationError::InvalidValue { ref field, .. }) if field == "driver.poll_interval_ms"
        ));
    }

    #[test]
    fn test_database_url_is_masked_for_logging() {
        let mut config = RfmConfig::default();
        config.database.url = "sqlite:/srv/secret/jobs.db".to_string();
        let sanitized = ConfigManager::sanitize_config_for_logging(&config);
        assert_eq!(sanitized["database"]["url"], "[MASKED: sqlite:***]");
    }
}
