use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::batch::BatchConfig;
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub batch: BatchSection,
    #[serde(default)]
    pub action_log: ActionLogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_credentials_path")]
    pub credentials_path: String,
    #[serde(default = "default_token_cache_path")]
    pub token_cache_path: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            credentials_path: default_credentials_path(),
            token_cache_path: default_token_cache_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSection {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_page_attempts")]
    pub max_page_attempts: u32,
    #[serde(default = "default_inter_batch_delay_ms")]
    pub inter_batch_delay_ms: u64,
    #[serde(default = "default_token_refresh_threshold_secs")]
    pub token_refresh_threshold_secs: u64,
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            batch_size: default_batch_size(),
            max_page_attempts: default_max_page_attempts(),
            inter_batch_delay_ms: default_inter_batch_delay_ms(),
            token_refresh_threshold_secs: default_token_refresh_threshold_secs(),
        }
    }
}

impl BatchSection {
    pub fn to_batch_config(&self) -> BatchConfig {
        BatchConfig {
            page_size: self.page_size,
            batch_size: self.batch_size,
            max_page_attempts: self.max_page_attempts,
            inter_batch_delay: Duration::from_millis(self.inter_batch_delay_ms),
            token_refresh_threshold: Duration::from_secs(self.token_refresh_threshold_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLogConfig {
    #[serde(default = "default_log_dir")]
    pub dir: String,
}

impl Default for ActionLogConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
        }
    }
}

fn default_credentials_path() -> String {
    "credentials.json".to_string()
}

fn default_token_cache_path() -> String {
    "token_cache.json".to_string()
}

fn default_page_size() -> u32 {
    500
}

fn default_batch_size() -> usize {
    1000
}

fn default_max_page_attempts() -> u32 {
    40
}

fn default_inter_batch_delay_ms() -> u64 {
    200
}

fn default_token_refresh_threshold_secs() -> u64 {
    300
}

fn default_log_dir() -> String {
    "action_logs".to_string()
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| EngineError::Config(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.batch.page_size == 0 {
            return Err(EngineError::Config(
                "batch.page_size must be at least 1".to_string(),
            ));
        }
        if self.batch.page_size > 500 {
            return Err(EngineError::Config(
                "batch.page_size cannot exceed 500 (Gmail's messages.list maximum)".to_string(),
            ));
        }

        if self.batch.batch_size == 0 {
            return Err(EngineError::Config(
                "batch.batch_size must be at least 1".to_string(),
            ));
        }
        if self.batch.batch_size > crate::gmail::MAX_BATCH_MUTATE {
            return Err(EngineError::Config(format!(
                "batch.batch_size cannot exceed {} (Gmail's batchModify/batchDelete maximum)",
                crate::gmail::MAX_BATCH_MUTATE
            )));
        }

        if self.batch.max_page_attempts == 0 {
            return Err(EngineError::Config(
                "batch.max_page_attempts must be at least 1".to_string(),
            ));
        }

        if self.auth.credentials_path.is_empty() {
            return Err(EngineError::Config(
                "auth.credentials_path cannot be empty".to_string(),
            ));
        }
        if self.auth.token_cache_path.is_empty() {
            return Err(EngineError::Config(
                "auth.token_cache_path cannot be empty".to_string(),
            ));
        }

        if self.action_log.dir.is_empty() {
            return Err(EngineError::Config(
                "action_log.dir cannot be empty".to_string(),
            ));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.batch.page_size, 500);
        assert_eq!(config.batch.batch_size, 1000);
        assert_eq!(config.batch.max_page_attempts, 40);
        assert_eq!(config.batch.inter_batch_delay_ms, 200);
        assert_eq!(config.batch.token_refresh_threshold_secs, 300);

        assert_eq!(config.auth.credentials_path, "credentials.json");
        assert_eq!(config.auth.token_cache_path, "token_cache.json");
        assert_eq!(config.action_log.dir, "action_logs");
    }

    #[test]
    fn test_config_validation_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_page_size_zero() {
        let mut config = Config::default();
        config.batch.page_size = 0;
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("at least 1"));
    }

    #[test]
    fn test_config_validation_page_size_too_high() {
        let mut config = Config::default();
        config.batch.page_size = 501;
        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("cannot exceed 500"));
    }

    #[test]
    fn test_config_validation_batch_size_too_high() {
        let mut config = Config::default();
        config.batch.batch_size = 1001;
        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("cannot exceed 1000"));
    }

    #[test]
    fn test_config_validation_empty_credentials_path() {
        let mut config = Config::default();
        config.auth.credentials_path = String::new();
        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("credentials_path cannot be empty"));
    }

    #[test]
    fn test_to_batch_config_converts_durations() {
        let mut config = Config::default();
        config.batch.inter_batch_delay_ms = 50;
        config.batch.token_refresh_threshold_secs = 120;

        let batch = config.batch.to_batch_config();
        assert_eq!(batch.inter_batch_delay, Duration::from_millis(50));
        assert_eq!(batch.token_refresh_threshold, Duration::from_secs(120));
        assert_eq!(batch.page_size, 500);
    }

    #[tokio::test]
    async fn test_config_load_save_roundtrip() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        let config = Config::default();
        config.save(path).await.unwrap();

        let loaded = Config::load(path).await.unwrap();

        assert_eq!(config.batch.page_size, loaded.batch.page_size);
        assert_eq!(config.batch.batch_size, loaded.batch.batch_size);
        assert_eq!(config.auth.credentials_path, loaded.auth.credentials_path);
        assert_eq!(config.action_log.dir, loaded.action_log.dir);
    }

    #[tokio::test]
    async fn test_config_load_nonexistent_returns_default() {
        let path = Path::new("/tmp/nonexistent-mailsweep-config-12345.toml");

        let config = Config::load(path).await.unwrap();

        assert_eq!(config.batch.page_size, 500);
        assert_eq!(config.action_log.dir, "action_logs");
    }

    #[tokio::test]
    async fn test_config_load_invalid_toml() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        tokio::fs::write(path, "this is not valid toml {[}]")
            .await
            .unwrap();

        let result = Config::load(path).await;
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Failed to parse config file"));
    }

    #[tokio::test]
    async fn test_config_partial_with_defaults() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        let partial_config = r#"
[batch]
page_size = 100

[action_log]
dir = "/tmp/logs"
"#;
        tokio::fs::write(path, partial_config).await.unwrap();

        let config = Config::load(path).await.unwrap();

        assert_eq!(config.batch.page_size, 100);
        assert_eq!(config.action_log.dir, "/tmp/logs");

        assert_eq!(config.batch.batch_size, 1000); // default
        assert_eq!(config.auth.credentials_path, "credentials.json"); // default
    }
}
