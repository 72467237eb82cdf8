use serde::{Deserialize, Serialize};
use std::path::Path;
use crate::error::{Result, DeckError};

fn default_batch_size() -> usize {
    10
}

fn default_poll_interval_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub translate: TranslateConfig,
    pub scheduler: SchedulerConfig,
    pub limits: LimitsConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateConfig {
    /// Translation backend endpoint URL (OpenAI-compatible)
    pub endpoint: String,
    /// Model to use for translation
    pub model: String,
    /// Number of units per translation request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of jobs processed simultaneously
    pub max_concurrent: usize,
    /// Delay before retrying admission when all slots are busy (milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum accepted upload size in bytes
    pub max_file_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Directory for application and metrics logs
    pub log_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            translate: TranslateConfig {
                endpoint: "https://api.openai.com/v1".to_string(),
                model: "gpt-4o-mini".to_string(),
                batch_size: 10,
                timeout_secs: 300,
            },
            scheduler: SchedulerConfig {
                max_concurrent: 1,
                poll_interval_ms: 1000,
            },
            limits: LimitsConfig {
                max_file_size: 500 * 1024 * 1024,
            },
            metrics: MetricsConfig {
                log_dir: ".deckbabel/log".to_string(),
            },
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DeckError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| DeckError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| DeckError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| DeckError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }
}
