//! Application configuration file.
//!
//! ```yaml
//! gateway:
//!   base_url: http://sim.local/api
//!   request_timeout_ms: 30000
//! polling:
//!   interval_ms: 2000
//! playback:
//!   speed_ms: 100
//! ```
//!
//! Every section is optional. `HERDFLOW_API_URL` and `HERDFLOW_API_KEY`
//! override the gateway settings after loading.

use std::path::Path;

use hf_gateway::GatewayConfig;
use serde::{Deserialize, Serialize};

use crate::animation::{CategoryFilter, Pace};
use crate::error::{AppError, AppResult};
use crate::poller::PollSettings;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    /// Milliseconds per step.
    pub speed_ms: u64,
    /// Name fragments of the categories shown when viewing several results
    /// together. Empty shows every category.
    pub multi_result_categories: Vec<String>,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            speed_ms: Pace::DEFAULT.millis(),
            multi_result_categories: vec!["simulator".to_string(), "pigpen".to_string()],
        }
    }
}

impl PlaybackSettings {
    pub fn pace(&self) -> AppResult<Pace> {
        Pace::from_millis(self.speed_ms)
    }

    pub fn filter_for(&self, results: usize) -> CategoryFilter {
        if results > 1 && !self.multi_result_categories.is_empty() {
            CategoryFilter::NameContains(self.multi_result_categories.clone())
        } else {
            CategoryFilter::All
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub polling: PollSettings,
    pub playback: PlaybackSettings,
}

impl AppConfig {
    pub fn from_yaml(content: &str) -> AppResult<Self> {
        let config: AppConfig = serde_yaml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config YAML: {}", e)))?;
        config.playback.pace()?;
        Ok(config)
    }

    pub fn with_env_overrides(mut self) -> Self {
        self.gateway = self.gateway.with_env_overrides();
        self
    }

    pub fn save(&self, path: &Path) -> AppResult<()> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| AppError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| AppError::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Load the config file when given, defaults otherwise, then apply the
/// environment overrides.
pub fn load_config(path: Option<&Path>) -> AppResult<AppConfig> {
    let config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path).map_err(|e| AppError::FileRead {
                path: path.to_path_buf(),
                source: e,
            })?;
            AppConfig::from_yaml(&content)?
        }
        None => AppConfig::default(),
    };
    Ok(config.with_env_overrides())
}
