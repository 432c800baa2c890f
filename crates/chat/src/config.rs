use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};

use crate::transport::ReconnectPolicy;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:3000/api";
pub const CONFIG_DIRECTORY_NAME: &str = "rill";
pub const CONFIG_FILE_NAME: &str = "config.json";
pub const ENV_PREFIX: &str = "RILL_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSettings {
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: default_max_reconnect_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl StreamSettings {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            self.max_reconnect_attempts,
            Duration::from_millis(self.base_delay_ms),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummarySettings {
    #[serde(default = "default_title_word_limit")]
    pub title_word_limit: usize,
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

impl Default for SummarySettings {
    fn default() -> Self {
        Self {
            title_word_limit: default_title_word_limit(),
            preview_chars: default_preview_chars(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub stream: StreamSettings,
    #[serde(default)]
    pub summary: SummarySettings,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            stream: StreamSettings::default(),
            summary: SummarySettings::default(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn normalized(mut self) -> Self {
        let base_url = self.api_base_url.trim().trim_end_matches('/');
        self.api_base_url = if base_url.is_empty() {
            default_api_base_url()
        } else {
            base_url.to_string()
        };
        if self.stream.base_delay_ms == 0 {
            self.stream.base_delay_ms = default_base_delay_ms();
        }
        if self.summary.title_word_limit == 0 {
            self.summary.title_word_limit = default_title_word_limit();
        }
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = default_request_timeout_secs();
        }
        self
    }

    /// Layers defaults, the JSON file at `path` (if any) and `RILL_*` environment variables.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(ClientConfig::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Extracts the layered config, falling back to defaults when it does not parse.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            tracing::info!("config file not found at {:?}, using defaults", path);
        }

        match Self::figment(path).extract::<ClientConfig>() {
            Ok(config) => config.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse config from {:?}: {}. using defaults",
                    path,
                    error
                );
                ClientConfig::default()
            }
        }
    }
}

/// Config loaded once at startup from the default location.
pub struct ConfigStore {
    config: Arc<ClientConfig>,
    config_path: PathBuf,
}

impl ConfigStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(CONFIG_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".rill"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(CONFIG_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let config = ClientConfig::load_from(&config_path);
        Self {
            config: Arc::new(config),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config(&self) -> Arc<ClientConfig> {
        self.config.clone()
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_max_reconnect_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_title_word_limit() -> usize {
    5
}

fn default_preview_chars() -> usize {
    80
}

fn default_request_timeout_secs() -> u64 {
    30
}
