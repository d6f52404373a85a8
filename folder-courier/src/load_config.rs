/// `load_config` module: reads the static YAML config and the Telegram secrets from the
/// environment.
///
/// The YAML file never carries secrets. Every section is optional and falls back to the
/// core defaults, so an empty file (or no file at all) is a valid configuration.
///
/// Accepted shape:
///
/// ```yaml
/// settings:
///   topics_enabled: false
///   album_mode: true
///   doc_group: false
///   album_captions: false
///   doc_captions: true
///   image_captions: false
/// limits:
///   max_batch_size: 10
///   max_item_bytes: 52428800
/// retry:
///   max_retries: 3
///   initial_delay_secs: 2.0
///   rate_limit_padding_secs: 2.0
///   max_rate_limit_waits: null
/// pacing:
///   base_delay_secs: 1.0
///   size_delay_cap_secs: 5.0
///   cooldown_secs: 1.0
/// statistics:
///   attribution: per_batch
/// telegram:
///   api_base: https://api.telegram.org
///   request_timeout_secs: 300
/// ```
use anyhow::Result;
use folder_courier_core::config::{BatchLimits, Pacing, RetryPolicy, RunConfig, UploadSettings};
use folder_courier_core::stats::StatsAttribution;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use tracing::{error, info};

pub const TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";
pub const CHAT_ID_ENV: &str = "TELEGRAM_CHAT_ID";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub settings: UploadSettings,
    pub limits: BatchLimits,
    pub retry: RetryPolicy,
    pub pacing: Pacing,
    pub statistics: StatisticsSection,
    pub telegram: TelegramSection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StatisticsSection {
    pub attribution: StatsAttribution,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TelegramSection {
    pub api_base: String,
    pub request_timeout_secs: u64,
}

impl Default for TelegramSection {
    fn default() -> Self {
        Self {
            api_base: "https://api.telegram.org".to_string(),
            request_timeout_secs: 300,
        }
    }
}

impl CourierConfig {
    /// The part of the config the orchestrator consumes.
    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            settings: self.settings.clone(),
            limits: self.limits.clone(),
            retry: self.retry.clone(),
            pacing: self.pacing.clone(),
            attribution: self.statistics.attribution,
        }
    }
}

/// Bot credentials, injected from the environment only.
#[derive(Clone, PartialEq, Eq)]
pub struct TelegramCredentials {
    pub bot_token: String,
    pub chat_id: String,
}

impl std::fmt::Debug for TelegramCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramCredentials")
            .field("bot_token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

/// Loads a static YAML config file (no secrets).
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CourierConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    // serde_yaml reads an empty document as unit, not as an empty map.
    if config_content.trim().is_empty() {
        info!(config_path = ?path_ref, "Config file is empty, using defaults");
        return Ok(CourierConfig::default());
    }

    let conf = match serde_yaml::from_str::<CourierConfig>(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    if let Err(e) = conf.run_config().validate() {
        error!(error = %e, config_path = ?path_ref, "Config value out of range");
        return Err(anyhow::anyhow!("Invalid config {:?}: {e}", path_ref));
    }
    Ok(conf)
}

/// Reads `TELEGRAM_BOT_TOKEN` and `TELEGRAM_CHAT_ID`.
pub fn telegram_credentials_from_env() -> Result<TelegramCredentials> {
    let read = |key: &str| -> Result<String> {
        match env::var(key) {
            Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
            Ok(_) => {
                error!(env = key, "Environment variable is empty");
                Err(anyhow::anyhow!("{key} is set but empty"))
            }
            Err(e) => {
                error!(error = ?e, env = key, "Environment variable missing");
                Err(anyhow::anyhow!("{key} missing in environment: {e}"))
            }
        }
    };
    let bot_token = read(TOKEN_ENV)?;
    let chat_id = read(CHAT_ID_ENV)?;
    info!(chat_id = %chat_id, "Loaded Telegram credentials from environment");
    Ok(TelegramCredentials { bot_token, chat_id })
}
