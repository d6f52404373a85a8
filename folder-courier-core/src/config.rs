use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::stats::StatsAttribution;

pub const MAX_BATCH_SIZE: usize = 10;
pub const MAX_ITEM_BYTES: u64 = 50 * 1024 * 1024;

/// Upload toggles, each independently switchable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    /// Create one topic per non-root subfolder.
    pub topics_enabled: bool,
    /// Group images into albums instead of sending them one by one.
    pub album_mode: bool,
    /// Group documents into batches instead of sending them one by one.
    pub doc_group: bool,
    /// Caption each album with the subfolder name.
    pub album_captions: bool,
    /// Caption documents with their file name.
    pub doc_captions: bool,
    /// Caption individually sent images with their parent folder name.
    pub image_captions: bool,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            topics_enabled: false,
            album_mode: true,
            doc_group: false,
            album_captions: false,
            doc_captions: true,
            image_captions: false,
        }
    }
}

impl UploadSettings {
    /// One-line summary shown at the start of a run.
    pub fn status_line(&self) -> String {
        fn flag(on: bool) -> &'static str {
            if on {
                "ON"
            } else {
                "OFF"
            }
        }
        format!(
            "Topics: {} | Album: {} | DocGroup: {} | AlbumCap: {} | Docs: {} | ImgCap: {}",
            flag(self.topics_enabled),
            flag(self.album_mode),
            flag(self.doc_group),
            flag(self.album_captions),
            flag(self.doc_captions),
            flag(self.image_captions),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchLimits {
    pub max_batch_size: usize,
    pub max_item_bytes: u64,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_batch_size: MAX_BATCH_SIZE,
            max_item_bytes: MAX_ITEM_BYTES,
        }
    }
}

/// Retry engine policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Number of invocations allowed for transient failures.
    pub max_retries: u32,
    /// Backoff before the second attempt; doubles for each further attempt.
    pub initial_delay_secs: f64,
    /// Added to every server-specified rate-limit wait.
    pub rate_limit_padding_secs: f64,
    /// Cap on consecutive rate-limit waits for one call. `None` waits for as long as the
    /// service keeps asking, trusting its stated delays.
    pub max_rate_limit_waits: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_secs: 2.0,
            rate_limit_padding_secs: 2.0,
            max_rate_limit_waits: None,
        }
    }
}

impl RetryPolicy {
    /// Backoff after the `failures`-th transient failure (1-based).
    pub fn backoff(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(16);
        secs(self.initial_delay_secs * f64::from(1u32 << exp))
    }

    pub fn rate_limit_wait(&self, retry_after: Duration) -> Duration {
        retry_after + secs(self.rate_limit_padding_secs)
    }
}

/// Delays between transport calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pacing {
    pub base_delay_secs: f64,
    /// Upper bound of the size-proportional part of a single-item delay.
    pub size_delay_cap_secs: f64,
    /// Fixed pause after finishing the images or documents of a subfolder.
    pub cooldown_secs: f64,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            base_delay_secs: 1.0,
            size_delay_cap_secs: 5.0,
            cooldown_secs: 1.0,
        }
    }
}

impl Pacing {
    /// `base + min(size_mb / 10, cap)`.
    pub fn single_delay(&self, size_bytes: u64) -> Duration {
        let size_delay = (crate::batch::size_mb(size_bytes) / 10.0).min(self.size_delay_cap_secs);
        secs(self.base_delay_secs + size_delay)
    }

    /// `base * items * 0.5`.
    pub fn batch_delay(&self, items: usize) -> Duration {
        secs(self.base_delay_secs * items as f64 * 0.5)
    }

    pub fn cooldown(&self) -> Duration {
        secs(self.cooldown_secs)
    }
}

/// Upper bound accepted for any configured delay.
pub const MAX_DELAY_SECS: f64 = 86_400.0;

/// Rejected configuration values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be a finite number of seconds between 0 and {max}, got {value}")]
    DelayOutOfRange {
        field: &'static str,
        value: f64,
        max: f64,
    },
}

fn secs(value: f64) -> Duration {
    // NaN turns into 0 through max(); oversized values saturate instead of panicking.
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}

fn check_delay(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=MAX_DELAY_SECS).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::DelayOutOfRange {
            field,
            value,
            max: MAX_DELAY_SECS,
        })
    }
}

/// Everything the orchestrator needs for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub settings: UploadSettings,
    pub limits: BatchLimits,
    pub retry: RetryPolicy,
    pub pacing: Pacing,
    pub attribution: StatsAttribution,
}

impl RunConfig {
    /// Every seconds field must be finite and within `0..=MAX_DELAY_SECS`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_delay("retry.initial_delay_secs", self.retry.initial_delay_secs)?;
        check_delay("retry.rate_limit_padding_secs", self.retry.rate_limit_padding_secs)?;
        check_delay("pacing.base_delay_secs", self.pacing.base_delay_secs)?;
        check_delay("pacing.size_delay_cap_secs", self.pacing.size_delay_cap_secs)?;
        check_delay("pacing.cooldown_secs", self.pacing.cooldown_secs)?;
        Ok(())
    }

    pub fn trace_loaded(&self) {
        info!(
            topics = self.settings.topics_enabled,
            album = self.settings.album_mode,
            doc_group = self.settings.doc_group,
            album_captions = self.settings.album_captions,
            doc_captions = self.settings.doc_captions,
            image_captions = self.settings.image_captions,
            max_retries = self.retry.max_retries,
            "Loaded RunConfig"
        );
        debug!(?self, "RunConfig loaded (full debug)");
    }
}
