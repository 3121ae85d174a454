//! Runtime configuration.
//!
//! Everything has a default; an optional CONL file can override any of it:
//!
//! ```conl
//! timeout_secs = 20
//! min_delay_floor_secs = 2
//! labels
//!   vin = vin:
//! ```

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

pub const SITE_ROOT: &str = "https://bringatrailer.com";

/// Upper bound for any delay between fetches
pub const MAX_DELAY_SECS: f64 = 3600.0;

/// Keywords used to tag sidebar entries. Matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FieldLabels {
    pub mileage: String,
    pub transmission: String,
    pub vin: String,
    pub location: String,
}

impl Default for FieldLabels {
    fn default() -> Self {
        Self {
            mileage: "miles".to_string(),
            transmission: "transmission".to_string(),
            vin: "chassis:".to_string(),
            location: "location:".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub site_root: String,
    pub user_agent: String,
    /// Per-request network timeout
    pub timeout_secs: u64,
    pub max_redirects: usize,
    /// Extra attempts after a timeout, 429 or 5xx
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Lower bound for the delay between fresh detail-page fetches
    pub min_delay_floor_secs: f64,
    /// Replaces line breaks in the essentials text
    pub line_break_marker: String,
    /// Fall back to stripping every non-digit from an unrecognised mileage entry
    pub mileage_strip_digits: bool,
    /// Fail the run when a subtitle disagrees with its payload group
    pub strict_sold_flag: bool,
    pub labels: FieldLabels,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_root: SITE_ROOT.to_string(),
            user_agent: "Mozilla/5.0 (compatible; BatTrend/0.1)".to_string(),
            timeout_secs: 30,
            max_redirects: 5,
            max_retries: 2,
            retry_backoff_ms: 500,
            min_delay_floor_secs: 1.0,
            line_break_marker: "<br />".to_string(),
            mileage_strip_digits: false,
            strict_sold_flag: false,
            labels: FieldLabels::default(),
        }
    }
}

impl Config {
    /// Load from a CONL file; missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_conl(&content).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    pub fn from_conl(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_conl::from_str(content).map_err(|e| ConfigError::Parse {
            path: Default::default(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=MAX_DELAY_SECS).contains(&self.min_delay_floor_secs) {
            return Err(ConfigError::Invalid(format!(
                "min_delay_floor_secs must be between 0 and {}, got {}",
                MAX_DELAY_SECS, self.min_delay_floor_secs
            )));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout_secs must be positive".to_string()));
        }
        let labels = &self.labels;
        for (name, label) in [
            ("mileage", &labels.mileage),
            ("transmission", &labels.transmission),
            ("vin", &labels.vin),
            ("location", &labels.location),
        ] {
            if label.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("labels.{} must not be empty", name)));
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Apply the configured floor to a requested inter-request delay.
    /// Anything above `MAX_DELAY_SECS` is rejected.
    pub fn effective_delay(&self, requested_secs: Option<f64>) -> Result<Duration, ConfigError> {
        let requested = requested_secs
            .filter(|s| s.is_finite())
            .unwrap_or(self.min_delay_floor_secs);
        let secs = requested.max(self.min_delay_floor_secs);
        if secs > MAX_DELAY_SECS {
            return Err(ConfigError::Invalid(format!(
                "delay must be at most {} seconds, got {}",
                MAX_DELAY_SECS, secs
            )));
        }
        Duration::try_from_secs_f64(secs)
            .map_err(|e| ConfigError::Invalid(format!("delay of {} seconds: {}", secs, e)))
    }
}
