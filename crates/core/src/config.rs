//! Gating configuration and tuning constants.
//!
//! Every threshold the delay estimator and the episode controller consult lives
//! here as a named constant, and [`GateConfig`] carries a copy of each so they can
//! be tuned from a TOML file or the command line.

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Cooldown applied when an episode starts and nothing adjusts it.
pub const DEFAULT_DELAY: Duration = Duration::from_secs(3);
/// Lower clamp for the computed cooldown.
pub const MIN_DELAY: Duration = Duration::from_millis(500);
/// Upper clamp for the computed cooldown.
pub const MAX_DELAY: Duration = Duration::from_secs(10);

/// Below this smoothed RTT the path is considered excellent.
pub const RTT_EXCELLENT: Duration = Duration::from_millis(50);
/// Below this smoothed RTT the path is considered good.
pub const RTT_GOOD: Duration = Duration::from_millis(100);
/// Above this smoothed RTT the path is considered poor.
pub const RTT_POOR: Duration = Duration::from_millis(200);

/// Loss rates are expressed in per-mille (lost * 1000 / sent).
pub const LOSS_RATE_LOW: u64 = 10;
pub const LOSS_RATE_MEDIUM: u64 = 30;
pub const LOSS_RATE_HIGH: u64 = 50;

/// More than this many consecutive losses counts as a moderate burst.
pub const CONSECUTIVE_LOSSES_MODERATE: u32 = 3;
/// More than this many consecutive losses counts as a severe burst.
pub const CONSECUTIVE_LOSSES_SEVERE: u32 = 5;

/// Two new losses closer together than this are counted as consecutive.
pub const LOSS_BURST_WINDOW: Duration = Duration::from_secs(1);
/// A previous loss more recent than this marks the loss pattern as frequent.
pub const FREQUENT_LOSS_WINDOW: Duration = Duration::from_secs(1);
/// A previous loss older than this marks the path as recovering.
pub const RECOVERY_WINDOW: Duration = Duration::from_secs(5);

/// Maximum number of concurrently tracked flows.
pub const MAX_FLOWS: usize = 1024;

/// Floor returned by the ssthresh query.
pub const MIN_SSTHRESH: u32 = 2;
/// Floor returned by the undo-cwnd query.
pub const MIN_UNDO_CWND: u32 = 10;

/// Percentage multipliers applied by each estimator band.
///
/// Each value is a numerator over 100: `delay = delay * pct / 100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandMultipliers {
    pub rtt_excellent: u64,
    pub rtt_good: u64,
    pub rtt_poor: u64,
    pub loss_rate_low: u64,
    pub loss_rate_medium: u64,
    pub loss_rate_high: u64,
    pub consecutive_moderate: u64,
    pub consecutive_severe: u64,
    pub frequent_loss: u64,
    pub recovering: u64,
}

impl Default for BandMultipliers {
    fn default() -> Self {
        Self {
            rtt_excellent: 60,        // -40%
            rtt_good: 80,             // -20%
            rtt_poor: 140,            // +40%
            loss_rate_low: 130,       // +30%
            loss_rate_medium: 85,     // -15%
            loss_rate_high: 70,       // -30%
            consecutive_moderate: 70, // -30%
            consecutive_severe: 50,   // -50%
            frequent_loss: 60,        // -40%
            recovering: 120,          // +20%
        }
    }
}

/// Configuration for the adaptive cooldown gate.
///
/// Durations are (de)serialized as integer milliseconds, so a TOML file reads
/// `min_delay = 500` rather than a nested duration table. Missing keys fall back
/// to the defaults above.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    #[serde(with = "serde_millis")]
    pub default_delay: Duration,
    #[serde(with = "serde_millis")]
    pub min_delay: Duration,
    #[serde(with = "serde_millis")]
    pub max_delay: Duration,

    #[serde(with = "serde_millis")]
    pub rtt_excellent: Duration,
    #[serde(with = "serde_millis")]
    pub rtt_good: Duration,
    #[serde(with = "serde_millis")]
    pub rtt_poor: Duration,

    pub loss_rate_low: u64,
    pub loss_rate_medium: u64,
    pub loss_rate_high: u64,

    pub consecutive_losses_moderate: u32,
    pub consecutive_losses_severe: u32,

    #[serde(with = "serde_millis")]
    pub loss_burst_window: Duration,
    #[serde(with = "serde_millis")]
    pub frequent_loss_window: Duration,
    #[serde(with = "serde_millis")]
    pub recovery_window: Duration,

    /// Flows beyond this count are refused and run ungated.
    pub max_flows: usize,
    pub min_ssthresh: u32,
    pub min_undo_cwnd: u32,

    pub multipliers: BandMultipliers,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            default_delay: DEFAULT_DELAY,
            min_delay: MIN_DELAY,
            max_delay: MAX_DELAY,
            rtt_excellent: RTT_EXCELLENT,
            rtt_good: RTT_GOOD,
            rtt_poor: RTT_POOR,
            loss_rate_low: LOSS_RATE_LOW,
            loss_rate_medium: LOSS_RATE_MEDIUM,
            loss_rate_high: LOSS_RATE_HIGH,
            consecutive_losses_moderate: CONSECUTIVE_LOSSES_MODERATE,
            consecutive_losses_severe: CONSECUTIVE_LOSSES_SEVERE,
            loss_burst_window: LOSS_BURST_WINDOW,
            frequent_loss_window: FREQUENT_LOSS_WINDOW,
            recovery_window: RECOVERY_WINDOW,
            max_flows: MAX_FLOWS,
            min_ssthresh: MIN_SSTHRESH,
            min_undo_cwnd: MIN_UNDO_CWND,
            multipliers: BandMultipliers::default(),
        }
    }
}

impl GateConfig {
    /// Parse a (possibly partial) TOML document and validate the result.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: GateConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let contents =
            std::fs::read_to_string(&path).map_err(|source| ConfigError::Io { path, source })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_delay > self.max_delay {
            return Err(invalid(
                "min_delay",
                format!("{:?} exceeds max_delay {:?}", self.min_delay, self.max_delay),
            ));
        }
        if self.default_delay < self.min_delay || self.default_delay > self.max_delay {
            return Err(invalid(
                "default_delay",
                format!(
                    "{:?} outside [{:?}, {:?}]",
                    self.default_delay, self.min_delay, self.max_delay
                ),
            ));
        }
        if !(self.rtt_excellent < self.rtt_good && self.rtt_good <= self.rtt_poor) {
            return Err(invalid(
                "rtt_good",
                "RTT bands must satisfy rtt_excellent < rtt_good <= rtt_poor".to_string(),
            ));
        }
        if !(self.loss_rate_low <= self.loss_rate_medium
            && self.loss_rate_medium < self.loss_rate_high)
        {
            return Err(invalid(
                "loss_rate_medium",
                "loss bands must satisfy low <= medium < high".to_string(),
            ));
        }
        if self.consecutive_losses_moderate >= self.consecutive_losses_severe {
            return Err(invalid(
                "consecutive_losses_moderate",
                "must be below consecutive_losses_severe".to_string(),
            ));
        }
        if self.frequent_loss_window > self.recovery_window {
            return Err(invalid(
                "frequent_loss_window",
                "must not exceed recovery_window".to_string(),
            ));
        }
        if self.max_flows == 0 {
            return Err(invalid("max_flows", "must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Default cooldown in nanoseconds, as stored in fresh flow records.
    pub fn default_delay_nanos(&self) -> u64 {
        as_nanos(self.default_delay)
    }
}

fn invalid(field: &'static str, reason: String) -> ConfigError {
    ConfigError::Invalid { field, reason }
}

pub(crate) fn as_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Command line / environment overrides layered on top of an optional file.
#[derive(clap::Parser, Debug, Default, Clone, Serialize, Deserialize)]
pub struct ConfigArgs {
    /// Path to a TOML file with gate tuning values.
    #[arg(long = "config", env = "FLOWGATE_CONFIG")]
    pub config_path: Option<PathBuf>,

    /// Override the maximum number of tracked flows.
    #[arg(long, env = "FLOWGATE_MAX_FLOWS")]
    pub max_flows: Option<usize>,

    /// Override the lower cooldown clamp (milliseconds).
    #[arg(long, env = "FLOWGATE_MIN_DELAY_MS")]
    pub min_delay_ms: Option<u64>,

    /// Override the upper cooldown clamp (milliseconds).
    #[arg(long, env = "FLOWGATE_MAX_DELAY_MS")]
    pub max_delay_ms: Option<u64>,
}

impl ConfigArgs {
    /// Resolve file, then explicit overrides, then validate.
    pub fn build(self) -> Result<GateConfig, ConfigError> {
        let mut config = match self.config_path {
            Some(path) => GateConfig::load(path)?,
            None => GateConfig::default(),
        };
        if let Some(max_flows) = self.max_flows {
            config.max_flows = max_flows;
        }
        if let Some(ms) = self.min_delay_ms {
            config.min_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.max_delay_ms {
            config.max_delay = Duration::from_millis(ms);
        }
        config.validate()?;
        Ok(config)
    }
}

mod serde_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(value.as_millis()).map_err(serde::ser::Error::custom)?;
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
