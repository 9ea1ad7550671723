//! Cooldown estimation.
//!
//! Starting from the configured default, four bands scale the delay in a fixed
//! order, each one applied to the running value:
//!
//! | Band | Condition (defaults) | Factor |
//! |------|----------------------|--------|
//! | RTT | < 50ms / < 100ms / > 200ms | 0.60 / 0.80 / 1.40 |
//! | Loss rate | < 1% / > 5% / > 3% | 1.30 / 0.70 / 0.85 |
//! | Consecutive losses | > 5 / > 3 | 0.50 / 0.70 |
//! | Recency (only after a loss) | < 1s / > 5s since last loss | 0.60 / 1.20 |
//!
//! Scaling is integer `delay * pct / 100` with truncation, so the order matters.
//! The result is clamped to `[min_delay, max_delay]`.

use serde::Serialize;

use crate::config::{as_nanos, BandMultipliers, GateConfig};
use crate::flow::FlowStatistics;

/// A band adjustment that fired during estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Adjustment {
    RttExcellent,
    RttGood,
    RttPoor,
    LossRateLow,
    LossRateMedium,
    LossRateHigh,
    ConsecutiveModerate,
    ConsecutiveSevere,
    FrequentLoss,
    Recovering,
}

/// Outcome of one estimation, with the band that fired at each step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DelayEstimate {
    /// Clamped cooldown in nanoseconds.
    pub delay_ns: u64,
    /// Value before clamping.
    pub unclamped_ns: u64,
    pub rtt: Option<Adjustment>,
    pub loss_rate: Option<Adjustment>,
    pub consecutive: Option<Adjustment>,
    pub recency: Option<Adjustment>,
}

impl DelayEstimate {
    pub fn was_clamped(&self) -> bool {
        self.delay_ns != self.unclamped_ns
    }

    pub fn adjustments(&self) -> impl Iterator<Item = Adjustment> {
        [self.rtt, self.loss_rate, self.consecutive, self.recency]
            .into_iter()
            .flatten()
    }
}

/// Pure function of flow statistics and the current time.
#[derive(Debug, Clone)]
pub struct DelayEstimator {
    base_ns: u64,
    min_ns: u64,
    max_ns: u64,
    rtt_excellent_ns: u64,
    rtt_good_ns: u64,
    rtt_poor_ns: u64,
    loss_rate_low: u64,
    loss_rate_medium: u64,
    loss_rate_high: u64,
    consecutive_moderate: u32,
    consecutive_severe: u32,
    frequent_loss_ns: u64,
    recovery_ns: u64,
    pct: BandMultipliers,
}

impl Default for DelayEstimator {
    fn default() -> Self {
        Self::from_config(&GateConfig::default())
    }
}

impl DelayEstimator {
    pub fn from_config(config: &GateConfig) -> Self {
        Self {
            base_ns: as_nanos(config.default_delay),
            min_ns: as_nanos(config.min_delay),
            max_ns: as_nanos(config.max_delay),
            rtt_excellent_ns: as_nanos(config.rtt_excellent),
            rtt_good_ns: as_nanos(config.rtt_good),
            rtt_poor_ns: as_nanos(config.rtt_poor),
            loss_rate_low: config.loss_rate_low,
            loss_rate_medium: config.loss_rate_medium,
            loss_rate_high: config.loss_rate_high,
            consecutive_moderate: config.consecutive_losses_moderate,
            consecutive_severe: config.consecutive_losses_severe,
            frequent_loss_ns: as_nanos(config.frequent_loss_window),
            recovery_ns: as_nanos(config.recovery_window),
            pct: config.multipliers,
        }
    }

    /// Clamped cooldown in nanoseconds.
    pub fn estimate(&self, stats: &FlowStatistics, now_ns: u64) -> u64 {
        self.estimate_detailed(stats, now_ns).delay_ns
    }

    pub fn estimate_detailed(&self, stats: &FlowStatistics, now_ns: u64) -> DelayEstimate {
        let mut delay = self.base_ns;

        let rtt_ns = stats.rtt_nanos();
        let rtt = if rtt_ns < self.rtt_excellent_ns {
            Some((Adjustment::RttExcellent, self.pct.rtt_excellent))
        } else if rtt_ns < self.rtt_good_ns {
            Some((Adjustment::RttGood, self.pct.rtt_good))
        } else if rtt_ns > self.rtt_poor_ns {
            Some((Adjustment::RttPoor, self.pct.rtt_poor))
        } else {
            None
        };
        let rtt = apply(&mut delay, rtt);
        if let Some(band) = rtt {
            tracing::trace!(rtt_ns, ?band, delay_ns = delay, "RTT band applied");
        }

        let loss_rate_permille = stats.loss_rate_permille();
        let loss = if loss_rate_permille < self.loss_rate_low {
            Some((Adjustment::LossRateLow, self.pct.loss_rate_low))
        } else if loss_rate_permille > self.loss_rate_high {
            Some((Adjustment::LossRateHigh, self.pct.loss_rate_high))
        } else if loss_rate_permille > self.loss_rate_medium {
            Some((Adjustment::LossRateMedium, self.pct.loss_rate_medium))
        } else {
            None
        };
        let loss_rate = apply(&mut delay, loss);
        if let Some(band) = loss_rate {
            tracing::trace!(loss_rate_permille, ?band, delay_ns = delay, "loss-rate band applied");
        }

        let consecutive_losses = stats.consecutive_losses;
        let consecutive = if consecutive_losses > self.consecutive_severe {
            Some((Adjustment::ConsecutiveSevere, self.pct.consecutive_severe))
        } else if consecutive_losses > self.consecutive_moderate {
            Some((Adjustment::ConsecutiveModerate, self.pct.consecutive_moderate))
        } else {
            None
        };
        let consecutive = apply(&mut delay, consecutive);
        if let Some(band) = consecutive {
            tracing::trace!(consecutive_losses, ?band, delay_ns = delay, "burst band applied");
        }

        let recency = if stats.last_loss_time_ns > 0 {
            let since_loss_ns = now_ns.saturating_sub(stats.last_loss_time_ns);
            if since_loss_ns < self.frequent_loss_ns {
                Some((Adjustment::FrequentLoss, self.pct.frequent_loss))
            } else if since_loss_ns > self.recovery_ns {
                Some((Adjustment::Recovering, self.pct.recovering))
            } else {
                None
            }
        } else {
            None
        };
        let recency = apply(&mut delay, recency);
        if let Some(band) = recency {
            tracing::trace!(?band, delay_ns = delay, "recency band applied");
        }

        let unclamped_ns = delay;
        let delay_ns = delay.clamp(self.min_ns, self.max_ns.max(self.min_ns));
        if delay_ns != unclamped_ns {
            tracing::trace!(unclamped_ns, delay_ns, "delay clamped");
        }
        tracing::debug!(
            delay_ns,
            delay_ms = delay_ns / 1_000_000,
            "calculated dynamic delay"
        );

        DelayEstimate {
            delay_ns,
            unclamped_ns,
            rtt,
            loss_rate,
            consecutive,
            recency,
        }
    }

    pub fn min_delay_ns(&self) -> u64 {
        self.min_ns
    }

    pub fn max_delay_ns(&self) -> u64 {
        self.max_ns
    }
}

fn apply(delay: &mut u64, band: Option<(Adjustment, u64)>) -> Option<Adjustment> {
    let (adjustment, pct) = band?;
    *delay = delay.saturating_mul(pct) / 100;
    Some(adjustment)
}
