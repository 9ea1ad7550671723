//! Episode controller.
//!
//! Decides on every ack whether the baseline congestion-avoidance step may run.
//! Loss opens an episode and fixes its cooldown; growth stays frozen until the
//! cooldown has elapsed, after which the baseline runs on every ack until a
//! loss-free snapshot closes the episode.

use serde::Serialize;

use crate::config::{as_nanos, GateConfig};
use crate::flow::{FlowId, FlowRecord, LossSignal};

use super::delay::DelayEstimator;
use super::state::EpisodePhase;

/// Outcome of gating one ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateDecision {
    /// Whether the host may run its cwnd increase step for this ack.
    pub permit_growth: bool,
    pub phase: EpisodePhase,
    /// This ack opened a new episode and recomputed the cooldown.
    pub episode_started: bool,
    /// Time spent in the current episode; zero when idle.
    pub elapsed_ns: u64,
    /// Cooldown in force for the current (or last) episode.
    pub delay_ns: u64,
}

impl GateDecision {
    /// Decision for acks that are not gated at all (untracked flows).
    pub fn ungated() -> Self {
        Self {
            permit_growth: true,
            phase: EpisodePhase::Idle,
            episode_started: false,
            elapsed_ns: 0,
            delay_ns: 0,
        }
    }

    /// Decision for the ack that lazily created a missing flow record; the
    /// event itself is not processed.
    pub fn skipped() -> Self {
        Self {
            permit_growth: false,
            ..Self::ungated()
        }
    }
}

#[derive(Debug, Clone)]
pub struct EpisodeController {
    estimator: DelayEstimator,
    burst_window_ns: u64,
    min_ssthresh: u32,
    min_undo_cwnd: u32,
}

impl Default for EpisodeController {
    fn default() -> Self {
        Self::from_config(&GateConfig::default())
    }
}

impl EpisodeController {
    pub fn from_config(config: &GateConfig) -> Self {
        Self {
            estimator: DelayEstimator::from_config(config),
            burst_window_ns: as_nanos(config.loss_burst_window),
            min_ssthresh: config.min_ssthresh,
            min_undo_cwnd: config.min_undo_cwnd,
        }
    }

    pub fn estimator(&self) -> &DelayEstimator {
        &self.estimator
    }

    /// Window for counting new losses as consecutive, used by the metrics step.
    pub(crate) fn burst_window_ns(&self) -> u64 {
        self.burst_window_ns
    }

    /// Advance the episode state machine for one ack and decide on growth.
    ///
    /// Expects `record.stats` to already reflect this ack's telemetry.
    pub(crate) fn on_ack(
        &self,
        flow: FlowId,
        record: &mut FlowRecord,
        signal: LossSignal,
        now_ns: u64,
    ) -> GateDecision {
        let mut episode_started = false;
        if signal.lossy {
            if record.episode.enter_congestion(now_ns) {
                record.stats.dynamic_delay_ns = self.estimator.estimate(&record.stats, now_ns);
                episode_started = true;
                tracing::debug!(
                    %flow,
                    delay_ns = record.stats.dynamic_delay_ns,
                    consecutive_losses = record.stats.consecutive_losses,
                    "Congestion detected"
                );
            }
        } else if record.episode.clear() {
            record.stats.consecutive_losses = 0;
            tracing::debug!(%flow, "Recovered from congestion");
        }

        let delay_ns = record.stats.dynamic_delay_ns;
        if !record.episode.in_congestion {
            return GateDecision {
                permit_growth: true,
                phase: EpisodePhase::Idle,
                episode_started,
                elapsed_ns: 0,
                delay_ns,
            };
        }

        let elapsed_ns = record.episode.elapsed_ns(now_ns);
        let permit_growth = elapsed_ns >= delay_ns;
        if permit_growth {
            tracing::trace!(%flow, elapsed_ns, "Dynamic delay elapsed, adjusting cwnd");
        } else {
            tracing::trace!(%flow, elapsed_ns, delay_ns, "Waiting for cooldown");
        }
        GateDecision {
            permit_growth,
            phase: EpisodePhase::Congested,
            episode_started,
            elapsed_ns,
            delay_ns,
        }
    }

    /// Slow-start threshold after a loss: half the window, never below the floor.
    pub fn ssthresh(&self, cwnd: u32) -> u32 {
        (cwnd / 2).max(self.min_ssthresh)
    }

    /// Window to restore when the host undoes a spurious reduction.
    pub fn undo_cwnd(&self, cwnd: u32) -> u32 {
        cwnd.max(self.min_undo_cwnd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::TelemetrySnapshot;

    const MS: u64 = 1_000_000;
    const SEC: u64 = 1_000 * MS;

    fn ack(
        controller: &EpisodeController,
        record: &mut FlowRecord,
        telemetry: TelemetrySnapshot,
        now_ns: u64,
    ) -> GateDecision {
        let signal = record.stats.record(
            &telemetry,
            now_ns,
            record.episode.in_congestion,
            controller.burst_window_ns(),
        );
        controller.on_ack(FlowId::new(1), record, signal, now_ns)
    }

    #[test]
    fn test_idle_always_permits() {
        let controller = EpisodeController::default();
        let mut record = FlowRecord::new(3 * SEC, 10);
        for i in 1..5 {
            let decision = ack(
                &controller,
                &mut record,
                TelemetrySnapshot::new(30_000, 0, 100 * i, 10),
                i * SEC,
            );
            assert!(decision.permit_growth);
            assert_eq!(decision.phase, EpisodePhase::Idle);
        }
    }

    #[test]
    fn test_episode_start_recomputes_delay() {
        let controller = EpisodeController::default();
        let mut record = FlowRecord::new(3 * SEC, 10);
        // 30ms RTT, 1 lost of 1000, first loss ever -> frequent-loss band also fires
        // because the loss is stamped at this same instant.
        let decision = ack(
            &controller,
            &mut record,
            TelemetrySnapshot::new(30_000, 1, 1000, 10),
            SEC,
        );
        assert!(decision.episode_started);
        assert!(!decision.permit_growth);
        // 3s * 0.6 * 1.3 * 0.6 = 1.404s
        assert_eq!(decision.delay_ns, 1_404_000_000);
        assert_eq!(record.stats.dynamic_delay_ns, 1_404_000_000);
        assert_eq!(record.episode.episode_start_ns, SEC);
    }

    #[test]
    fn test_gate_opens_at_exactly_the_cooldown() {
        let controller = EpisodeController::default();
        let mut record = FlowRecord::new(3 * SEC, 10);
        let start = SEC;
        let first = ack(
            &controller,
            &mut record,
            TelemetrySnapshot::new(30_000, 1, 1000, 10),
            start,
        );
        let delay = first.delay_ns;

        let before = ack(
            &controller,
            &mut record,
            TelemetrySnapshot::new(30_000, 1, 1000, 10),
            start + delay - 1,
        );
        assert!(!before.permit_growth);
        assert_eq!(before.elapsed_ns, delay - 1);

        let at = ack(
            &controller,
            &mut record,
            TelemetrySnapshot::new(30_000, 1, 1000, 10),
            start + delay,
        );
        assert!(at.permit_growth);

        // Stays open for the rest of the episode.
        let later = ack(
            &controller,
            &mut record,
            TelemetrySnapshot::new(30_000, 1, 1000, 10),
            start + 5 * delay,
        );
        assert!(later.permit_growth);
        assert_eq!(later.phase, EpisodePhase::Congested);
        assert_eq!(record.episode.episode_start_ns, start);
    }

    #[test]
    fn test_recovery_returns_to_idle() {
        let controller = EpisodeController::default();
        let mut record = FlowRecord::new(3 * SEC, 10);
        ack(
            &controller,
            &mut record,
            TelemetrySnapshot::new(30_000, 2, 1000, 10),
            SEC,
        );
        ack(
            &controller,
            &mut record,
            TelemetrySnapshot::new(30_000, 3, 1100, 10),
            SEC + 100 * MS,
        );
        assert_eq!(record.stats.consecutive_losses, 2);

        let decision = ack(
            &controller,
            &mut record,
            TelemetrySnapshot::new(30_000, 0, 1200, 10),
            SEC + 200 * MS,
        );
        assert!(decision.permit_growth);
        assert_eq!(decision.phase, EpisodePhase::Idle);
        assert_eq!(record.stats.consecutive_losses, 0);
        assert!(!record.episode.in_congestion);
        assert_eq!(record.episode.episode_start_ns, 0);
    }

    #[test]
    fn test_ssthresh_and_undo_floors() {
        let controller = EpisodeController::default();
        assert_eq!(controller.ssthresh(100), 50);
        assert_eq!(controller.ssthresh(5), 2);
        assert_eq!(controller.ssthresh(0), 2);
        assert_eq!(controller.undo_cwnd(4), 10);
        assert_eq!(controller.undo_cwnd(40), 40);
    }
}
