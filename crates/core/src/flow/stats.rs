//! Running per-flow statistics and the telemetry ingestion step.

use serde::Serialize;

use super::telemetry::TelemetrySnapshot;

/// Running statistics for one flow.
///
/// All timestamps are nanoseconds from the engine's time source. A
/// `last_loss_time_ns` of zero means no loss has been seen yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlowStatistics {
    /// Segments sent, overwritten from the latest snapshot.
    pub total_packets: u64,
    /// Segments lost, overwritten from the latest lossy snapshot.
    pub lost_packets: u64,
    /// Most recent smoothed RTT in microseconds.
    pub last_rtt_us: u64,
    /// New losses observed less than the burst window apart.
    pub consecutive_losses: u32,
    pub last_loss_time_ns: u64,
    /// Cooldown chosen at the start of the current (or last) episode.
    pub dynamic_delay_ns: u64,
}

/// What a telemetry snapshot said about loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LossSignal {
    /// The snapshot reports lost segments.
    pub lossy: bool,
    /// The lost-segment count grew since the previous update.
    pub new_loss: bool,
}

impl FlowStatistics {
    pub fn new(default_delay_ns: u64) -> Self {
        Self {
            total_packets: 0,
            lost_packets: 0,
            last_rtt_us: 0,
            consecutive_losses: 0,
            last_loss_time_ns: 0,
            dynamic_delay_ns: default_delay_ns,
        }
    }

    /// Loss rate in per-mille; zero when nothing has been sent.
    pub fn loss_rate_permille(&self) -> u64 {
        if self.total_packets == 0 {
            return 0;
        }
        self.lost_packets.saturating_mul(1000) / self.total_packets
    }

    pub fn rtt_nanos(&self) -> u64 {
        self.last_rtt_us.saturating_mul(1000)
    }

    /// Ingest one snapshot.
    ///
    /// RTT and sent count are always overwritten. The lost count is only
    /// overwritten while the snapshot is lossy, and a *new* loss (count grew)
    /// extends or restarts the consecutive-loss run depending on how long ago
    /// the previous new loss was. A loss-free snapshot arriving while the flow
    /// was congested ends the run.
    pub(crate) fn record(
        &mut self,
        telemetry: &TelemetrySnapshot,
        now_ns: u64,
        was_congested: bool,
        burst_window_ns: u64,
    ) -> LossSignal {
        self.last_rtt_us = telemetry.rtt_us;
        self.total_packets = telemetry.segments_sent;

        if !telemetry.is_lossy() {
            if was_congested {
                self.consecutive_losses = 0;
            }
            return LossSignal {
                lossy: false,
                new_loss: false,
            };
        }

        let prev_lost = self.lost_packets;
        self.lost_packets = telemetry.segments_lost;
        let new_loss = self.lost_packets > prev_lost;
        if new_loss {
            let within_burst = self.last_loss_time_ns != 0
                && now_ns.saturating_sub(self.last_loss_time_ns) < burst_window_ns;
            if within_burst {
                self.consecutive_losses = self.consecutive_losses.saturating_add(1);
            } else {
                self.consecutive_losses = 1;
            }
            self.last_loss_time_ns = now_ns;
        }

        LossSignal {
            lossy: true,
            new_loss,
        }
    }
}
