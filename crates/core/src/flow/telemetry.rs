use serde::{Deserialize, Serialize};

/// Telemetry for one flow, captured by the host when an ack is processed.
///
/// The counters are cumulative snapshots, not deltas: the engine overwrites
/// its copies with whatever the host reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Smoothed RTT estimate in microseconds.
    pub rtt_us: u64,
    /// Segments currently considered lost.
    pub segments_lost: u64,
    /// Segments sent over the lifetime of the flow.
    pub segments_sent: u64,
    /// Congestion window as currently reported by the host.
    pub cwnd: u32,
}

impl TelemetrySnapshot {
    pub fn new(rtt_us: u64, segments_lost: u64, segments_sent: u64, cwnd: u32) -> Self {
        Self {
            rtt_us,
            segments_lost,
            segments_sent,
            cwnd,
        }
    }

    /// Build a snapshot from a kernel-style `srtt_us`, which is stored left-shifted by 3.
    pub fn from_scaled_srtt(
        srtt_us_x8: u32,
        segments_lost: u64,
        segments_sent: u64,
        cwnd: u32,
    ) -> Self {
        Self::new((srtt_us_x8 >> 3) as u64, segments_lost, segments_sent, cwnd)
    }

    pub fn is_lossy(&self) -> bool {
        self.segments_lost > 0
    }
}
