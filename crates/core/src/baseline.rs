//! Baseline congestion-avoidance collaborator.
//!
//! The gate never grows the window itself; it decides whether the host's own
//! increase step may run. [`CongestionAvoidance`] is that step as seen from the
//! gate. [`RenoBaseline`] is a small Reno-style stand-in used by the replay
//! tool and tests.

/// The host's window-increase step.
pub trait CongestionAvoidance {
    /// Run one congestion-avoidance step for an ack covering `acked` segments.
    fn cong_avoid(&mut self, ack: u32, acked: u32);

    /// Current congestion window in segments.
    fn cwnd(&self) -> u32;
}

/// Reno window growth: slow start below ssthresh, then one segment per
/// window's worth of acked segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenoBaseline {
    cwnd: u32,
    ssthresh: u32,
    cwnd_cnt: u32,
    cwnd_clamp: u32,
}

impl RenoBaseline {
    pub fn new(initial_cwnd: u32) -> Self {
        Self {
            cwnd: initial_cwnd.max(1),
            ssthresh: u32::MAX,
            cwnd_cnt: 0,
            cwnd_clamp: u32::MAX,
        }
    }

    pub fn with_clamp(mut self, cwnd_clamp: u32) -> Self {
        self.cwnd_clamp = cwnd_clamp.max(1);
        self.cwnd = self.cwnd.min(self.cwnd_clamp);
        self
    }

    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    pub fn in_slow_start(&self) -> bool {
        self.cwnd < self.ssthresh
    }

    /// Host loss response: set ssthresh and drop the window to it.
    pub fn enter_recovery(&mut self, ssthresh: u32) {
        self.ssthresh = ssthresh.max(1);
        self.cwnd = self.ssthresh;
        self.cwnd_cnt = 0;
    }

    /// Restore a window after a spurious-loss undo.
    pub fn restore(&mut self, cwnd: u32) {
        self.cwnd = cwnd.clamp(1, self.cwnd_clamp);
    }

    fn slow_start(&mut self, acked: u32) -> u32 {
        let cwnd = self.cwnd.saturating_add(acked).min(self.ssthresh);
        let leftover = acked - (cwnd - self.cwnd).min(acked);
        self.cwnd = cwnd.min(self.cwnd_clamp);
        leftover
    }

    fn additive_increase(&mut self, acked: u32) {
        let w = self.cwnd.max(1);
        if self.cwnd_cnt >= w {
            self.cwnd_cnt = 0;
            self.cwnd = self.cwnd.saturating_add(1);
        }
        self.cwnd_cnt = self.cwnd_cnt.saturating_add(acked);
        if self.cwnd_cnt >= w {
            let delta = self.cwnd_cnt / w;
            self.cwnd_cnt -= delta * w;
            self.cwnd = self.cwnd.saturating_add(delta);
        }
        self.cwnd = self.cwnd.min(self.cwnd_clamp);
    }
}

impl CongestionAvoidance for RenoBaseline {
    fn cong_avoid(&mut self, _ack: u32, acked: u32) {
        let mut acked = acked;
        if self.in_slow_start() {
            acked = self.slow_start(acked);
            if acked == 0 {
                return;
            }
        }
        self.additive_increase(acked);
    }

    fn cwnd(&self) -> u32 {
        self.cwnd
    }
}
