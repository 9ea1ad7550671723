//! Congestion episode state machine.
//!
//! ```text
//! ┌────────┐  lossy snapshot   ┌───────────┐
//! │  Idle  │──────────────────►│ Congested │──┐ lossy snapshot
//! └────────┘                   └─────┬─────┘◄─┘ (cooldown fixed)
//!      ▲    loss-free snapshot       │
//!      └─────────────────────────────┘
//! ```
//!
//! The cooldown is chosen once, when the episode starts, and stays fixed until
//! a loss-free snapshot ends the episode.

use serde::Serialize;

/// Phase of a flow's congestion episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EpisodePhase {
    /// No loss reported; the baseline runs on every ack.
    Idle,
    /// Loss reported; baseline growth is withheld until the cooldown elapses.
    Congested,
}

/// Per-flow episode bookkeeping.
///
/// `episode_start_ns == 0` means no episode has been stamped yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EpisodeState {
    pub in_congestion: bool,
    pub episode_start_ns: u64,
}

impl EpisodeState {
    pub fn phase(&self) -> EpisodePhase {
        if self.in_congestion {
            EpisodePhase::Congested
        } else {
            EpisodePhase::Idle
        }
    }

    /// Mark the flow congested. Returns `true` when this stamps a new episode
    /// start, i.e. when the caller must compute a fresh cooldown.
    pub(crate) fn enter_congestion(&mut self, now_ns: u64) -> bool {
        self.in_congestion = true;
        if self.episode_start_ns == 0 {
            self.episode_start_ns = now_ns;
            return true;
        }
        false
    }

    /// End the episode. Returns `true` if the flow was congested.
    pub(crate) fn clear(&mut self) -> bool {
        let was_congested = self.in_congestion;
        self.in_congestion = false;
        self.episode_start_ns = 0;
        was_congested
    }

    pub fn elapsed_ns(&self, now_ns: u64) -> u64 {
        now_ns.saturating_sub(self.episode_start_ns)
    }
}
