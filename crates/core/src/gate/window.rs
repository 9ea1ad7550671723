//! Window change observation.
//!
//! Purely diagnostic: nothing here feeds back into gating decisions.

use serde::Serialize;

use crate::flow::{FlowId, FlowStatistics};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WindowObservation {
    pub last_seen_window_size: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowChange {
    pub prev: u32,
    pub new: u32,
}

impl WindowObservation {
    pub fn seeded(cwnd: u32) -> Self {
        Self {
            last_seen_window_size: Some(cwnd),
        }
    }

    /// Record `cwnd`, returning the change if it differs from the last value seen.
    pub(crate) fn observe(&mut self, cwnd: u32) -> Option<WindowChange> {
        match self.last_seen_window_size.replace(cwnd) {
            Some(prev) if prev != cwnd => Some(WindowChange { prev, new: cwnd }),
            _ => None,
        }
    }
}

pub(crate) fn observe_window(
    flow: FlowId,
    observation: &mut WindowObservation,
    cwnd: u32,
    stats: &FlowStatistics,
) -> Option<WindowChange> {
    let change = observation.observe(cwnd)?;
    tracing::debug!(
        %flow,
        prev = change.prev,
        new = change.new,
        rtt_us = stats.last_rtt_us,
        loss_rate_permille = stats.loss_rate_permille(),
        "Window size changed"
    );
    Some(change)
}
