//! Adaptive cooldown gating.
//!
//! When a flow starts losing segments, its window growth is frozen for a
//! cooldown computed from recent RTT, loss rate, loss burstiness and loss
//! recency. Once the cooldown has elapsed the baseline algorithm runs again on
//! every ack until the loss clears.
//!
//! ## Components
//!
//! - [`DelayEstimator`]: pure function from flow statistics to a bounded cooldown.
//! - [`EpisodeController`]: the `Idle`/`Congested` state machine and the
//!   per-ack growth decision.
//! - Window observation: diagnostic tracing of window changes, with no effect
//!   on decisions.

mod controller;
mod delay;
mod state;
mod window;


pub use controller::{EpisodeController, GateDecision};
pub use delay::{Adjustment, DelayEstimate, DelayEstimator};
pub use state::{EpisodePhase, EpisodeState};
pub use window::{WindowChange, WindowObservation};

pub(crate) use window::observe_window;
