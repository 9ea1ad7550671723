/// Baseline congestion-avoidance collaborator and the Reno stand-in.
pub mod baseline;

/// Gate tuning: defaults, TOML loading and command line overrides.
pub mod config;

/// Host-facing hooks: flow lifecycle, per-ack gating and window queries.
mod engine;
pub use engine::AdaptiveGate;

pub mod errors;

/// Per-flow identity, telemetry, statistics and the bounded flow table.
pub mod flow;

/// Cooldown estimation and the congestion episode state machine.
pub mod gate;

/// Offline replay of recorded telemetry traces.
pub mod replay;

/// Time abstraction so the engine can run on a virtual clock.
pub mod time;

/// Tracing subscriber setup.
pub mod tracing;

pub use baseline::{CongestionAvoidance, RenoBaseline};
pub use config::{BandMultipliers, GateConfig};
pub use errors::{ConfigError, ReplayError, StoreError};
pub use flow::{FlowId, FlowRecord, FlowStatistics, TelemetrySnapshot};
pub use gate::{
    Adjustment, DelayEstimate, DelayEstimator, EpisodeController, EpisodePhase, EpisodeState,
    GateDecision,
};
pub use replay::{Replayer, TraceEvent};
pub use time::{RealTime, TimeSource, VirtualTime};
