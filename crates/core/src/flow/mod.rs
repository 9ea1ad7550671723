//! Per-flow state: identity, telemetry input, running statistics and the
//! keyed store that owns one record per live flow.
//!
//! A flow's record is created on connection init, mutated on every ack and
//! dropped on teardown. The store is the only shared mutable resource in the
//! engine; every per-ack read-modify-write happens while holding that flow's
//! own record lock, so the statistics, episode state and window observation are
//! always updated together.

mod id;
mod stats;
mod store;
mod telemetry;

pub use id::FlowId;
pub use stats::{FlowStatistics, LossSignal};
pub use store::{FlowHandle, FlowRecord, FlowStateStore};
pub use telemetry::TelemetrySnapshot;
