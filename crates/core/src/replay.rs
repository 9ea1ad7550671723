//! Offline replay of recorded flow telemetry.
//!
//! A trace is a JSON-lines file, one event per line:
//!
//! ```text
//! {"t_ms": 0,   "flow": 7, "event": "init", "cwnd": 10}
//! {"t_ms": 30,  "flow": 7, "event": "ack",  "rtt_us": 30000, "lost": 0, "sent": 10}
//! {"t_ms": 60,  "flow": 7, "event": "ack",  "rtt_us": 31000, "lost": 1, "sent": 21}
//! {"t_ms": 900, "flow": 7, "event": "release"}
//! ```
//!
//! Events drive an [`AdaptiveGate`] on a virtual clock, with a
//! [`RenoBaseline`] per flow standing in for the host's window. Every ack
//! yields one [`ReplayRecord`]. Blank lines and lines starting with `#` are
//! skipped.

use std::collections::HashMap;
use std::io::{self, BufRead, Write};

use serde::{Deserialize, Serialize};

use crate::baseline::{CongestionAvoidance, RenoBaseline};
use crate::config::GateConfig;
use crate::engine::AdaptiveGate;
use crate::errors::ReplayError;
use crate::flow::{FlowId, TelemetrySnapshot};
use crate::gate::GateDecision;
use crate::time::{TimeSource, VirtualTime};

const NANOS_PER_MILLI: u64 = 1_000_000;

/// Initial window for flows whose trace does not carry one.
pub const DEFAULT_INITIAL_CWND: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Init,
    Ack,
    Release,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Milliseconds since the start of the trace.
    pub t_ms: u64,
    pub flow: FlowId,
    pub event: EventKind,
    #[serde(default)]
    pub rtt_us: u64,
    #[serde(default)]
    pub lost: u64,
    #[serde(default)]
    pub sent: u64,
    /// Only read on `init`; acks report the replayed baseline's window.
    #[serde(default)]
    pub cwnd: Option<u32>,
    /// Segments covered by an ack.
    #[serde(default = "default_acked")]
    pub acked: u32,
}

fn default_acked() -> u32 {
    1
}

/// Decision for one replayed ack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayRecord {
    pub t_ms: u64,
    pub flow: FlowId,
    #[serde(flatten)]
    pub decision: GateDecision,
    /// Baseline window after the ack.
    pub cwnd: u32,
    pub ssthresh: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub events: usize,
    pub acks: usize,
    pub gated_acks: usize,
    pub episodes: usize,
}

/// Parse one trace line. Returns `None` for blank and comment lines.
pub fn parse_line(line: &str, line_no: usize) -> Result<Option<TraceEvent>, ReplayError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|source| ReplayError::Parse {
            line: line_no,
            source,
        })
}

pub struct Replayer {
    gate: AdaptiveGate<VirtualTime>,
    time: VirtualTime,
    baselines: HashMap<FlowId, RenoBaseline>,
    summary: ReplaySummary,
    ack_seq: u32,
}

impl Replayer {
    pub fn new(config: GateConfig) -> Self {
        // Trace time zero maps to 1ns: a zero timestamp reads as "no episode".
        let time = VirtualTime::with_initial_time(1);
        Self {
            gate: AdaptiveGate::new_with_time_source(config, time.clone()),
            time,
            baselines: HashMap::new(),
            summary: ReplaySummary::default(),
            ack_seq: 0,
        }
    }

    pub fn gate(&self) -> &AdaptiveGate<VirtualTime> {
        &self.gate
    }

    pub fn summary(&self) -> ReplaySummary {
        self.summary
    }

    /// Apply one event. Returns a record for acks.
    pub fn apply(&mut self, event: &TraceEvent) -> Option<ReplayRecord> {
        let target = event
            .t_ms
            .saturating_mul(NANOS_PER_MILLI)
            .saturating_add(1);
        if target < self.time.now_nanos() {
            tracing::warn!(t_ms = event.t_ms, flow = %event.flow, "Out-of-order event, clock held");
        }
        self.time.advance_to(target);
        self.summary.events += 1;

        match event.event {
            EventKind::Init => {
                let baseline = RenoBaseline::new(event.cwnd.unwrap_or(DEFAULT_INITIAL_CWND));
                let telemetry =
                    TelemetrySnapshot::new(event.rtt_us, event.lost, event.sent, baseline.cwnd());
                self.gate.init(event.flow, &telemetry);
                self.baselines.insert(event.flow, baseline);
                None
            }
            EventKind::Release => {
                self.gate.release(event.flow);
                self.baselines.remove(&event.flow);
                None
            }
            EventKind::Ack => Some(self.ack(event)),
        }
    }

    fn ack(&mut self, event: &TraceEvent) -> ReplayRecord {
        self.ack_seq = self.ack_seq.wrapping_add(1);
        let ack = self.ack_seq;
        let now_ns = self.time.now_nanos();
        let gate = &self.gate;
        let baseline = self
            .baselines
            .entry(event.flow)
            .or_insert_with(|| RenoBaseline::new(event.cwnd.unwrap_or(DEFAULT_INITIAL_CWND)));
        let telemetry =
            TelemetrySnapshot::new(event.rtt_us, event.lost, event.sent, baseline.cwnd());
        let decision = gate.on_ack_then(event.flow, &telemetry, now_ns, |decision| {
            if decision.permit_growth {
                baseline.cong_avoid(ack, event.acked);
            } else if decision.episode_started {
                // The host's own loss response: halve the window.
                let ssthresh = gate.ssthresh(event.flow, baseline.cwnd());
                baseline.enter_recovery(ssthresh);
            }
            baseline.cwnd()
        });
        if decision.episode_started {
            self.summary.episodes += 1;
        }

        self.summary.acks += 1;
        if !decision.permit_growth {
            self.summary.gated_acks += 1;
        }
        ReplayRecord {
            t_ms: event.t_ms,
            flow: event.flow,
            decision,
            cwnd: baseline.cwnd(),
            ssthresh: baseline.ssthresh(),
        }
    }

    /// Replay a whole trace, writing one JSON line per ack to `out`.
    pub fn run<R: BufRead, W: Write>(
        &mut self,
        input: R,
        mut out: W,
    ) -> Result<ReplaySummary, ReplayError> {
        for (idx, line) in input.lines().enumerate() {
            let line = line?;
            let Some(event) = parse_line(&line, idx + 1)? else {
                continue;
            };
            if let Some(record) = self.apply(&event) {
                serde_json::to_writer(&mut out, &record).map_err(io::Error::from)?;
                out.write_all(b"\n")?;
            }
        }
        out.flush()?;
        tracing::info!(
            events = self.summary.events,
            acks = self.summary.acks,
            gated_acks = self.summary.gated_acks,
            episodes = self.summary.episodes,
            "Replay finished"
        );
        Ok(self.summary)
    }
}
