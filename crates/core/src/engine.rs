//! Flow lifecycle and host-facing hooks.
//!
//! [`AdaptiveGate`] is what a transport stack plugs in. It creates a flow's
//! record on `init`, runs metrics ingestion, the episode controller and the
//! window observer on every ack, answers the ssthresh/undo queries, and drops
//! the record on `release`.
//!
//! ## Usage
//!
//! ```ignore
//! use flowgate::{AdaptiveGate, FlowId, GateConfig, TelemetrySnapshot};
//!
//! let gate = AdaptiveGate::new(GateConfig::default());
//! let flow = FlowId::from(443u16);
//! gate.init(flow, &TelemetrySnapshot::new(30_000, 0, 0, 10));
//!
//! // On every ack: only grow cwnd when the gate permits it.
//! if gate.on_ack(flow, &TelemetrySnapshot::new(30_000, 0, 120, 10)) {
//!     // run the host's congestion-avoidance step
//! }
//!
//! gate.release(flow);
//! ```

use crate::baseline::CongestionAvoidance;
use crate::config::GateConfig;
use crate::flow::{FlowId, FlowRecord, FlowStateStore, FlowStatistics, TelemetrySnapshot};
use crate::gate::{observe_window, EpisodeController, EpisodeState, GateDecision};
use crate::time::{RealTime, TimeSource};

/// Adaptive cooldown gate for all flows handled by one host.
///
/// Safe to share across threads. Events for different flows never contend;
/// events for the same flow are serialized by that flow's record lock, which
/// is held across the baseline step passed to [`AdaptiveGate::on_ack_with`].
///
/// ## Type Parameter
///
/// `T` is the clock used by [`AdaptiveGate::on_ack`]. Defaults to `RealTime`;
/// tests and the replay tool use `VirtualTime`.
pub struct AdaptiveGate<T: TimeSource = RealTime> {
    store: FlowStateStore,
    controller: EpisodeController,
    default_delay_ns: u64,
    time_source: T,
}

impl AdaptiveGate<RealTime> {
    pub fn new(config: GateConfig) -> Self {
        Self::new_with_time_source(config, RealTime::new())
    }
}

impl<T: TimeSource> AdaptiveGate<T> {
    pub fn new_with_time_source(config: GateConfig, time_source: T) -> Self {
        Self {
            store: FlowStateStore::with_capacity(config.max_flows),
            controller: EpisodeController::from_config(&config),
            default_delay_ns: config.default_delay_nanos(),
            time_source,
        }
    }

    /// Start tracking a flow. Re-initializing a live flow resets its record.
    ///
    /// Returns `false` when the flow table is full; such a flow runs ungated.
    pub fn init(&self, flow: FlowId, telemetry: &TelemetrySnapshot) -> bool {
        let record = FlowRecord::new(self.default_delay_ns, telemetry.cwnd);
        match self.store.create(flow, record) {
            Ok(()) => {
                tracing::debug!(
                    %flow,
                    delay_ns = self.default_delay_ns,
                    cwnd = telemetry.cwnd,
                    "Flow initialized with default delay"
                );
                true
            }
            Err(err) => {
                tracing::warn!(%flow, %err, "Flow not tracked, running ungated");
                false
            }
        }
    }

    /// Gate one ack using the engine's clock.
    pub fn on_ack(&self, flow: FlowId, telemetry: &TelemetrySnapshot) -> bool {
        self.on_ack_at(flow, telemetry, self.time_source.now_nanos())
    }

    /// Gate one ack at an explicit timestamp. Returns whether cwnd may grow.
    pub fn on_ack_at(&self, flow: FlowId, telemetry: &TelemetrySnapshot, now_ns: u64) -> bool {
        self.on_ack_at_detailed(flow, telemetry, now_ns).permit_growth
    }

    pub fn on_ack_at_detailed(
        &self,
        flow: FlowId,
        telemetry: &TelemetrySnapshot,
        now_ns: u64,
    ) -> GateDecision {
        self.process(flow, telemetry, now_ns, |_| telemetry.cwnd)
    }

    /// Gate one ack and, when permitted, run `baseline`'s increase step.
    ///
    /// The window observer sees the baseline's window after the step.
    pub fn on_ack_with<B: CongestionAvoidance>(
        &self,
        flow: FlowId,
        telemetry: &TelemetrySnapshot,
        ack: u32,
        acked: u32,
        baseline: &mut B,
    ) -> GateDecision {
        let now_ns = self.time_source.now_nanos();
        self.on_ack_with_at(flow, telemetry, ack, acked, baseline, now_ns)
    }

    pub fn on_ack_with_at<B: CongestionAvoidance>(
        &self,
        flow: FlowId,
        telemetry: &TelemetrySnapshot,
        ack: u32,
        acked: u32,
        baseline: &mut B,
        now_ns: u64,
    ) -> GateDecision {
        self.on_ack_then(flow, telemetry, now_ns, |decision| {
            if decision.permit_growth {
                baseline.cong_avoid(ack, acked);
            }
            baseline.cwnd()
        })
    }

    /// Gate one ack and run the host's own per-ack work in `step`.
    ///
    /// `step` sees the decision and returns the window after the host acted
    /// on it (growth, loss response, or nothing); that window is what the
    /// observer records for this ack. It runs under this flow's record lock
    /// and must not call back into the gate for the same flow.
    pub fn on_ack_then(
        &self,
        flow: FlowId,
        telemetry: &TelemetrySnapshot,
        now_ns: u64,
        step: impl FnOnce(&GateDecision) -> u32,
    ) -> GateDecision {
        self.process(flow, telemetry, now_ns, step)
    }

    fn process(
        &self,
        flow: FlowId,
        telemetry: &TelemetrySnapshot,
        now_ns: u64,
        step: impl FnOnce(&GateDecision) -> u32,
    ) -> GateDecision {
        let Some(handle) = self.store.handle(flow) else {
            // Unknown flow (evicted or never initialized): create it and skip
            // this event, or run ungated if there is no room.
            let decision = if self.init(flow, telemetry) {
                tracing::debug!(%flow, "Flow state missing, reinitialized");
                GateDecision::skipped()
            } else {
                GateDecision::ungated()
            };
            step(&decision);
            return decision;
        };
        // Only this flow's lock is held from here on; other flows proceed.
        let mut record = handle.lock();
        let record = &mut *record;

        let signal = record.stats.record(
            telemetry,
            now_ns,
            record.episode.in_congestion,
            self.controller.burst_window_ns(),
        );
        let decision = self.controller.on_ack(flow, record, signal, now_ns);
        let cwnd_after = step(&decision);
        observe_window(flow, &mut record.window, cwnd_after, &record.stats);
        decision
    }

    /// Slow-start threshold after loss: `max(cwnd / 2, 2)`.
    pub fn ssthresh(&self, flow: FlowId, cwnd: u32) -> u32 {
        let ssthresh = self.controller.ssthresh(cwnd);
        tracing::trace!(%flow, cwnd, ssthresh, "ssthresh");
        ssthresh
    }

    /// Window to restore on a spurious-loss undo: `max(cwnd, 10)`.
    pub fn undo_cwnd(&self, flow: FlowId, cwnd: u32) -> u32 {
        let undo = self.controller.undo_cwnd(cwnd);
        tracing::trace!(%flow, cwnd, undo, "undo cwnd");
        undo
    }

    /// Stop tracking a flow and purge all of its state.
    pub fn release(&self, flow: FlowId) {
        if self.store.remove(flow).is_some() {
            tracing::debug!(%flow, "Flow released");
        }
    }

    pub fn flow_record(&self, flow: FlowId) -> Option<FlowRecord> {
        self.store.get(flow)
    }

    pub fn flow_stats(&self, flow: FlowId) -> Option<FlowStatistics> {
        self.store.get(flow).map(|record| record.stats)
    }

    pub fn episode(&self, flow: FlowId) -> Option<EpisodeState> {
        self.store.get(flow).map(|record| record.episode)
    }

    pub fn active_flows(&self) -> usize {
        self.store.len()
    }

    pub fn controller(&self) -> &EpisodeController {
        &self.controller
    }

    pub fn time_source(&self) -> &T {
        &self.time_source
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::baseline::RenoBaseline;
    use crate::gate::EpisodePhase;
    use crate::time::VirtualTime;

    const MS: u64 = 1_000_000;
    const SEC: u64 = 1_000 * MS;

    fn gate() -> (AdaptiveGate<VirtualTime>, VirtualTime) {
        let time = VirtualTime::with_initial_time(SEC);
        (
            AdaptiveGate::new_with_time_source(GateConfig::default(), time.clone()),
            time,
        )
    }

    fn clean(sent: u64) -> TelemetrySnapshot {
        TelemetrySnapshot::new(30_000, 0, sent, 10)
    }

    fn lossy(lost: u64, sent: u64) -> TelemetrySnapshot {
        TelemetrySnapshot::new(30_000, lost, sent, 10)
    }

    #[test]
    fn test_init_creates_default_record() {
        let (gate, _) = gate();
        let flow = FlowId::new(1);
        assert!(gate.init(flow, &TelemetrySnapshot::new(0, 0, 0, 14)));
        let record = gate.flow_record(flow).unwrap();
        assert_eq!(record.stats, FlowStatistics::new(3 * SEC));
        assert_eq!(record.episode, EpisodeState::default());
        assert_eq!(record.window.last_seen_window_size, Some(14));
        assert_eq!(gate.active_flows(), 1);
    }

    #[test]
    fn test_release_purges_everything() {
        let (gate, _) = gate();
        let flow = FlowId::new(1);
        gate.init(flow, &clean(0));
        gate.on_ack(flow, &lossy(1, 100));
        gate.release(flow);
        assert!(gate.flow_record(flow).is_none());
        assert!(gate.flow_stats(flow).is_none());
        assert!(gate.episode(flow).is_none());
        assert_eq!(gate.active_flows(), 0);
        // Releasing twice is harmless.
        gate.release(flow);
    }

    #[test]
    fn test_ack_for_unknown_flow_initializes_and_skips() {
        let (gate, _) = gate();
        let flow = FlowId::new(9);
        let decision = gate.on_ack_at_detailed(flow, &lossy(5, 100), 2 * SEC);
        assert_eq!(decision, GateDecision::skipped());
        // The event's telemetry was not ingested.
        let record = gate.flow_record(flow).unwrap();
        assert_eq!(record.stats.total_packets, 0);
        assert_eq!(record.episode.phase(), EpisodePhase::Idle);

        // The next ack is processed normally.
        let decision = gate.on_ack_at_detailed(flow, &lossy(5, 100), 3 * SEC);
        assert!(decision.episode_started);
    }

    #[test]
    fn test_full_table_degrades_to_ungated() {
        let config = GateConfig {
            max_flows: 1,
            ..GateConfig::default()
        };
        let gate = AdaptiveGate::new_with_time_source(config, VirtualTime::with_initial_time(SEC));
        assert!(gate.init(FlowId::new(1), &clean(0)));
        assert!(!gate.init(FlowId::new(2), &clean(0)));
        for i in 1..4 {
            let decision = gate.on_ack_at_detailed(FlowId::new(2), &lossy(i, 100), i * SEC);
            assert_eq!(decision, GateDecision::ungated());
        }
        assert_eq!(gate.active_flows(), 1);
    }

    #[test]
    fn test_cooldown_freezes_then_releases_growth() {
        let (gate, time) = gate();
        let flow = FlowId::new(1);
        gate.init(flow, &clean(0));
        assert!(gate.on_ack(flow, &clean(100)));

        time.advance(Duration::from_millis(10));
        let start = gate.on_ack_at_detailed(flow, &lossy(1, 1000), time.now_nanos());
        assert!(start.episode_started);
        assert!(!start.permit_growth);

        time.advance(Duration::from_nanos(start.delay_ns - 1));
        assert!(!gate.on_ack(flow, &lossy(1, 1010)));
        time.advance(Duration::from_nanos(1));
        assert!(gate.on_ack(flow, &lossy(1, 1020)));
    }

    #[test]
    fn test_delay_fixed_for_whole_episode() {
        let (gate, time) = gate();
        let flow = FlowId::new(1);
        gate.init(flow, &clean(0));
        gate.on_ack(flow, &lossy(1, 1000));
        let delay = gate.flow_stats(flow).unwrap().dynamic_delay_ns;

        // Loss keeps growing and RTT changes, but the cooldown stays put.
        for i in 2..20u64 {
            time.advance(Duration::from_millis(50));
            let telemetry = TelemetrySnapshot::new(250_000, i, 1000 + i * 10, 10);
            gate.on_ack(flow, &telemetry);
            assert_eq!(gate.flow_stats(flow).unwrap().dynamic_delay_ns, delay);
        }
        assert!(gate.flow_stats(flow).unwrap().consecutive_losses > 5);
    }

    #[test]
    fn test_new_episode_recomputes_delay() {
        let (gate, time) = gate();
        let flow = FlowId::new(1);
        gate.init(flow, &clean(0));
        gate.on_ack(flow, &lossy(1, 1000));
        let first = gate.flow_stats(flow).unwrap().dynamic_delay_ns;

        time.advance(Duration::from_millis(100));
        gate.on_ack(flow, &clean(1100));
        assert_eq!(gate.episode(flow).unwrap().phase(), EpisodePhase::Idle);
        assert_eq!(gate.flow_stats(flow).unwrap().consecutive_losses, 0);

        // Ten seconds later the path is slow and lossy: a different cooldown.
        time.advance(Duration::from_secs(10));
        let decision = gate.on_ack_at_detailed(
            flow,
            &TelemetrySnapshot::new(250_000, 90, 1200, 10),
            time.now_nanos(),
        );
        assert!(decision.episode_started);
        assert_ne!(decision.delay_ns, first);
    }

    #[test]
    fn test_on_ack_with_runs_baseline_only_when_permitted() {
        let (gate, time) = gate();
        let flow = FlowId::new(1);
        let mut reno = RenoBaseline::new(10);
        gate.init(flow, &clean(0));

        gate.on_ack_with(flow, &clean(100), 1, 2, &mut reno);
        assert_eq!(reno.cwnd(), 12);

        let decision = gate.on_ack_with(flow, &lossy(1, 200), 2, 2, &mut reno);
        assert!(!decision.permit_growth);
        assert_eq!(reno.cwnd(), 12);
        assert_eq!(
            gate.flow_record(flow).unwrap().window.last_seen_window_size,
            Some(12)
        );

        time.advance(Duration::from_nanos(decision.delay_ns));
        let decision = gate.on_ack_with(flow, &lossy(1, 300), 3, 2, &mut reno);
        assert!(decision.permit_growth);
        assert_eq!(reno.cwnd(), 14);
    }

    #[test]
    fn test_on_ack_with_untracked_flow_still_grows() {
        let config = GateConfig {
            max_flows: 1,
            ..GateConfig::default()
        };
        let gate = AdaptiveGate::new_with_time_source(config, VirtualTime::with_initial_time(SEC));
        gate.init(FlowId::new(1), &clean(0));
        let mut reno = RenoBaseline::new(10);
        let decision = gate.on_ack_with(FlowId::new(2), &lossy(3, 100), 1, 1, &mut reno);
        assert!(decision.permit_growth);
        assert_eq!(reno.cwnd(), 11);
    }

    struct SlowBaseline {
        cwnd: u32,
        entered: std::sync::mpsc::Sender<()>,
        hold: Duration,
    }

    impl CongestionAvoidance for SlowBaseline {
        fn cong_avoid(&mut self, _ack: u32, acked: u32) {
            self.entered.send(()).ok();
            std::thread::sleep(self.hold);
            self.cwnd += acked;
        }

        fn cwnd(&self) -> u32 {
            self.cwnd
        }
    }

    #[test]
    fn test_slow_baseline_does_not_stall_other_flows() {
        let gate = Arc::new(AdaptiveGate::new_with_time_source(
            GateConfig::default(),
            VirtualTime::with_initial_time(SEC),
        ));
        for i in 0..256u64 {
            gate.init(FlowId::new(i), &clean(0));
        }

        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let slow = {
            let gate = gate.clone();
            std::thread::spawn(move || {
                let mut baseline = SlowBaseline {
                    cwnd: 10,
                    entered: entered_tx,
                    hold: Duration::from_millis(500),
                };
                gate.on_ack_with(FlowId::new(0), &clean(100), 1, 1, &mut baseline)
            })
        };
        entered_rx.recv().unwrap();

        // Flow 0 is mid-step; every other flow, whatever its shard, proceeds.
        let mut worst = Duration::ZERO;
        for i in 1..256u64 {
            let started = std::time::Instant::now();
            assert!(gate.on_ack(FlowId::new(i), &clean(100)));
            worst = worst.max(started.elapsed());
        }
        assert!(worst < Duration::from_millis(250), "worst ack latency {worst:?}");

        let decision = slow.join().unwrap();
        assert!(decision.permit_growth);
        assert_eq!(
            gate.flow_record(FlowId::new(0)).unwrap().window.last_seen_window_size,
            Some(11)
        );
    }

    struct PeekingBaseline {
        gate: Arc<AdaptiveGate<VirtualTime>>,
        cwnd: u32,
        peers_seen: usize,
    }

    impl CongestionAvoidance for PeekingBaseline {
        fn cong_avoid(&mut self, _ack: u32, _acked: u32) {
            self.peers_seen = (1..128u64)
                .filter(|i| self.gate.flow_stats(FlowId::new(*i)).is_some())
                .count();
            self.cwnd += 1;
        }

        fn cwnd(&self) -> u32 {
            self.cwnd
        }
    }

    #[test]
    fn test_baseline_may_read_other_flows() {
        let gate = Arc::new(AdaptiveGate::new_with_time_source(
            GateConfig::default(),
            VirtualTime::with_initial_time(SEC),
        ));
        for i in 0..128u64 {
            gate.init(FlowId::new(i), &clean(0));
        }
        let mut baseline = PeekingBaseline {
            gate: gate.clone(),
            cwnd: 10,
            peers_seen: 0,
        };
        let decision = gate.on_ack_with(FlowId::new(0), &clean(100), 1, 1, &mut baseline);
        assert!(decision.permit_growth);
        assert_eq!(baseline.peers_seen, 127);
    }

    #[test]
    fn test_on_ack_then_observes_host_loss_response() {
        let (gate, _) = gate();
        let flow = FlowId::new(1);
        gate.init(flow, &clean(0));
        let mut cwnd = 12;
        let decision = gate.on_ack_then(flow, &lossy(1, 100), 2 * SEC, |decision| {
            if decision.episode_started {
                cwnd = gate.ssthresh(flow, cwnd);
            }
            cwnd
        });
        assert!(decision.episode_started);
        assert_eq!(cwnd, 6);
        assert_eq!(
            gate.flow_record(flow).unwrap().window.last_seen_window_size,
            Some(6)
        );
    }

    #[test]
    fn test_accessors_reflect_config() {
        let config = GateConfig {
            min_delay: Duration::from_millis(700),
            max_delay: Duration::from_secs(8),
            ..GateConfig::default()
        };
        let time = VirtualTime::with_initial_time(5 * SEC);
        let gate = AdaptiveGate::new_with_time_source(config, time.clone());
        let estimator = gate.controller().estimator();
        assert_eq!(estimator.min_delay_ns(), 700 * MS);
        assert_eq!(estimator.max_delay_ns(), 8 * SEC);
        time.advance(Duration::from_millis(3));
        assert_eq!(gate.time_source().now_nanos(), 5 * SEC + 3 * MS);
    }

    #[test]
    fn test_queries() {
        let (gate, _) = gate();
        let flow = FlowId::new(1);
        assert_eq!(gate.ssthresh(flow, 30), 15);
        assert_eq!(gate.ssthresh(flow, 3), 2);
        assert_eq!(gate.undo_cwnd(flow, 7), 10);
        assert_eq!(gate.undo_cwnd(flow, 70), 70);
    }

    #[test]
    fn test_flows_are_independent_across_threads() {
        let time = VirtualTime::with_initial_time(SEC);
        let gate = Arc::new(AdaptiveGate::new_with_time_source(
            GateConfig::default(),
            time.clone(),
        ));
        let handles: Vec<_> = (0..8u64)
            .map(|i| {
                let gate = gate.clone();
                std::thread::spawn(move || {
                    let flow = FlowId::new(i);
                    gate.init(flow, &clean(0));
                    // Even flows see loss, odd flows stay clean.
                    for n in 1..50u64 {
                        let lost = if i % 2 == 0 { n } else { 0 };
                        gate.on_ack_at(flow, &lossy(lost, n * 100), SEC + n * MS);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        for i in 0..8u64 {
            let episode = gate.episode(FlowId::new(i)).unwrap();
            assert_eq!(episode.in_congestion, i % 2 == 0);
        }
    }
}
