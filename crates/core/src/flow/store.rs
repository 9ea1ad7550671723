//! Bounded concurrent flow table.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::Mutex;
use serde::Serialize;

use crate::errors::StoreError;
use crate::gate::{EpisodeState, WindowObservation};

use super::{FlowId, FlowStatistics};

/// Everything the engine keeps for one flow. Created and dropped as a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlowRecord {
    pub stats: FlowStatistics,
    pub episode: EpisodeState,
    pub window: WindowObservation,
}

impl FlowRecord {
    pub fn new(default_delay_ns: u64, cwnd: u32) -> Self {
        Self {
            stats: FlowStatistics::new(default_delay_ns),
            episode: EpisodeState::default(),
            window: WindowObservation::seeded(cwnd),
        }
    }
}

/// Shared, individually locked record of one flow.
pub type FlowHandle = Arc<Mutex<FlowRecord>>;

/// Keyed storage from [`FlowId`] to [`FlowRecord`].
///
/// Each record sits behind its own mutex. Map shard locks are only held long
/// enough to clone the record handle out, so a slow update of one flow never
/// blocks flows that happen to share its shard. Locking the handle returned by
/// [`FlowStateStore::handle`] makes the per-ack multi-field update atomic with
/// respect to other events for the same flow.
///
/// The table never evicts. Once `capacity` flows are live, creating a new one
/// fails with [`StoreError::AtCapacity`]; overwriting an existing flow always
/// succeeds.
pub struct FlowStateStore {
    flows: DashMap<FlowId, FlowHandle>,
    len: AtomicUsize,
    capacity: usize,
}

impl FlowStateStore {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            flows: DashMap::with_capacity(capacity),
            len: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Insert or replace the record for `id`.
    pub fn create(&self, id: FlowId, record: FlowRecord) -> Result<(), StoreError> {
        match self.flows.entry(id) {
            Entry::Occupied(mut entry) => {
                // Swap in a fresh handle rather than locking the old one under
                // the shard guard.
                entry.insert(Arc::new(Mutex::new(record)));
                Ok(())
            }
            Entry::Vacant(entry) => {
                // Reserve a slot before inserting so concurrent creators cannot
                // overshoot the bound.
                self.len
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |len| {
                        (len < self.capacity).then_some(len + 1)
                    })
                    .map_err(|_| StoreError::AtCapacity {
                        capacity: self.capacity,
                    })?;
                entry.insert(Arc::new(Mutex::new(record)));
                Ok(())
            }
        }
    }

    /// Handle to a flow's record, or `None` if it is not tracked.
    ///
    /// The shard guard is released before returning; lock the handle to read
    /// or update the record.
    pub fn handle(&self, id: FlowId) -> Option<FlowHandle> {
        self.flows.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Copy of a flow's record.
    pub fn get(&self, id: FlowId) -> Option<FlowRecord> {
        let handle = self.handle(id)?;
        let record = *handle.lock();
        Some(record)
    }

    pub fn contains(&self, id: FlowId) -> bool {
        self.flows.contains_key(&id)
    }

    pub fn remove(&self, id: FlowId) -> Option<FlowRecord> {
        let (_, handle) = self.flows.remove(&id)?;
        self.len.fetch_sub(1, Ordering::AcqRel);
        let record = *handle.lock();
        Some(record)
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Ids of all live flows, in no particular order.
    pub fn flow_ids(&self) -> Vec<FlowId> {
        self.flows.iter().map(|entry| *entry.key()).collect()
    }
}

impl std::fmt::Debug for FlowStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowStateStore")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
