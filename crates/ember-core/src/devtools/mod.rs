//! Bounded diagnostic history of engine activity.
//!
//! The [`DevToolsRecorder`] keeps one fixed-capacity ring buffer per record
//! kind (events, state changes, plugin activity, timings). When a buffer is
//! full the oldest entry is evicted before the new one is appended.
//!
//! Components never talk to the recorder directly; they hold a [`Probe`],
//! which is either attached to a recorder or empty. An empty probe skips
//! payload construction entirely, so running without devtools costs nothing.
//!
//! ```rust,ignore
//! let recorder = Arc::new(DevToolsRecorder::new(256));
//! let probe = Probe::new(Arc::clone(&recorder));
//! probe.record_with(|| RecordPayload::event("ready", Value::Null, 0));
//! println!("{}", recorder.snapshot().to_json());
//! ```

pub mod record;

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

pub use record::{
    EventData, EventRecord, PerformanceRecord, PluginAction, PluginActivity, PluginRecord,
    RecordPayload, Recorded, StateChange, StateChangeRecord, StateSource, Timing, TimingCategory,
    now_millis,
};

/// Capacity used by [`DevToolsRecorder::default`].
pub const DEFAULT_CAPACITY: usize = 500;

struct RingBuffer<T> {
    items: VecDeque<Recorded<T>>,
    next_seq: u64,
    evicted: u64,
}

impl<T: Clone> RingBuffer<T> {
    fn new() -> Self {
        Self {
            items: VecDeque::new(),
            next_seq: 1,
            evicted: 0,
        }
    }

    fn push(&mut self, capacity: usize, data: T) {
        while self.items.len() >= capacity {
            self.items.pop_front();
            self.evicted += 1;
        }
        self.items.push_back(Recorded {
            seq: self.next_seq,
            timestamp: now_millis(),
            data,
        });
        self.next_seq += 1;
    }

    fn summary(&self) -> KindSummary {
        KindSummary {
            retained: self.items.len(),
            recorded: self.next_seq - 1,
            evicted: self.evicted,
        }
    }

    fn to_vec(&self) -> Vec<Recorded<T>> {
        self.items.iter().cloned().collect()
    }

    fn clear(&mut self) {
        self.evicted += self.items.len() as u64;
        self.items.clear();
    }
}

/// Passive observer accumulating a bounded history of engine activity.
///
/// All operations are infallible.
pub struct DevToolsRecorder {
    capacity: usize,
    paused: AtomicBool,
    events: Mutex<RingBuffer<EventData>>,
    state_changes: Mutex<RingBuffer<StateChange>>,
    plugins: Mutex<RingBuffer<PluginActivity>>,
    performance: Mutex<RingBuffer<Timing>>,
}

impl DevToolsRecorder {
    /// Creates a recorder keeping at most `capacity` records per kind.
    ///
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            paused: AtomicBool::new(false),
            events: Mutex::new(RingBuffer::new()),
            state_changes: Mutex::new(RingBuffer::new()),
            plugins: Mutex::new(RingBuffer::new()),
            performance: Mutex::new(RingBuffer::new()),
        }
    }

    /// Per-kind capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends a record to the buffer selected by the payload variant.
    ///
    /// Dropped silently while paused.
    pub fn record(&self, payload: RecordPayload) {
        if self.is_paused() {
            return;
        }
        match payload {
            RecordPayload::Event(data) => self.events.lock().push(self.capacity, data),
            RecordPayload::StateChange(data) => self.state_changes.lock().push(self.capacity, data),
            RecordPayload::Plugin(data) => self.plugins.lock().push(self.capacity, data),
            RecordPayload::Performance(data) => self.performance.lock().push(self.capacity, data),
        }
    }

    /// Stops recording until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Returns an immutable copy of all buffers plus summary counts.
    pub fn snapshot(&self) -> DevToolsSnapshot {
        let events = self.events.lock();
        let state_changes = self.state_changes.lock();
        let plugins = self.plugins.lock();
        let performance = self.performance.lock();

        DevToolsSnapshot {
            events: events.to_vec(),
            state_changes: state_changes.to_vec(),
            plugins: plugins.to_vec(),
            performance: performance.to_vec(),
            summary: SnapshotSummary {
                capacity: self.capacity,
                events: events.summary(),
                state_changes: state_changes.summary(),
                plugins: plugins.summary(),
                performance: performance.summary(),
            },
            captured_at: now_millis(),
        }
    }

    /// Empties every buffer. Sequence numbers keep increasing afterwards.
    pub fn clear(&self) {
        self.events.lock().clear();
        self.state_changes.lock().clear();
        self.plugins.lock().clear();
        self.performance.lock().clear();
    }
}

impl Default for DevToolsRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for DevToolsRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevToolsRecorder")
            .field("capacity", &self.capacity)
            .field("paused", &self.is_paused())
            .finish_non_exhaustive()
    }
}

/// Counts for one record kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KindSummary {
    /// Records currently held.
    pub retained: usize,
    /// Records ever appended.
    pub recorded: u64,
    /// Records dropped by eviction or [`DevToolsRecorder::clear`].
    pub evicted: u64,
}

/// Summary counts attached to a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
    pub capacity: usize,
    pub events: KindSummary,
    pub state_changes: KindSummary,
    pub plugins: KindSummary,
    pub performance: KindSummary,
}

/// Point-in-time copy of the recorder's buffers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DevToolsSnapshot {
    pub events: Vec<EventRecord>,
    pub state_changes: Vec<StateChangeRecord>,
    pub plugins: Vec<PluginRecord>,
    pub performance: Vec<PerformanceRecord>,
    pub summary: SnapshotSummary,
    pub captured_at: u64,
}

impl DevToolsSnapshot {
    /// Exports the snapshot as JSON (camelCase field names).
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Payloads of all retained events published on `topic`, oldest first.
    pub fn event_payloads(&self, topic: &str) -> Vec<&Value> {
        self.events
            .iter()
            .filter(|r| r.data.topic == topic)
            .map(|r| &r.data.payload)
            .collect()
    }
}

// =============================================================================
// Probe
// =============================================================================

/// Optional handle to a recorder held by every instrumented component.
#[derive(Clone, Default)]
pub struct Probe(Option<Arc<DevToolsRecorder>>);

impl Probe {
    /// A probe attached to `recorder`.
    pub fn new(recorder: Arc<DevToolsRecorder>) -> Self {
        Self(Some(recorder))
    }

    /// A probe that records nothing.
    pub fn disabled() -> Self {
        Self(None)
    }

    pub fn is_enabled(&self) -> bool {
        self.0.is_some()
    }

    /// The attached recorder, if any.
    pub fn recorder(&self) -> Option<&Arc<DevToolsRecorder>> {
        self.0.as_ref()
    }

    /// Records the payload built by `build`; `build` is not called when the
    /// probe is disabled.
    #[inline]
    pub fn record_with(&self, build: impl FnOnce() -> RecordPayload) {
        if let Some(recorder) = &self.0 {
            recorder.record(build());
        }
    }
}

impl std::fmt::Debug for Probe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Probe").field(&self.is_enabled()).finish()
    }
}
