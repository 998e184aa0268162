//! Record types stored by the [`DevToolsRecorder`](super::DevToolsRecorder).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::Value;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A recorded item: per-kind sequence number, timestamp and kind-specific data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recorded<T> {
    /// Monotonically increasing within one record kind.
    pub seq: u64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    #[serde(flatten)]
    pub data: T,
}

/// An event published on the engine event bus.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventData {
    pub topic: String,
    pub payload: Value,
    /// Number of subscribers that received the event.
    pub listeners: usize,
}

/// Which store a state change happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StateSource {
    /// The engine context state store.
    State,
    /// The configuration tree.
    Config,
}

/// A committed write to the state store or the configuration tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateChange {
    pub source: StateSource,
    pub key: String,
    pub old: Option<Value>,
    pub new: Option<Value>,
}

/// Plugin lifecycle step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginAction {
    Registered,
    Installed,
    InstallFailed,
    Uninstalled,
}

/// Plugin lifecycle activity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginActivity {
    pub plugin: String,
    pub version: String,
    pub action: PluginAction,
    pub error: Option<String>,
    pub duration_ms: Option<f64>,
}

/// What a timing measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingCategory {
    /// One middleware link, including everything inward of it.
    Middleware,
    /// A full pipeline run.
    Pipeline,
    /// One plugin install hook.
    PluginInstall,
    /// A configuration load or reload.
    ConfigLoad,
}

/// A timed span.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Timing {
    pub label: String,
    pub category: TimingCategory,
    pub duration_ms: f64,
    /// `false` if the timed operation failed.
    pub ok: bool,
}

impl Timing {
    pub fn new(label: impl Into<String>, category: TimingCategory, elapsed: Duration, ok: bool) -> Self {
        Self {
            label: label.into(),
            category,
            duration_ms: elapsed.as_secs_f64() * 1000.0,
            ok,
        }
    }
}

pub type EventRecord = Recorded<EventData>;
pub type StateChangeRecord = Recorded<StateChange>;
pub type PluginRecord = Recorded<PluginActivity>;
pub type PerformanceRecord = Recorded<Timing>;

/// Input to [`DevToolsRecorder::record`](super::DevToolsRecorder::record);
/// the variant selects the buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordPayload {
    Event(EventData),
    StateChange(StateChange),
    Plugin(PluginActivity),
    Performance(Timing),
}

impl RecordPayload {
    /// Convenience constructor for an event payload.
    pub fn event(topic: impl Into<String>, payload: Value, listeners: usize) -> Self {
        Self::Event(EventData {
            topic: topic.into(),
            payload,
            listeners,
        })
    }

    /// Convenience constructor for a state change payload.
    pub fn state_change(
        source: StateSource,
        key: impl Into<String>,
        old: Option<Value>,
        new: Option<Value>,
    ) -> Self {
        Self::StateChange(StateChange {
            source,
            key: key.into(),
            old,
            new,
        })
    }

    /// Convenience constructor for plugin activity.
    pub fn plugin(
        plugin: impl Into<String>,
        version: impl Into<String>,
        action: PluginAction,
    ) -> PluginActivityBuilder {
        PluginActivityBuilder(PluginActivity {
            plugin: plugin.into(),
            version: version.into(),
            action,
            error: None,
            duration_ms: None,
        })
    }
}

/// Finishes a [`PluginActivity`] payload.
#[derive(Debug)]
pub struct PluginActivityBuilder(PluginActivity);

impl PluginActivityBuilder {
    pub fn error(mut self, error: impl ToString) -> Self {
        self.0.error = Some(error.to_string());
        self
    }

    pub fn elapsed(mut self, elapsed: Duration) -> Self {
        self.0.duration_ms = Some(elapsed.as_secs_f64() * 1000.0);
        self
    }

    pub fn build(self) -> RecordPayload {
        RecordPayload::Plugin(self.0)
    }
}
