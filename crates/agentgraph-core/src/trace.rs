//! Run trace: append-only structured event log (JSON-lines semantics).
//!
//! Every call appends exactly one event, mirrors it to `tracing`, and fans it
//! out to subscribers in emission order. Nothing here can fail or panic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// One immutable, timestamped record of orchestration progress.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TraceEvent {
    pub ts: DateTime<Utc>,
    pub seq: usize,
    pub level: Level,
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl TraceEvent {
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    /// The `id` field of the payload, present on every `node.*` event.
    pub fn node_id(&self) -> Option<&str> {
        self.data.get("id").and_then(|v| v.as_str())
    }
}

#[derive(Default)]
struct TraceInner {
    events: Vec<TraceEvent>,
    subscribers: Vec<mpsc::UnboundedSender<TraceEvent>>,
}

/// Run-scoped trace. Share it as `Arc<Trace>`; never share one across runs.
pub struct Trace {
    run_id: String,
    inner: Mutex<TraceInner>,
}

impl Default for Trace {
    fn default() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }
}

impl Trace {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            inner: Mutex::new(TraceInner::default()),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn lock(&self) -> MutexGuard<'_, TraceInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn info(&self, event: &str, data: Value) {
        self.emit(Level::Info, event, data);
    }

    pub fn warn(&self, event: &str, data: Value) {
        self.emit(Level::Warn, event, data);
    }

    pub fn error(&self, event: &str, data: Value) {
        self.emit(Level::Error, event, data);
    }

    pub fn emit(&self, level: Level, event: &str, data: Value) {
        let record = {
            let mut inner = self.lock();
            let record = TraceEvent {
                ts: Utc::now(),
                seq: inner.events.len(),
                level,
                event: event.to_string(),
                data,
            };
            inner.events.push(record.clone());
            // Fan out under the lock so every subscriber sees emission order.
            inner.subscribers.retain(|tx| tx.send(record.clone()).is_ok());
            record
        };

        match level {
            Level::Info => tracing::info!(run_id = %self.run_id, event, data = %record.data, "trace"),
            Level::Warn => tracing::warn!(run_id = %self.run_id, event, data = %record.data, "trace"),
            Level::Error => tracing::error!(run_id = %self.run_id, event, data = %record.data, "trace"),
        }
    }

    /// Number of events emitted so far in this run.
    pub fn count(&self) -> usize {
        self.lock().events.len()
    }

    /// Point-in-time copy of the log.
    pub fn events(&self) -> Vec<TraceEvent> {
        self.lock().events.clone()
    }

    /// Events with the given name, in emission order.
    pub fn events_named(&self, event: &str) -> Vec<TraceEvent> {
        self.lock()
            .events
            .iter()
            .filter(|e| e.event == event)
            .cloned()
            .collect()
    }

    /// Receive every event emitted after this call.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TraceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.push(tx);
        rx
    }

    /// Drop all subscriber channels so receivers observe end-of-stream.
    pub fn close_subscribers(&self) {
        self.lock().subscribers.clear();
    }

    pub fn to_jsonl(&self) -> String {
        let inner = self.lock();
        let mut out = String::new();
        for e in &inner.events {
            out.push_str(&e.to_json_line());
            out.push('\n');
        }
        out
    }
}
