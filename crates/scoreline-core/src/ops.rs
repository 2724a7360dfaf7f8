//! Structured operational event stream.
//!
//! Every significant action (detection, reconcile request/result, lock
//! rejection, circuit transition, force-terminate) is emitted as one flat
//! key/value `OpsEvent` with at least `component`, `event`, `timestamp`
//! and `level`.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OpsLevel {
    Debug,
    Info,
    Warn,
    Error,
    /// High-severity events an operator must look at (forced termination).
    Critical,
}

/// Flat key/value envelope for one operational event.
#[derive(Debug, Clone, Serialize)]
pub struct OpsEvent {
    pub component: &'static str,
    pub event: &'static str,
    pub level: OpsLevel,
    pub timestamp: i64,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl OpsEvent {
    pub fn new(component: &'static str, event: &'static str, level: OpsLevel) -> Self {
        Self {
            component,
            event,
            level,
            timestamp: crate::now_secs(),
            fields: Map::new(),
        }
    }

    /// Attach an extra key. Values that fail to serialize become `null`.
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.fields.insert(key.to_string(), value);
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Destination for operational events.
pub trait OpsSink: Send + Sync {
    fn emit(&self, event: OpsEvent);
}

pub type SharedOps = Arc<dyn OpsSink>;

/// Renders each event as a single tracing record at the matching level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TracingSink {
    pub fn shared() -> SharedOps {
        Arc::new(TracingSink)
    }
}

impl OpsSink for TracingSink {
    fn emit(&self, event: OpsEvent) {
        let payload = serde_json::to_string(&event).unwrap_or_default();
        let component = event.component;
        let name = event.event;
        match event.level {
            OpsLevel::Debug => debug!(component, event = name, "{}", payload),
            OpsLevel::Info => info!(component, event = name, "{}", payload),
            OpsLevel::Warn => warn!(component, event = name, "{}", payload),
            OpsLevel::Error => error!(component, event = name, "{}", payload),
            OpsLevel::Critical => {
                error!(component, event = name, severity = "critical", "{}", payload)
            }
        }
    }
}

/// Keeps every event in memory for assertions.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<OpsEvent>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<OpsEvent> {
        self.events.lock().clone()
    }

    /// Events with the given name, in emission order.
    pub fn named(&self, event: &str) -> Vec<OpsEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event == event)
            .cloned()
            .collect()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.lock().iter().filter(|e| e.event == event).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl OpsSink for MemorySink {
    fn emit(&self, event: OpsEvent) {
        self.events.lock().push(event);
    }
}
