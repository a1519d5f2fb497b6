use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Counter and gauge store for the node core. Names are dot-qualified under
/// the registry namespace so snapshots from several subsystems merge cleanly.
#[derive(Debug)]
pub struct MetricsRegistry {
    namespace: String,
    counters: HashMap<String, u64>,
    gauges: HashMap<String, u64>,
}

impl MetricsRegistry {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            counters: HashMap::new(),
            gauges: HashMap::new(),
        }
    }

    pub fn inc_counter(&mut self, name: &str, delta: u64) -> u64 {
        let key = self.qualify(name);
        let counter = self.counters.entry(key).or_insert(0);
        *counter = counter.saturating_add(delta);
        *counter
    }

    pub fn set_gauge(&mut self, name: &str, value: u64) {
        let key = self.qualify(name);
        self.gauges.insert(key, value);
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(&self.qualify(name)).copied().unwrap_or(0)
    }

    pub fn gauge(&self, name: &str) -> Option<u64> {
        self.gauges.get(&self.qualify(name)).copied()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.counters.clone(),
            gauges: self.gauges.clone(),
        }
    }

    fn qualify(&self, name: &str) -> String {
        if self.namespace.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.namespace, name)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, u64>,
}

/// Clone-cheap handle shared across the manager, namespaces, and the flush
/// path.
#[derive(Debug, Clone)]
pub struct SharedMetricsRegistry {
    inner: Arc<Mutex<MetricsRegistry>>,
}

impl SharedMetricsRegistry {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsRegistry::new(namespace))),
        }
    }

    pub fn inc_counter(&self, name: &str, delta: u64) -> u64 {
        self.inner.lock().inc_counter(name, delta)
    }

    pub fn set_gauge(&self, name: &str, value: u64) {
        self.inner.lock().set_gauge(name, value)
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.inner.lock().counter(name)
    }

    pub fn gauge(&self, name: &str) -> Option<u64> {
        self.inner.lock().gauge(name)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().snapshot()
    }
}

impl Default for SharedMetricsRegistry {
    fn default() -> Self {
        Self::new("tidestore")
    }
}
