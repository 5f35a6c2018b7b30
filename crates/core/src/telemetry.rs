//! Telemetry (C9): a tracer, additive counters, and module-boot timing.
//!
//! The original implementation wraps the real OpenTelemetry SDK (`TracerProvider`,
//! `MeterProvider`, an in-memory metric reader). The teacher codebase's dependency
//! stack carries no OpenTelemetry crates, and nothing else in this workspace needs
//! one, so spans are produced with `tracing::info_span!` (the same facade the rest of
//! the crate uses for logging) and counters are a small `AtomicU64`-backed type local
//! to this module — in-memory only, exactly as required, without adding a dependency
//! the rest of the stack doesn't otherwise use. See DESIGN.md for the rationale.

use crate::errors::{AutoForgeError, Result};
use indexmap::IndexMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::instrument;

/// A named, process-local additive counter.
pub struct Counter {
    pub name: String,
    pub unit: String,
    pub description: String,
    value: AtomicU64,
}

impl Counter {
    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

pub struct Telemetry {
    start: Instant,
    counters: RwLock<IndexMap<String, Arc<Counter>>>,
    boot_events: RwLock<IndexMap<String, Duration>>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            counters: RwLock::new(IndexMap::new()),
            boot_events: RwLock::new(IndexMap::new()),
        }
    }

    /// Elapsed time since this telemetry instance was created.
    pub fn elapsed_since_start(&self) -> Duration {
        self.start.elapsed()
    }

    /// Create a new counter. Fails with [`AutoForgeError::Duplicate`] if a counter
    /// with this name already exists.
    pub fn create_counter(&self, name: &str, unit: &str, description: &str) -> Result<Arc<Counter>> {
        let mut guard = self.counters.write().unwrap();
        if guard.contains_key(name) {
            return Err(AutoForgeError::Duplicate {
                kind: "counter",
                name: name.to_string(),
            });
        }
        let counter = Arc::new(Counter {
            name: name.to_string(),
            unit: unit.to_string(),
            description: description.to_string(),
            value: AtomicU64::new(0),
        });
        guard.insert(name.to_string(), counter.clone());
        Ok(counter)
    }

    pub fn get_counter_value(&self, name: &str) -> Option<u64> {
        self.counters.read().unwrap().get(name).map(|c| c.value())
    }

    /// Fetch a handle to an existing counter, if one was registered under this name.
    pub fn get_counter(&self, name: &str) -> Option<Arc<Counter>> {
        self.counters.read().unwrap().get(name).cloned()
    }

    /// Fetch the counter's handle, creating it (starting at zero) if absent. Lets
    /// callers increment a counter without separately tracking whether some earlier
    /// code path already created it.
    pub fn get_or_create_counter(&self, name: &str, unit: &str, description: &str) -> Arc<Counter> {
        if let Some(existing) = self.get_counter(name) {
            return existing;
        }
        match self.create_counter(name, unit, description) {
            Ok(counter) => counter,
            Err(_) => self
                .get_counter(name)
                .expect("counter exists: create_counter only fails on Duplicate"),
        }
    }

    /// Record that a named module finished booting, storing the elapsed time since
    /// telemetry init. Boot events are retrievable in the order they were recorded.
    #[instrument(skip(self))]
    pub fn mark_module_boot(&self, name: &str) {
        let elapsed = self.elapsed_since_start();
        let _span = tracing::info_span!("module_boot", module = %name, elapsed_ms = elapsed.as_millis() as u64).entered();
        self.boot_events
            .write()
            .unwrap()
            .insert(name.to_string(), elapsed);
    }

    /// Ordered table of recorded module-boot events.
    pub fn boot_events(&self) -> Vec<(String, Duration)> {
        self.boot_events
            .read()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    /// Open a tracing span for the duration of a unit of work. Attributes can be
    /// attached by the caller via `tracing::field` macros on the returned span.
    pub fn start_span(&self, name: &'static str) -> tracing::Span {
        tracing::info_span!("telemetry_span", name = name)
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}
