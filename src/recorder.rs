//! Injectable metrics recorder
//!
//! The pipeline and the session window manager report counters and histograms
//! through [`Recorder`] instead of process-wide registries. [`NoopRecorder`] is a
//! valid substitute everywhere.

use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Signals found by the detector, labelled by `type`
pub const SIGNALS_DETECTED: &str = "hawkeye_signals_detected_total";
/// Signals or groups dropped by a stage, labelled by `reason`
pub const SIGNALS_DISCARDED: &str = "hawkeye_signals_discarded_total";
/// Sessions run through the pipeline
pub const SESSIONS_PROCESSED: &str = "hawkeye_sessions_processed_total";
/// Incidents emitted by the pipeline
pub const INCIDENTS_DETECTED: &str = "hawkeye_incidents_detected_total";
/// Wall time of one pipeline invocation, in seconds
pub const PROCESSING_LATENCY: &str = "hawkeye_processing_latency_seconds";
/// Session windows opened by the manager
pub const SESSIONS_CREATED: &str = "hawkeye_sessions_created_total";
/// Completed sessions handed to the emission channel
pub const SESSIONS_EMITTED: &str = "hawkeye_sessions_emitted_total";
/// Completed sessions that could not be delivered, labelled by `reason`
pub const SESSIONS_DROPPED: &str = "hawkeye_sessions_dropped_total";

/// Capability set the engine needs from a metrics backend
pub trait Recorder: Send + Sync {
    fn increment_counter(&self, name: &str, labels: &[(&str, &str)]);

    fn observe_histogram(&self, name: &str, labels: &[(&str, &str)], value: f64);
}

/// Recorder that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

impl Recorder for NoopRecorder {
    fn increment_counter(&self, _name: &str, _labels: &[(&str, &str)]) {}

    fn observe_histogram(&self, _name: &str, _labels: &[(&str, &str)], _value: f64) {}
}

/// Recorder that keeps counters and observations in memory
///
/// Series are keyed as `name{label="value",...}` with labels in the order given.
#[derive(Debug, Default)]
pub struct InMemoryRecorder {
    counters: Mutex<BTreeMap<String, u64>>,
    histograms: Mutex<BTreeMap<String, Vec<f64>>>,
}

impl InMemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter series (0 if never incremented)
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters
            .lock()
            .get(&series_key(name, labels))
            .copied()
            .unwrap_or(0)
    }

    /// Sum of every series of a counter regardless of labels
    pub fn counter_total(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .iter()
            .filter(|(key, _)| key.as_str() == name || key.starts_with(&format!("{name}{{")))
            .map(|(_, value)| *value)
            .sum()
    }

    /// Observations recorded for a histogram series
    pub fn observations(&self, name: &str, labels: &[(&str, &str)]) -> Vec<f64> {
        self.histograms
            .lock()
            .get(&series_key(name, labels))
            .cloned()
            .unwrap_or_default()
    }

    /// Copy of every counter series
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counters.lock().clone()
    }
}

impl Recorder for InMemoryRecorder {
    fn increment_counter(&self, name: &str, labels: &[(&str, &str)]) {
        *self
            .counters
            .lock()
            .entry(series_key(name, labels))
            .or_insert(0) += 1;
    }

    fn observe_histogram(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        self.histograms
            .lock()
            .entry(series_key(name, labels))
            .or_default()
            .push(value);
    }
}

fn series_key(name: &str, labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let rendered: Vec<String> = labels
        .iter()
        .map(|(key, value)| format!("{key}=\"{value}\""))
        .collect();
    format!("{name}{{{}}}", rendered.join(","))
}
