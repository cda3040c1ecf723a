// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Metrics sink capability.
//!
//! The loop emits counters, gauges, and histogram samples against dotted
//! names (`augmentor.<name>.request`, `requestTimeMs`, ...). The sink is a
//! small trait object so the surrounding service can plug in whatever
//! recorder it ships with.

use std::collections::HashMap;

use parking_lot::Mutex;

/// Destination for loop telemetry.
pub trait MetricsSink: Send + Sync {
    /// Add `value` to the named counter.
    fn counter(&self, name: &str, value: u64);

    /// Set the named gauge to `value`.
    fn gauge(&self, name: &str, value: f64);

    /// Record one sample into the named histogram.
    fn histogram(&self, name: &str, value: f64);

    /// Increment the named counter by one.
    fn hit(&self, name: &str) {
        self.counter(name, 1);
    }
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn counter(&self, _name: &str, _value: u64) {}
    fn gauge(&self, _name: &str, _value: f64) {}
    fn histogram(&self, _name: &str, _value: f64) {}
}

/// Sink that keeps everything in memory, for assertions in tests.
#[derive(Default)]
pub struct RecordingSink {
    counters: Mutex<HashMap<String, u64>>,
    gauges: Mutex<HashMap<String, f64>>,
    histograms: Mutex<HashMap<String, Vec<f64>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter, zero if never hit.
    pub fn counter_value(&self, name: &str) -> u64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }

    /// Last value stored into a gauge.
    pub fn gauge_value(&self, name: &str) -> Option<f64> {
        self.gauges.lock().get(name).copied()
    }

    /// All samples recorded into a histogram.
    pub fn histogram_samples(&self, name: &str) -> Vec<f64> {
        self.histograms.lock().get(name).cloned().unwrap_or_default()
    }
}

impl MetricsSink for RecordingSink {
    fn counter(&self, name: &str, value: u64) {
        *self.counters.lock().entry(name.to_string()).or_insert(0) += value;
    }

    fn gauge(&self, name: &str, value: f64) {
        self.gauges.lock().insert(name.to_string(), value);
    }

    fn histogram(&self, name: &str, value: f64) {
        self.histograms
            .lock()
            .entry(name.to_string())
            .or_default()
            .push(value);
    }
}
