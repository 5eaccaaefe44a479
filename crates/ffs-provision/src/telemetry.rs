//! Metric declarations for the provisioning engine.
//!
//! Metrics go through the [`metrics`] facade. Nothing is exported unless the
//! embedding application installs a recorder; [`describe_metrics`] only
//! attaches descriptions and units.

use metrics::{describe_counter, describe_histogram, Unit};

/// The kind of metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
    /// A histogram for recording distributions.
    Histogram,
}

/// A metric declaration with its metadata.
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name.
    pub name: &'static str,
    /// Counter or histogram.
    pub kind: MetricKind,
    /// Human-readable description.
    pub description: &'static str,
    /// Unit of measurement.
    pub unit: Unit,
    /// Expected label keys.
    pub labels: &'static [&'static str],
}

impl Metric {
    const fn new(name: &'static str, kind: MetricKind) -> Self {
        Self {
            name,
            kind,
            description: "",
            unit: Unit::Count,
            labels: &[],
        }
    }

    /// Creates a counter metric.
    pub const fn counter(name: &'static str) -> Self {
        Self::new(name, MetricKind::Counter)
    }

    /// Creates a histogram metric.
    pub const fn histogram(name: &'static str) -> Self {
        Self::new(name, MetricKind::Histogram)
    }

    /// Sets the description.
    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Sets the unit.
    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = unit;
        self
    }

    /// Sets the expected label keys.
    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Registers this metric's description with the installed recorder.
    pub fn describe(&self) {
        match self.kind {
            MetricKind::Counter => describe_counter!(self.name, self.unit, self.description),
            MetricKind::Histogram => describe_histogram!(self.name, self.unit, self.description),
        }
    }
}

/// All metrics emitted by the engine.
pub mod metric_defs {
    use super::{Metric, Unit};

    /// Commands executed, by final status.
    ///
    /// Labels: status (success, fail, unrecognized, timeout)
    pub const COMMANDS: Metric = Metric::counter("ffs.commands")
        .with_description("Commands executed against the device shell")
        .with_unit(Unit::Count)
        .with_labels(&["status"]);

    /// Time from command write to terminal status.
    pub const COMMAND_LATENCY: Metric = Metric::histogram("ffs.command_latency_s")
        .with_description("Time between writing a command and its status line")
        .with_unit(Unit::Seconds);

    /// Parameter bytes acknowledged by `param_chunk` and `param_newline`.
    pub const PARAM_BYTES: Metric = Metric::counter("ffs.param_bytes")
        .with_description("Parameter bytes uploaded in chunks")
        .with_unit(Unit::Bytes);

    /// PEM block reads, by kind and outcome.
    ///
    /// Labels: kind (csr, certificate), outcome (ok, status_fail, missing)
    pub const PEM_BLOCKS: Metric = Metric::counter("ffs.pem_blocks")
        .with_description("PEM block reads from the device")
        .with_unit(Unit::Count)
        .with_labels(&["kind", "outcome"]);

    /// Every metric, for registration.
    pub const ALL: &[&Metric] = &[&COMMANDS, &COMMAND_LATENCY, &PARAM_BYTES, &PEM_BLOCKS];
}

/// Describe all engine metrics to the installed recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}
