//! System telemetry: providers, snapshots and the background collector.
//!
//! A [`MetricsProvider`] reads one telemetry source (CPU, GPU) and reports a
//! [`ProviderMetrics`] bundle. The [`MetricsCollector`] polls every provider on a fixed
//! interval and publishes an immutable [`MetricsSnapshot`]; readers clone an `Arc` and
//! never observe a partially updated mapping.

pub mod collector;
pub mod cpu;
pub mod gpu;
mod sysfs;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Result;

pub use collector::MetricsCollector;
pub use cpu::CpuProvider;
pub use gpu::{GpuProvider, GpuVendor};

/// Which telemetry source a provider reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricSource {
    Cpu,
    Gpu,
}

/// Values reported by one provider poll. Unavailable readings are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProviderMetrics {
    pub temperature: Option<f64>,
    pub usage_percentage: Option<f64>,
    pub frequency: Option<f64>,
    pub vendor: Option<String>,
    pub name: Option<String>,
}

/// A telemetry source.
///
/// Implementations absorb their own read failures into `None` fields. An `Err` means
/// the whole poll failed; the collector logs it and keeps the previous values.
pub trait MetricsProvider: Send + 'static {
    fn source(&self) -> MetricSource;

    fn get_all_metrics(&mut self) -> Result<ProviderMetrics>;
}

/// Keys a snapshot can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKey {
    CpuTemperature,
    CpuUsage,
    CpuFrequency,
    GpuTemperature,
    GpuUsage,
    GpuFrequency,
    GpuVendor,
    GpuName,
}

impl MetricKey {
    pub const ALL: [MetricKey; 8] = [
        MetricKey::CpuTemperature,
        MetricKey::CpuUsage,
        MetricKey::CpuFrequency,
        MetricKey::GpuTemperature,
        MetricKey::GpuUsage,
        MetricKey::GpuFrequency,
        MetricKey::GpuVendor,
        MetricKey::GpuName,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MetricKey::CpuTemperature => "cpu_temperature",
            MetricKey::CpuUsage => "cpu_usage",
            MetricKey::CpuFrequency => "cpu_frequency",
            MetricKey::GpuTemperature => "gpu_temperature",
            MetricKey::GpuUsage => "gpu_usage",
            MetricKey::GpuFrequency => "gpu_frequency",
            MetricKey::GpuVendor => "gpu_vendor",
            MetricKey::GpuName => "gpu_name",
        }
    }

    pub fn source(self) -> MetricSource {
        match self {
            MetricKey::CpuTemperature | MetricKey::CpuUsage | MetricKey::CpuFrequency => {
                MetricSource::Cpu
            }
            _ => MetricSource::Gpu,
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single metric reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

impl MetricValue {
    /// Render with `decimals` fractional digits for numbers; text is returned as is.
    pub fn format(&self, decimals: usize) -> String {
        match self {
            MetricValue::Number(value) => format!("{value:.decimals$}"),
            MetricValue::Text(text) => text.clone(),
        }
    }
}

/// Immutable view of the latest telemetry.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    values: BTreeMap<MetricKey, MetricValue>,
    /// Poll counter, incremented for every published snapshot.
    generation: u64,
}

impl MetricsSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: MetricKey, value: MetricValue) -> Self {
        self.values.insert(key, value);
        self
    }

    pub fn get(&self, key: MetricKey) -> Option<&MetricValue> {
        self.values.get(&key)
    }

    pub fn number(&self, key: MetricKey) -> Option<f64> {
        match self.values.get(&key)? {
            MetricValue::Number(value) => Some(*value),
            MetricValue::Text(_) => None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MetricKey, &MetricValue)> {
        self.values.iter().map(|(key, value)| (*key, value))
    }

    /// Record one provider's readings, replacing every key of its source.
    pub(crate) fn apply(&mut self, source: MetricSource, metrics: ProviderMetrics) {
        self.values.retain(|key, _| key.source() != source);

        let (temperature, usage, frequency) = match source {
            MetricSource::Cpu => {
                (MetricKey::CpuTemperature, MetricKey::CpuUsage, MetricKey::CpuFrequency)
            }
            MetricSource::Gpu => {
                (MetricKey::GpuTemperature, MetricKey::GpuUsage, MetricKey::GpuFrequency)
            }
        };
        let numbers =
            [(temperature, metrics.temperature), (usage, metrics.usage_percentage), (frequency, metrics.frequency)];
        for (key, value) in numbers {
            if let Some(value) = value {
                self.values.insert(key, MetricValue::Number(value));
            }
        }

        if source == MetricSource::Gpu {
            if let Some(vendor) = metrics.vendor {
                self.values.insert(MetricKey::GpuVendor, MetricValue::Text(vendor));
            }
            if let Some(name) = metrics.name {
                self.values.insert(MetricKey::GpuName, MetricValue::Text(name));
            }
        }
    }

    /// Copy every key of `source` from `previous`.
    pub(crate) fn carry_over(&mut self, source: MetricSource, previous: &MetricsSnapshot) {
        for (key, value) in previous.iter().filter(|(key, _)| key.source() == source) {
            self.values.insert(key, value.clone());
        }
    }

    pub(crate) fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }
}
