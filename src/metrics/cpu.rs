//! CPU telemetry from procfs and sysfs.

use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use super::sysfs::{entries_with_prefix, hwmon_named, read_f64, read_trimmed, temp_inputs};
use super::{MetricSource, MetricsProvider, ProviderMetrics};
use crate::Result;

const THERMAL_ZONE_TYPES: &[&str] = &["cpu", "x86_pkg_temp", "coretemp"];
const HWMON_DRIVERS: &[&str] = &["coretemp", "k10temp", "zenpower"];

/// Aggregate jiffies from the first line of `/proc/stat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CpuTimes {
    total: u64,
    idle: u64,
}

impl CpuTimes {
    fn parse(stat: &str) -> Option<Self> {
        let line = stat.lines().find(|l| l.starts_with("cpu "))?;
        let fields: Vec<u64> =
            line.split_whitespace().skip(1).take(8).filter_map(|f| f.parse().ok()).collect();
        if fields.len() < 4 {
            return None;
        }
        // idle + iowait
        let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
        Some(Self { total: fields.iter().sum(), idle })
    }

    fn usage_since(self, previous: CpuTimes) -> Option<f64> {
        let total = self.total.checked_sub(previous.total)?;
        let idle = self.idle.checked_sub(previous.idle)?;
        if total == 0 {
            return None;
        }
        Some((total - idle.min(total)) as f64 * 100.0 / total as f64)
    }
}

/// Reads CPU temperature, utilisation and clock from a Linux filesystem root.
///
/// Utilisation is the busy share between two consecutive polls; the first poll reports
/// the average since boot.
#[derive(Debug, Clone)]
pub struct CpuProvider {
    root: PathBuf,
    previous: CpuTimes,
}

impl Default for CpuProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuProvider {
    pub fn new() -> Self {
        Self::with_root("/")
    }

    /// Read procfs/sysfs below `root` instead of `/`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), previous: CpuTimes::default() }
    }

    fn temperature(&self) -> Option<f64> {
        for zone in entries_with_prefix(&self.root.join("sys/class/thermal"), "thermal_zone") {
            let Some(kind) = read_trimmed(&zone.join("type")) else { continue };
            let kind = kind.to_lowercase();
            if THERMAL_ZONE_TYPES.iter().any(|wanted| kind.contains(wanted))
                && let Some(celsius) = read_f64(&zone.join("temp"), 1000.0)
            {
                trace!(zone = %kind, celsius, "CPU temperature from thermal zone");
                return Some(celsius);
            }
        }

        hwmon_named(&self.root, HWMON_DRIVERS)
            .find_map(|hwmon| temp_inputs(&hwmon).iter().find_map(|input| read_f64(input, 1000.0)))
    }

    fn usage(&mut self) -> Option<f64> {
        let stat = read_trimmed(&self.root.join("proc/stat"))?;
        let current = CpuTimes::parse(&stat)?;
        let usage = current.usage_since(self.previous);
        self.previous = current;
        usage
    }

    fn frequency(&self) -> Option<f64> {
        let cpus = entries_with_prefix(&self.root.join("sys/devices/system/cpu"), "cpu");
        let khz: Vec<f64> = cpus
            .iter()
            .filter_map(|cpu| read_f64(&cpu.join("cpufreq/scaling_cur_freq"), 1.0))
            .collect();
        if !khz.is_empty() {
            return Some(khz.iter().sum::<f64>() / khz.len() as f64 / 1000.0);
        }

        cpuinfo_mhz(&self.root.join("proc/cpuinfo"))
    }
}

fn cpuinfo_mhz(path: &Path) -> Option<f64> {
    read_trimmed(path)?
        .lines()
        .find(|line| line.starts_with("cpu MHz"))
        .and_then(|line| line.split(':').nth(1))
        .and_then(|value| value.trim().parse().ok())
}

impl MetricsProvider for CpuProvider {
    fn source(&self) -> MetricSource {
        MetricSource::Cpu
    }

    fn get_all_metrics(&mut self) -> Result<ProviderMetrics> {
        let metrics = ProviderMetrics {
            temperature: self.temperature(),
            usage_percentage: self.usage(),
            frequency: self.frequency(),
            vendor: None,
            name: None,
        };
        if metrics.temperature.is_none() {
            debug!("CPU temperature unavailable");
        }
        Ok(metrics)
    }
}
