//! GPU telemetry.
//!
//! The vendor is detected once at construction: NVIDIA through `nvidia-smi`, then AMD and
//! Intel through the DRM vendor ids in sysfs. Each poll reads temperature, utilisation and
//! graphics clock the way that vendor exposes them.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, trace};

use super::sysfs::{entries_with_prefix, hwmon_named, read_f64, read_trimmed, temp_inputs};
use super::{MetricSource, MetricsProvider, ProviderMetrics};
use crate::Result;

const AMD_VENDOR_ID: &str = "0x1002";
const INTEL_VENDOR_ID: &str = "0x8086";

/// Detected GPU vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
}

impl fmt::Display for GpuVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GpuVendor::Nvidia => "nvidia",
            GpuVendor::Amd => "amd",
            GpuVendor::Intel => "intel",
        })
    }
}

#[derive(Debug, Clone)]
struct Detected {
    vendor: GpuVendor,
    name: String,
    /// `/sys/class/drm/cardN/device` for sysfs-driven vendors.
    device_dir: Option<PathBuf>,
}

/// Reads GPU metrics for the first supported GPU.
#[derive(Debug, Clone)]
pub struct GpuProvider {
    root: PathBuf,
    nvidia_smi: OsString,
    detected: Option<Detected>,
}

impl Default for GpuProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuProvider {
    pub fn new() -> Self {
        Self::detect("/", "nvidia-smi")
    }

    /// Detect the GPU below `root`, querying NVIDIA devices through `nvidia_smi`.
    pub fn detect(root: impl Into<PathBuf>, nvidia_smi: impl Into<OsString>) -> Self {
        let root = root.into();
        let nvidia_smi = nvidia_smi.into();

        let detected = nvidia_name(&nvidia_smi)
            .map(|name| Detected { vendor: GpuVendor::Nvidia, name, device_dir: None })
            .or_else(|| sysfs_gpu(&root, AMD_VENDOR_ID, GpuVendor::Amd))
            .or_else(|| sysfs_gpu(&root, INTEL_VENDOR_ID, GpuVendor::Intel));

        match &detected {
            Some(gpu) => info!(vendor = %gpu.vendor, name = %gpu.name, "GPU detected"),
            None => info!("No supported GPU detected"),
        }
        Self { root, nvidia_smi, detected }
    }

    pub fn vendor(&self) -> Option<GpuVendor> {
        self.detected.as_ref().map(|gpu| gpu.vendor)
    }

    fn nvidia_metrics(&self) -> (Option<f64>, Option<f64>, Option<f64>) {
        let Some(line) = run_nvidia_smi(
            &self.nvidia_smi,
            "temperature.gpu,utilization.gpu,clocks.current.graphics",
        ) else {
            return (None, None, None);
        };
        let mut fields = line.split(',').map(|f| f.trim().parse::<f64>().ok());
        let mut next = || fields.next().flatten();
        (next(), next(), next())
    }

    fn amd_metrics(&self, device_dir: &Path) -> (Option<f64>, Option<f64>, Option<f64>) {
        let temperature = hwmon_named(&self.root, &["amdgpu"]).find_map(|hwmon| amd_temperature(&hwmon));
        let usage = read_f64(&device_dir.join("gpu_busy_percent"), 1.0);
        let frequency = read_trimmed(&device_dir.join("pp_dpm_sclk"))
            .and_then(|table| active_dpm_mhz(&table))
            .or_else(|| {
                hwmon_named(&self.root, &["amdgpu"])
                    .find_map(|hwmon| read_f64(&hwmon.join("freq1_input"), 1e6))
            });
        (temperature, usage, frequency)
    }

    fn intel_metrics(&self, device_dir: &Path) -> (Option<f64>, Option<f64>, Option<f64>) {
        let temperature = hwmon_named(&self.root, &["i915"])
            .find_map(|hwmon| temp_inputs(&hwmon).iter().find_map(|input| read_f64(input, 1000.0)));
        // gt_cur_freq_mhz lives on the card, one level above `device`.
        let frequency = device_dir
            .parent()
            .and_then(|card| read_f64(&card.join("gt_cur_freq_mhz"), 1.0));
        (temperature, None, frequency)
    }
}

impl MetricsProvider for GpuProvider {
    fn source(&self) -> MetricSource {
        MetricSource::Gpu
    }

    fn get_all_metrics(&mut self) -> Result<ProviderMetrics> {
        let Some(gpu) = &self.detected else {
            return Ok(ProviderMetrics::default());
        };

        let (temperature, usage_percentage, frequency) = match (gpu.vendor, &gpu.device_dir) {
            (GpuVendor::Nvidia, _) => self.nvidia_metrics(),
            (GpuVendor::Amd, Some(dir)) => self.amd_metrics(dir),
            (GpuVendor::Intel, Some(dir)) => self.intel_metrics(dir),
            (_, None) => (None, None, None),
        };
        trace!(?temperature, ?usage_percentage, ?frequency, "GPU poll");

        Ok(ProviderMetrics {
            temperature,
            usage_percentage,
            frequency,
            vendor: Some(gpu.vendor.to_string()),
            name: Some(gpu.name.clone()),
        })
    }
}

fn run_nvidia_smi(command: &OsString, query: &str) -> Option<String> {
    let output = Command::new(command)
        .arg(format!("--query-gpu={query}"))
        .arg("--format=csv,noheader,nounits")
        .output()
        .map_err(|e| debug!(error = %e, "nvidia-smi unavailable"))
        .ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

fn nvidia_name(command: &OsString) -> Option<String> {
    run_nvidia_smi(command, "name")
}

fn sysfs_gpu(root: &Path, vendor_id: &str, vendor: GpuVendor) -> Option<Detected> {
    entries_with_prefix(&root.join("sys/class/drm"), "card")
        .into_iter()
        .map(|card| card.join("device"))
        .find(|device| {
            read_trimmed(&device.join("vendor")).is_some_and(|id| id.eq_ignore_ascii_case(vendor_id))
        })
        .map(|device_dir| {
            let name = match vendor {
                GpuVendor::Amd => match read_trimmed(&device_dir.join("device")) {
                    Some(device_id) => format!("AMD GPU (Device {device_id})"),
                    None => "AMD GPU".to_string(),
                },
                _ => "Intel GPU".to_string(),
            };
            Detected { vendor, name, device_dir: Some(device_dir) }
        })
}

/// Junction/hotspot sensor if labelled, else edge, else the first input.
fn amd_temperature(hwmon: &Path) -> Option<f64> {
    let labelled: Vec<(String, PathBuf)> = entries_with_prefix(hwmon, "temp")
        .into_iter()
        .filter_map(|path| {
            let file = path.file_name()?.to_string_lossy().into_owned();
            let index = file.strip_suffix("_label")?.to_string();
            let label = read_trimmed(&path)?.to_lowercase();
            Some((label, hwmon.join(format!("{index}_input"))))
        })
        .collect();

    fn pick(labelled: &[(String, PathBuf)], keywords: &[&str]) -> Option<f64> {
        labelled
            .iter()
            .filter(|(label, _)| keywords.iter().any(|k| label.contains(k)))
            .find_map(|(_, input)| read_f64(input, 1000.0))
    }

    pick(&labelled, &["junction", "hotspot"])
        .or_else(|| pick(&labelled, &["edge"]))
        .or_else(|| temp_inputs(hwmon).iter().find_map(|input| read_f64(input, 1000.0)))
}

/// Clock of the `*`-marked line of a `pp_dpm_sclk` table, e.g. `1: 1800Mhz *`.
fn active_dpm_mhz(table: &str) -> Option<f64> {
    let line = table.lines().find(|line| line.contains('*'))?;
    let value = line.split(':').nth(1)?.trim();
    let digits: String = value.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const NO_SMI: &str = "/nonexistent/nvidia-smi";

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn amd_from_sysfs() {
        let root = tempfile::tempdir().unwrap();
        let r = root.path();
        write(r, "sys/class/drm/card0/device/vendor", "0x1002\n");
        write(r, "sys/class/drm/card0/device/device", "0x73bf\n");
        write(r, "sys/class/drm/card0/device/gpu_busy_percent", "37\n");
        write(r, "sys/class/drm/card0/device/pp_dpm_sclk", "0: 500Mhz\n1: 2250Mhz *\n2: 2600Mhz\n");
        write(r, "sys/class/hwmon/hwmon3/name", "amdgpu\n");
        write(r, "sys/class/hwmon/hwmon3/temp1_label", "edge\n");
        write(r, "sys/class/hwmon/hwmon3/temp1_input", "51000\n");
        write(r, "sys/class/hwmon/hwmon3/temp2_label", "junction\n");
        write(r, "sys/class/hwmon/hwmon3/temp2_input", "68000\n");

        let mut provider = GpuProvider::detect(r, NO_SMI);
        assert_eq!(provider.vendor(), Some(GpuVendor::Amd));

        let metrics = provider.get_all_metrics().unwrap();
        assert_eq!(metrics.temperature, Some(68.0));
        assert_eq!(metrics.usage_percentage, Some(37.0));
        assert_eq!(metrics.frequency, Some(2250.0));
        assert_eq!(metrics.vendor.as_deref(), Some("amd"));
        assert_eq!(metrics.name.as_deref(), Some("AMD GPU (Device 0x73bf)"));
    }

    #[test]
    fn amd_edge_when_no_junction() {
        let root = tempfile::tempdir().unwrap();
        write(root.path(), "hwmon/temp1_label", "edge\n");
        write(root.path(), "hwmon/temp1_input", "45500\n");
        assert_eq!(amd_temperature(&root.path().join("hwmon")), Some(45.5));
    }

    #[test]
    fn intel_from_sysfs() {
        let root = tempfile::tempdir().unwrap();
        let r = root.path();
        write(r, "sys/class/drm/card1/device/vendor", "0x8086\n");
        write(r, "sys/class/drm/card1/gt_cur_freq_mhz", "1300\n");
        write(r, "sys/class/hwmon/hwmon1/name", "i915\n");
        write(r, "sys/class/hwmon/hwmon1/temp1_input", "44000\n");

        let metrics = GpuProvider::detect(r, NO_SMI).get_all_metrics().unwrap();
        assert_eq!(metrics.vendor.as_deref(), Some("intel"));
        assert_eq!(metrics.temperature, Some(44.0));
        assert_eq!(metrics.frequency, Some(1300.0));
        assert_eq!(metrics.usage_percentage, None);
    }

    #[test]
    fn no_gpu_reports_nothing() {
        let root = tempfile::tempdir().unwrap();
        let mut provider = GpuProvider::detect(root.path(), NO_SMI);
        assert_eq!(provider.vendor(), None);
        assert_eq!(provider.get_all_metrics().unwrap(), ProviderMetrics::default());
    }

    #[test]
    fn dpm_table_parsing() {
        assert_eq!(active_dpm_mhz("0: 300Mhz *\n1: 800Mhz"), Some(300.0));
        assert_eq!(active_dpm_mhz("0: 300Mhz\n1: 800MHz"), None);
    }
}
