//! Small helpers for reading procfs/sysfs attribute files.

use std::fs;
use std::path::{Path, PathBuf};

pub(crate) fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

/// Parse a numeric attribute and divide it by `divisor` (e.g. 1000 for millidegrees).
pub(crate) fn read_f64(path: &Path, divisor: f64) -> Option<f64> {
    read_trimmed(path)?.parse::<f64>().ok().map(|v| v / divisor)
}

/// Entries of `dir` whose file name starts with `prefix`, sorted by path.
pub(crate) fn entries_with_prefix(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(prefix))
        .map(|entry| entry.path())
        .collect();
    paths.sort();
    paths
}

/// `temp*_input` files under a hwmon directory, sorted.
pub(crate) fn temp_inputs(hwmon: &Path) -> Vec<PathBuf> {
    entries_with_prefix(hwmon, "temp")
        .into_iter()
        .filter(|p| p.file_name().is_some_and(|n| n.to_string_lossy().ends_with("_input")))
        .collect()
}

/// hwmon directories whose `name` attribute contains one of `names`.
pub(crate) fn hwmon_named<'a>(root: &'a Path, names: &'a [&str]) -> impl Iterator<Item = PathBuf> + 'a {
    entries_with_prefix(&root.join("sys/class/hwmon"), "hwmon").into_iter().filter(move |dir| {
        read_trimmed(&dir.join("name"))
            .map(|name| name.to_lowercase())
            .is_some_and(|name| names.iter().any(|wanted| name.contains(wanted)))
    })
}
