// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! hwmon sysfs discovery for the Dell SMM/DDV drivers.
//!
//! Scans `/sys/class/hwmon/` for the first device named `dell_smm` or
//! `dell_ddv` and indexes its `tempN_input` and `fanN_input` files.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const HWMON_ROOT: &str = "/sys/class/hwmon";

/// hwmon driver names exposed by Dell laptops, in preference order.
pub const DELL_HWMON_NAMES: [&str; 2] = ["dell_smm", "dell_ddv"];

/// Inclusive upper bound for a plausible temperature reading.
pub const MAX_TEMP_C: u32 = 120;

/// Inclusive upper bound for a plausible fan reading.
pub const MAX_FAN_RPM: u32 = 10_000;

/// A discovered Dell hwmon device.
#[derive(Debug, Clone)]
pub struct DellHwmon {
    /// Name reported by the driver, e.g. "dell_smm"
    pub name: String,
    /// Absolute path of the hwmon directory
    pub dir: PathBuf,
    /// `tempN_input` paths keyed by N (millidegrees C)
    pub temps: BTreeMap<u32, PathBuf>,
    /// `fanN_input` paths keyed by N (RPM)
    pub fans: BTreeMap<u32, PathBuf>,
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Scan `/sys/class/hwmon` for a Dell sensor device.
pub fn discover() -> io::Result<Option<DellHwmon>> {
    discover_in(Path::new(HWMON_ROOT))
}

/// Scan `root` (laid out like `/sys/class/hwmon`) for a Dell sensor device.
pub fn discover_in(root: &Path) -> io::Result<Option<DellHwmon>> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(root)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    dirs.sort();

    for dir in dirs {
        let Some(name) = read_trimmed(&dir.join("name")) else {
            continue;
        };
        if !DELL_HWMON_NAMES.contains(&name.as_str()) {
            continue;
        }

        let hwmon = DellHwmon {
            temps: index_inputs(&dir, "temp"),
            fans: index_inputs(&dir, "fan"),
            name,
            dir,
        };
        log::info!(
            "Found Dell hwmon {} at {} (temps {:?}, fans {:?})",
            hwmon.name,
            hwmon.dir.display(),
            hwmon.temps.keys().collect::<Vec<_>>(),
            hwmon.fans.keys().collect::<Vec<_>>()
        );
        return Ok(Some(hwmon));
    }

    Ok(None)
}

/// Collect `{prefix}N_input` files in `dir`, keyed by N.
fn index_inputs(dir: &Path, prefix: &str) -> BTreeMap<u32, PathBuf> {
    let mut found = BTreeMap::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return found;
    };

    for entry in entries.filter_map(|e| e.ok()) {
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        let Some(n) = file_name
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_suffix("_input"))
            .and_then(|n| n.parse::<u32>().ok())
        else {
            continue;
        };
        found.insert(n, entry.path());
    }

    found
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

impl DellHwmon {
    /// Read `tempN_input` in whole degrees, rejecting zero and implausible values.
    pub fn read_temp_c(&self, n: u32) -> Option<u32> {
        let millic = read_trimmed(self.temps.get(&n)?)?.parse::<i64>().ok()?;
        if millic <= 0 {
            return None;
        }
        let celsius = u32::try_from(millic / 1000).ok()?;
        (celsius <= MAX_TEMP_C).then_some(celsius)
    }

    /// Read `fanN_input`, rejecting implausible values.
    pub fn read_fan_rpm(&self, n: u32) -> Option<u32> {
        let rpm = read_trimmed(self.fans.get(&n)?)?.parse::<u32>().ok()?;
        (rpm <= MAX_FAN_RPM).then_some(rpm)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::fs;
    use std::path::Path;

    /// Lay out a fake hwmon device under `root`.
    pub fn fake_device(root: &Path, dir: &str, name: &str, files: &[(&str, &str)]) {
        let dev = root.join(dir);
        fs::create_dir_all(&dev).unwrap();
        fs::write(dev.join("name"), format!("{name}\n")).unwrap();
        for (file, value) in files {
            fs::write(dev.join(file), format!("{value}\n")).unwrap();
        }
    }
}
