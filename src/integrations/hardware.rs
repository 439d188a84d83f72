//! Best-effort hardware health: temperature, battery, storage

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::time::Duration;
use sysinfo::Components;
use tracing::debug;

use super::run_command;
use crate::diagnostics::{BatteryHealth, HardwareHealth};

static CYCLE_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Cycle Count:\s*(\d+)").expect("valid regex"));
static CONDITION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Condition:\s*(.+)").expect("valid regex"));
static SMART_STATUS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"SMART Status:\s*(.+)").expect("valid regex"));

/// Design capacity ratio below which a battery counts as worn.
const WORN_CAPACITY_RATIO: f64 = 0.8;

/// Reads hardware sensors and vendor tools. Every sub-reading may be absent.
#[derive(Debug, Clone)]
pub struct HardwareProbe {
    command_timeout: Duration,
}

impl HardwareProbe {
    pub fn new(command_timeout: Duration) -> Self {
        Self { command_timeout }
    }

    pub async fn read(&self) -> HardwareHealth {
        let temperature = async {
            tokio::task::spawn_blocking(max_component_temperature)
                .await
                .ok()
                .flatten()
        };

        let (temperature, (battery_health, battery_cycles), storage_health) =
            futures::join!(temperature, self.battery(), self.storage());

        HardwareHealth {
            cpu_temperature_celsius: temperature,
            battery_health,
            battery_cycles,
            storage_health,
        }
    }

    async fn battery(&self) -> (BatteryHealth, Option<u32>) {
        if cfg!(target_os = "macos") {
            return match run_command("system_profiler", &["SPPowerDataType"], self.command_timeout)
                .await
            {
                Ok(out) => parse_power_profile(&out),
                Err(err) => {
                    debug!(error = %err, "battery information unavailable");
                    (BatteryHealth::Unknown, None)
                }
            };
        }

        tokio::task::spawn_blocking(|| read_sysfs_battery(Path::new("/sys/class/power_supply")))
            .await
            .unwrap_or((BatteryHealth::Unknown, None))
    }

    async fn storage(&self) -> Option<String> {
        if !cfg!(target_os = "macos") {
            return None;
        }
        match run_command("diskutil", &["info", "disk0"], self.command_timeout).await {
            Ok(out) => parse_smart_status(&out),
            Err(err) => {
                debug!(error = %err, "storage health unavailable");
                None
            }
        }
    }
}

fn max_component_temperature() -> Option<f64> {
    let components = Components::new_with_refreshed_list();
    components
        .list()
        .iter()
        .map(|c| f64::from(c.temperature()))
        .filter(|t| t.is_finite() && *t > 0.0)
        .max_by(f64::total_cmp)
}

/// Battery condition and cycle count from `system_profiler SPPowerDataType`.
pub fn parse_power_profile(output: &str) -> (BatteryHealth, Option<u32>) {
    let cycles = CYCLE_COUNT
        .captures(output)
        .and_then(|c| c[1].parse().ok());
    let health = CONDITION
        .captures(output)
        .map(|c| BatteryHealth::from(c[1].trim()))
        .unwrap_or_default();
    (health, cycles)
}

pub fn parse_smart_status(output: &str) -> Option<String> {
    SMART_STATUS
        .captures(output)
        .map(|c| c[1].trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Battery wear from `energy_full / energy_full_design` under a Linux
/// power_supply directory.
pub fn read_sysfs_battery(root: &Path) -> (BatteryHealth, Option<u32>) {
    let Ok(entries) = std::fs::read_dir(root) else {
        return (BatteryHealth::Unknown, None);
    };

    for entry in entries.flatten() {
        let dir = entry.path();
        let is_battery = std::fs::read_to_string(dir.join("type"))
            .map(|t| t.trim() == "Battery")
            .unwrap_or(false);
        if !is_battery {
            continue;
        }

        let cycles = read_number(&dir.join("cycle_count")).map(|c| c as u32);
        let full = read_number(&dir.join("energy_full"))
            .or_else(|| read_number(&dir.join("charge_full")));
        let design = read_number(&dir.join("energy_full_design"))
            .or_else(|| read_number(&dir.join("charge_full_design")));

        let health = match (full, design) {
            (Some(full), Some(design)) if design > 0 => {
                if (full as f64 / design as f64) < WORN_CAPACITY_RATIO {
                    BatteryHealth::Poor
                } else {
                    BatteryHealth::Normal
                }
            }
            _ => BatteryHealth::Unknown,
        };
        return (health, cycles);
    }

    (BatteryHealth::Unknown, None)
}

fn read_number(path: &Path) -> Option<u64> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn parses_system_profiler_battery_section() {
        let out = "\
Battery Information:

      Health Information:
          Cycle Count: 412
          Condition: Service Battery
          Maximum Capacity: 78%
";
        assert_eq!(parse_power_profile(out), (BatteryHealth::Poor, Some(412)));
    }

    #[test]
    fn desktop_without_battery_is_unknown() {
        assert_eq!(
            parse_power_profile("AC Charger Information:\n  Connected: Yes\n"),
            (BatteryHealth::Unknown, None)
        );
    }

    #[test]
    fn parses_smart_status() {
        let out = "   Device Node:  /dev/disk0\n   SMART Status:             Verified\n";
        assert_eq!(parse_smart_status(out), Some("Verified".to_string()));
        assert_eq!(parse_smart_status("nothing here"), None);
    }

    fn battery_dir(root: &Path, full: &str, design: &str) {
        let bat = root.join("BAT0");
        fs::create_dir_all(&bat).unwrap();
        fs::write(bat.join("type"), "Battery\n").unwrap();
        fs::write(bat.join("energy_full"), full).unwrap();
        fs::write(bat.join("energy_full_design"), design).unwrap();
        fs::write(bat.join("cycle_count"), "233\n").unwrap();
    }

    #[test]
    fn worn_sysfs_battery_is_poor() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("AC")).unwrap();
        fs::write(dir.path().join("AC").join("type"), "Mains\n").unwrap();
        battery_dir(dir.path(), "35000000\n", "50000000\n");

        assert_eq!(read_sysfs_battery(dir.path()), (BatteryHealth::Poor, Some(233)));
    }

    #[test]
    fn healthy_sysfs_battery_is_normal() {
        let dir = tempdir().unwrap();
        battery_dir(dir.path(), "45000000\n", "50000000\n");

        assert_eq!(read_sysfs_battery(dir.path()).0, BatteryHealth::Normal);
    }

    #[test]
    fn missing_power_supply_dir_is_unknown() {
        let dir = tempdir().unwrap();
        assert_eq!(
            read_sysfs_battery(&dir.path().join("missing")),
            (BatteryHealth::Unknown, None)
        );
    }
}
