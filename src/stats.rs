// src/stats.rs
//! System health sampling for the status stream
//!
//! Reads the Raspberry Pi's procfs/sysfs, plus `statvfs` for disk usage.
//! Anything that can't be read is reported as unknown rather than zero.

use crate::{clock::SharedClock, session::SessionHandle};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio_util::sync::CancellationToken;

/// One system health sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub timestamp: DateTime<Utc>,
    /// Degrees Celsius
    pub cpu_temp: Option<f64>,
    /// Percent busy since the previous sample
    pub cpu_usage: Option<f64>,
    pub memory_usage: Option<f64>,
    /// Percent of the root filesystem in use
    pub disk_usage: Option<f64>,
    /// 1, 5 and 15 minute load averages
    pub load_average: Option<[f64; 3]>,
    pub battery_level: Option<f64>,
    /// Seconds since boot
    pub uptime: Option<f64>,
}

/// Reads system health from procfs and sysfs
#[derive(Debug, Clone)]
pub struct SystemMonitor {
    root: PathBuf,
    previous_cpu: Option<CpuTimes>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CpuTimes {
    idle: u64,
    total: u64,
}

impl Default for SystemMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemMonitor {
    pub fn new() -> Self {
        Self::with_root("/")
    }

    /// Read `proc` and `sys` below another directory
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            previous_cpu: None,
        }
    }

    pub fn sample(&mut self, now: DateTime<Utc>) -> SystemStats {
        SystemStats {
            timestamp: now,
            cpu_temp: self.cpu_temperature(),
            cpu_usage: self.cpu_usage(),
            memory_usage: self.memory_usage(),
            disk_usage: self.disk_usage(),
            load_average: self.load_average(),
            battery_level: self.battery_level(),
            uptime: self.uptime(),
        }
    }

    fn read(&self, relative: &str) -> Option<String> {
        fs::read_to_string(self.root.join(relative)).ok()
    }

    fn cpu_temperature(&self) -> Option<f64> {
        let millidegrees: f64 = self
            .read("sys/class/thermal/thermal_zone0/temp")?
            .trim()
            .parse()
            .ok()?;
        Some(millidegrees / 1000.0)
    }

    fn cpu_usage(&mut self) -> Option<f64> {
        let current = parse_cpu_times(&self.read("proc/stat")?)?;
        let previous = self.previous_cpu.replace(current)?;

        let total = current.total.checked_sub(previous.total)?;
        let idle = current.idle.checked_sub(previous.idle)?;
        if total == 0 {
            return None;
        }
        Some((total - idle.min(total)) as f64 / total as f64 * 100.0)
    }

    fn memory_usage(&self) -> Option<f64> {
        parse_memory_usage(&self.read("proc/meminfo")?)
    }

    fn load_average(&self) -> Option<[f64; 3]> {
        parse_load_average(&self.read("proc/loadavg")?)
    }

    #[cfg(unix)]
    fn disk_usage(&self) -> Option<f64> {
        let stats = nix::sys::statvfs::statvfs(self.root.as_path()).ok()?;
        let total = stats.blocks() as f64;
        if total <= 0.0 {
            return None;
        }
        let free = stats.blocks_free() as f64;
        Some((total - free) / total * 100.0)
    }

    #[cfg(not(unix))]
    fn disk_usage(&self) -> Option<f64> {
        None
    }

    fn uptime(&self) -> Option<f64> {
        self.read("proc/uptime")?
            .split_whitespace()
            .next()?
            .parse()
            .ok()
    }

    /// Battery capacity, or 100% when the Pi runs on wall power
    fn battery_level(&self) -> Option<f64> {
        let supplies = self.root.join("sys/class/power_supply");
        let Ok(entries) = fs::read_dir(&supplies) else {
            return Some(100.0);
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if read_trimmed(&path.join("type")).as_deref() == Some("Battery") {
                return read_trimmed(&path.join("capacity")).and_then(|value| value.parse().ok());
            }
        }
        Some(100.0)
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|value| value.trim().to_string())
}

fn parse_cpu_times(stat: &str) -> Option<CpuTimes> {
    let line = stat.lines().find(|line| line.starts_with("cpu "))?;
    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|value| value.parse().ok())
        .collect();
    if values.len() < 4 {
        return None;
    }
    // idle + iowait
    let idle = values[3] + values.get(4).copied().unwrap_or(0);
    Some(CpuTimes {
        idle,
        total: values.iter().sum(),
    })
}

fn parse_memory_usage(meminfo: &str) -> Option<f64> {
    let field = |name: &str| -> Option<f64> {
        meminfo
            .lines()
            .find(|line| line.starts_with(name))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    };
    let total = field("MemTotal:")?;
    let available = field("MemAvailable:")?;
    if total <= 0.0 {
        return None;
    }
    Some((1.0 - available / total) * 100.0)
}

fn parse_load_average(loadavg: &str) -> Option<[f64; 3]> {
    let mut values = loadavg.split_whitespace().map(|value| value.parse::<f64>().ok());
    Some([values.next()??, values.next()??, values.next()??])
}

/// Sample system stats on a fixed interval into the session's stats history
pub async fn run_sampler(
    mut monitor: SystemMonitor,
    session: SessionHandle,
    clock: SharedClock,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let stats = monitor.sample(clock.now());
                tracing::trace!(?stats, "System stats sampled");
                session.record_stats(stats);
            }
        }
    }
    tracing::debug!("System stats sampler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_sample_from_fake_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "sys/class/thermal/thermal_zone0/temp", "48312\n");
        write(
            root,
            "proc/meminfo",
            "MemTotal:        4000000 kB\nMemFree:  1000000 kB\nMemAvailable:    3000000 kB\n",
        );
        write(root, "proc/uptime", "3600.52 14000.10\n");
        write(root, "proc/loadavg", "0.52 0.58 0.59 1/389 12345\n");
        write(root, "proc/stat", "cpu  100 0 100 700 100 0 0 0 0 0\ncpu0 1 2 3 4\n");

        let mut monitor = SystemMonitor::with_root(root);
        let first = monitor.sample(Utc::now());
        assert_eq!(first.cpu_temp, Some(48.312));
        assert_eq!(first.memory_usage, Some(25.0));
        assert_eq!(first.uptime, Some(3600.52));
        assert_eq!(first.cpu_usage, None);
        assert_eq!(first.battery_level, Some(100.0));
        assert_eq!(first.load_average, Some([0.52, 0.58, 0.59]));
        #[cfg(unix)]
        {
            let disk = first.disk_usage.unwrap();
            assert!((0.0..=100.0).contains(&disk), "{}", disk);
        }

        write(root, "proc/stat", "cpu  150 0 150 750 150 0 0 0 0 0\n");
        let second = monitor.sample(Utc::now());
        // 200 ticks elapsed, 100 of them idle/iowait
        assert_eq!(second.cpu_usage, Some(50.0));
    }

    #[test]
    fn test_battery_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "sys/class/power_supply/AC/type", "Mains\n");
        write(root, "sys/class/power_supply/BAT0/type", "Battery\n");
        write(root, "sys/class/power_supply/BAT0/capacity", "87\n");

        let mut monitor = SystemMonitor::with_root(root);
        assert_eq!(monitor.sample(Utc::now()).battery_level, Some(87.0));
    }

    #[test]
    fn test_unreadable_values_are_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let mut monitor = SystemMonitor::with_root(dir.path());
        let stats = monitor.sample(Utc::now());
        assert_eq!(stats.cpu_temp, None);
        assert_eq!(stats.memory_usage, None);
        assert_eq!(stats.uptime, None);
        assert_eq!(stats.load_average, None);
    }

    #[test]
    fn test_truncated_loadavg_is_unknown() {
        assert_eq!(parse_load_average("0.52 0.58"), None);
        assert_eq!(parse_load_average("0.52 abc 0.59 1/389 1"), None);
    }
}
