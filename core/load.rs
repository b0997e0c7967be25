//! System-load probe.
//!
//! Only [`LoadProbe::load1`] is consulted by the router; `cpu_percent` and
//! the rest of [`LoadProbe::snapshot`] feed the `/load` endpoint only. On any
//! measurement failure the probe returns a sentinel indistinguishable from
//! "not overloaded" — a metric-collection failure must never make the
//! router more conservative than it already is.

use serde::Serialize;
use std::fs;
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct LoadSnapshot {
    pub cpu_percent: f64,
    pub load_1min: f64,
    pub load_5min: f64,
    pub load_15min: f64,
    pub memory_percent: f64,
    pub memory_available_gb: f64,
    pub timestamp: f64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LoadProbe;

impl LoadProbe {
    pub fn new() -> Self {
        Self
    }

    /// 1-minute load average, or `0.0` on failure (fail-safe "not
    /// overloaded").
    pub fn load1(&self) -> f64 {
        self.loadavg().map(|(l1, _, _)| l1).unwrap_or(0.0)
    }

    /// CPU utilization percent over a short sampling window, or `0.0` on
    /// failure. Never consulted by router branching — informational only.
    pub fn cpu_percent(&self) -> f64 {
        let Some((idle0, total0)) = read_cpu_jiffies() else {
            return 0.0;
        };
        std::thread::sleep(Duration::from_millis(100));
        let Some((idle1, total1)) = read_cpu_jiffies() else {
            return 0.0;
        };

        let idle_delta = idle1.saturating_sub(idle0) as f64;
        let total_delta = total1.saturating_sub(total0) as f64;
        if total_delta <= 0.0 {
            return 0.0;
        }
        ((1.0 - idle_delta / total_delta) * 100.0).clamp(0.0, 100.0)
    }

    /// Full metrics snapshot for `GET /load`.
    pub fn snapshot(&self) -> LoadSnapshot {
        let (load_1min, load_5min, load_15min) = self.loadavg().unwrap_or((0.0, 0.0, 0.0));
        let (memory_percent, memory_available_gb) = read_memory().unwrap_or((0.0, 0.0));
        LoadSnapshot {
            cpu_percent: self.cpu_percent(),
            load_1min,
            load_5min,
            load_15min,
            memory_percent,
            memory_available_gb,
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
        }
    }

    fn loadavg(&self) -> Option<(f64, f64, f64)> {
        let contents = fs::read_to_string("/proc/loadavg").ok()?;
        let mut fields = contents.split_whitespace();
        let l1: f64 = fields.next()?.parse().ok()?;
        let l5: f64 = fields.next()?.parse().ok()?;
        let l15: f64 = fields.next()?.parse().ok()?;
        Some((l1, l5, l15))
    }
}

fn read_cpu_jiffies() -> Option<(u64, u64)> {
    let contents = fs::read_to_string("/proc/stat").ok()?;
    let line = contents.lines().next()?;
    let mut fields = line.split_whitespace();
    if fields.next()? != "cpu" {
        return None;
    }
    let values: Vec<u64> = fields.filter_map(|f| f.parse().ok()).collect();
    // user nice system idle iowait irq softirq steal
    let idle = *values.get(3)? + values.get(4).copied().unwrap_or(0);
    let total: u64 = values.iter().sum();
    Some((idle, total))
}

fn read_memory() -> Option<(f64, f64)> {
    let contents = fs::read_to_string("/proc/meminfo").ok()?;
    let mut total_kb = None;
    let mut available_kb = None;
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total_kb = parse_kb(rest);
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available_kb = parse_kb(rest);
        }
    }
    let total = total_kb?;
    let available = available_kb?;
    if total <= 0.0 {
        return None;
    }
    let percent = (1.0 - available / total) * 100.0;
    let available_gb = available / (1024.0 * 1024.0);
    Some((percent.clamp(0.0, 100.0), available_gb))
}

fn parse_kb(s: &str) -> Option<f64> {
    s.trim().trim_end_matches("kB").trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load1_never_panics() {
        let probe = LoadProbe::new();
        let v = probe.load1();
        assert!(v >= 0.0);
    }

    #[test]
    fn snapshot_fields_are_non_negative() {
        let probe = LoadProbe::new();
        let snap = probe.snapshot();
        assert!(snap.cpu_percent >= 0.0);
        assert!(snap.load_1min >= 0.0);
        assert!(snap.memory_percent >= 0.0);
    }

    #[test]
    fn parse_kb_strips_suffix() {
        assert_eq!(parse_kb("   16384000 kB"), Some(16384000.0));
    }
}
