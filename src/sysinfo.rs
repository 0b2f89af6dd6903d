//! System-info collector for the stats panel
//!
//! Reads procfs/sysfs directly; every source is optional so the panel still
//! renders on machines without a thermal zone or network.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::net::{IpAddr, UdpSocket};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;

/// One reading of the host's vital signs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemSnapshot {
    pub cpu_pct: f32,
    pub ram_pct: f32,
    pub disk_pct: f32,
    pub temperature_c: Option<f32>,
    pub ip: Option<IpAddr>,
    pub now: DateTime<Local>,
}

/// Source of system snapshots
pub trait SystemProbe: Send + Sync {
    fn snapshot(&self) -> SystemSnapshot;
}

/// Cumulative jiffies from the aggregate `cpu` line of /proc/stat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CpuTimes {
    total: u64,
    idle: u64,
}

fn parse_cpu_line(stat: &str) -> Option<CpuTimes> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|f| f.parse().ok())
        .collect();
    if fields.len() < 4 {
        return None;
    }
    // idle + iowait
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    Some(CpuTimes { total: fields.iter().sum(), idle })
}

fn cpu_usage(prev: Option<CpuTimes>, now: CpuTimes) -> f32 {
    let (total, idle) = match prev {
        Some(p) if now.total > p.total => (now.total - p.total, now.idle.saturating_sub(p.idle)),
        _ => (now.total, now.idle),
    };
    if total == 0 {
        return 0.0;
    }
    (total.saturating_sub(idle)) as f32 * 100.0 / total as f32
}

fn parse_meminfo(meminfo: &str) -> Option<f32> {
    let field = |name: &str| -> Option<u64> {
        meminfo
            .lines()
            .find(|l| l.starts_with(name))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    };
    let total = field("MemTotal:")?;
    let available = field("MemAvailable:")?;
    if total == 0 {
        return None;
    }
    Some(total.saturating_sub(available) as f32 * 100.0 / total as f32)
}

#[cfg(unix)]
fn disk_usage(path: &str) -> Option<f32> {
    let c_path = std::ffi::CString::new(path).ok()?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: c_path is NUL terminated and stat is a valid out pointer.
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return None;
    }
    let used = (stat.f_blocks as u64).saturating_sub(stat.f_bfree as u64);
    let usable = used + stat.f_bavail as u64;
    if usable == 0 {
        return None;
    }
    Some(used as f32 * 100.0 / usable as f32)
}

#[cfg(not(unix))]
fn disk_usage(_path: &str) -> Option<f32> {
    None
}

/// Address of the interface that routes outward. Connecting a UDP socket
/// sends nothing; it only makes the kernel pick a source address.
fn primary_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    Some(socket.local_addr().ok()?.ip())
}

/// Probe backed by /proc and /sys
pub struct LinuxProbe {
    proc_root: PathBuf,
    thermal_zone: PathBuf,
    disk_path: String,
    last_cpu: Mutex<Option<CpuTimes>>,
}

impl LinuxProbe {
    pub fn new() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            thermal_zone: PathBuf::from("/sys/class/thermal/thermal_zone0/temp"),
            disk_path: "/".to_string(),
            last_cpu: Mutex::new(None),
        }
    }

    fn read(&self, name: &str) -> Option<String> {
        std::fs::read_to_string(self.proc_root.join(name)).ok()
    }

    fn cpu(&self) -> f32 {
        let Some(now) = self.read("stat").as_deref().and_then(parse_cpu_line) else {
            return 0.0;
        };
        let mut last = self.last_cpu.lock().unwrap_or_else(|e| e.into_inner());
        let pct = cpu_usage(*last, now);
        *last = Some(now);
        pct
    }

    fn temperature(&self) -> Option<f32> {
        let raw = std::fs::read_to_string(&self.thermal_zone).ok()?;
        let millis: f32 = raw.trim().parse().ok()?;
        Some((millis / 100.0).round() / 10.0)
    }
}

impl Default for LinuxProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProbe for LinuxProbe {
    fn snapshot(&self) -> SystemSnapshot {
        let snapshot = SystemSnapshot {
            cpu_pct: self.cpu(),
            ram_pct: self.read("meminfo").as_deref().and_then(parse_meminfo).unwrap_or(0.0),
            disk_pct: disk_usage(&self.disk_path).unwrap_or(0.0),
            temperature_c: self.temperature(),
            ip: primary_ip(),
            now: Local::now(),
        };
        debug!(?snapshot, "system snapshot");
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT: &str = "cpu  100 0 50 800 50 0 0 0 0 0\ncpu0 50 0 25 400 25 0 0 0 0 0\nintr 1 2 3\n";

    #[test]
    fn test_parse_cpu_line() {
        let times = parse_cpu_line(STAT).unwrap();
        assert_eq!(times, CpuTimes { total: 1000, idle: 850 });
        assert!(parse_cpu_line("intr 1 2").is_none());
    }

    #[test]
    fn test_cpu_usage_uses_delta() {
        let first = CpuTimes { total: 1000, idle: 850 };
        assert!((cpu_usage(None, first) - 15.0).abs() < 0.01);

        let second = CpuTimes { total: 1100, idle: 900 };
        assert!((cpu_usage(Some(first), second) - 50.0).abs() < 0.01);

        // counters did not move
        assert!((cpu_usage(Some(first), first) - 15.0).abs() < 0.01);
    }

    #[test]
    fn test_parse_meminfo() {
        let meminfo = "MemTotal:        1000 kB\nMemFree:          100 kB\nMemAvailable:     250 kB\n";
        assert!((parse_meminfo(meminfo).unwrap() - 75.0).abs() < 0.01);
        assert!(parse_meminfo("MemTotal: 10 kB\n").is_none());
    }

    #[test]
    fn test_probe_from_fake_proc() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stat"), STAT).unwrap();
        std::fs::write(
            dir.path().join("meminfo"),
            "MemTotal: 2000 kB\nMemAvailable: 500 kB\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("temp"), "48312\n").unwrap();

        let probe = LinuxProbe {
            proc_root: dir.path().to_path_buf(),
            thermal_zone: dir.path().join("temp"),
            disk_path: dir.path().to_string_lossy().to_string(),
            last_cpu: Mutex::new(None),
        };
        let snap = probe.snapshot();

        assert!((snap.cpu_pct - 15.0).abs() < 0.01);
        assert!((snap.ram_pct - 75.0).abs() < 0.01);
        assert_eq!(snap.temperature_c, Some(48.3));
    }
}
