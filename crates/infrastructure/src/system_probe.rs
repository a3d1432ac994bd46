//! Host resource sampling from `/proc` and `statvfs`.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::Mutex;

use swarm_core::{SwarmError, SwarmResult};
use tracing::debug;

/// Point-in-time description of the host a node runs on
#[derive(Debug, Clone, PartialEq)]
pub struct HostSnapshot {
    pub hostname: String,
    pub platform: String,
    pub cpus: usize,
    /// Bytes
    pub total_memory: u64,
    /// Bytes available to new allocations
    pub free_memory: u64,
    pub load_average: [f64; 3],
    pub uptime_seconds: f64,
}

impl HostSnapshot {
    pub fn memory_usage_percent(&self) -> f64 {
        if self.total_memory == 0 {
            return 0.0;
        }
        let used = self.total_memory.saturating_sub(self.free_memory);
        used as f64 / self.total_memory as f64 * 100.0
    }
}

/// Source of host resource figures, swappable for tests.
pub trait SystemProbe: Send + Sync {
    fn snapshot(&self) -> SwarmResult<HostSnapshot>;

    /// Busy share of CPU time since the previous call (since boot on the
    /// first call), 0 to 100
    fn cpu_usage(&self) -> SwarmResult<f64>;

    /// Used share of the filesystem holding `path`, 0 to 100
    fn disk_usage(&self, path: &Path) -> SwarmResult<f64>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CpuTimes {
    total: u64,
    idle: u64,
}

impl CpuTimes {
    /// Parses the aggregate `cpu ` line of `/proc/stat`
    fn parse(content: &str) -> Option<Self> {
        let line = content.lines().find(|l| l.starts_with("cpu "))?;
        let fields: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .take(8)
            .map(|f| f.parse().unwrap_or(0))
            .collect();
        if fields.len() < 4 {
            return None;
        }
        let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
        Some(Self {
            total: fields.iter().sum(),
            idle,
        })
    }

    fn busy_percent_since(&self, previous: &CpuTimes) -> f64 {
        let total = self.total.saturating_sub(previous.total);
        let idle = self.idle.saturating_sub(previous.idle);
        if total == 0 {
            return 0.0;
        }
        (total.saturating_sub(idle)) as f64 / total as f64 * 100.0
    }
}

fn parse_meminfo(content: &str) -> Option<(u64, u64)> {
    let field = |name: &str| -> Option<u64> {
        content
            .lines()
            .find(|l| l.starts_with(name))
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|v| v.parse::<u64>().ok())
            .map(|kb| kb * 1024)
    };
    let total = field("MemTotal:")?;
    let free = field("MemAvailable:").or_else(|| field("MemFree:"))?;
    Some((total, free))
}

fn parse_loadavg(content: &str) -> [f64; 3] {
    let mut values = content
        .split_whitespace()
        .map(|v| v.parse::<f64>().unwrap_or(0.0));
    [
        values.next().unwrap_or(0.0),
        values.next().unwrap_or(0.0),
        values.next().unwrap_or(0.0),
    ]
}

fn read_proc(path: &str) -> SwarmResult<String> {
    std::fs::read_to_string(path)
        .map_err(|e| SwarmError::MetricsCollection(format!("failed to read {path}: {e}")))
}

/// Linux implementation reading `/proc/stat`, `/proc/meminfo`,
/// `/proc/loadavg`, `/proc/uptime` and `statvfs(2)`
#[derive(Debug, Default)]
pub struct LinuxSystemProbe {
    last_cpu: Mutex<Option<CpuTimes>>,
}

impl LinuxSystemProbe {
    pub fn new() -> Self {
        Self::default()
    }
}

pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

impl SystemProbe for LinuxSystemProbe {
    fn snapshot(&self) -> SwarmResult<HostSnapshot> {
        let (total_memory, free_memory) = parse_meminfo(&read_proc("/proc/meminfo")?)
            .ok_or_else(|| SwarmError::MetricsCollection("malformed /proc/meminfo".to_string()))?;
        let load_average = parse_loadavg(&read_proc("/proc/loadavg")?);
        let uptime_seconds = read_proc("/proc/uptime")?
            .split_whitespace()
            .next()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.0);

        Ok(HostSnapshot {
            hostname: local_hostname(),
            platform: std::env::consts::OS.to_string(),
            cpus: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            total_memory,
            free_memory,
            load_average,
            uptime_seconds,
        })
    }

    fn cpu_usage(&self) -> SwarmResult<f64> {
        let current = CpuTimes::parse(&read_proc("/proc/stat")?)
            .ok_or_else(|| SwarmError::MetricsCollection("malformed /proc/stat".to_string()))?;

        let mut last = self
            .last_cpu
            .lock()
            .map_err(|_| SwarmError::Internal("cpu sample lock poisoned".to_string()))?;
        let previous = last.unwrap_or_default();
        *last = Some(current);

        let usage = current.busy_percent_since(&previous);
        debug!(usage, "Sampled CPU usage");
        Ok(usage)
    }

    fn disk_usage(&self, path: &Path) -> SwarmResult<f64> {
        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|e| {
            SwarmError::MetricsCollection(format!("invalid disk path {}: {e}", path.display()))
        })?;

        // SAFETY: `stat` is a plain C struct that statvfs fully initializes on
        // success; `c_path` is a valid NUL-terminated string for the call.
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
        if rc != 0 {
            return Err(SwarmError::MetricsCollection(format!(
                "statvfs({}) failed: {}",
                path.display(),
                std::io::Error::last_os_error()
            )));
        }

        let block = stat.f_frsize as f64;
        let used = (stat.f_blocks as f64 - stat.f_bfree as f64) * block;
        let available = stat.f_bavail as f64 * block;
        if used + available <= 0.0 {
            return Ok(0.0);
        }
        Ok(used / (used + available) * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_times_parse_and_delta() {
        let before = CpuTimes::parse("cpu  100 0 100 700 100 0 0 0 0 0\ncpu0 1 2 3 4\n").unwrap();
        let after = CpuTimes::parse("cpu  200 0 200 800 100 0 0 0 0 0\n").unwrap();

        assert_eq!(before.total, 1000);
        assert_eq!(before.idle, 800);
        // 300 ticks elapsed, 100 of them idle
        let usage = after.busy_percent_since(&before);
        assert!((usage - 66.666).abs() < 0.01);
    }

    #[test]
    fn test_cpu_times_rejects_missing_line() {
        assert!(CpuTimes::parse("intr 1 2 3").is_none());
    }

    #[test]
    fn test_meminfo_prefers_available() {
        let content = "MemTotal:       1000 kB\nMemFree:         100 kB\nMemAvailable:    400 kB\n";
        assert_eq!(parse_meminfo(content), Some((1000 * 1024, 400 * 1024)));

        let no_available = "MemTotal:       1000 kB\nMemFree:         100 kB\n";
        assert_eq!(parse_meminfo(no_available), Some((1000 * 1024, 100 * 1024)));
    }

    #[test]
    fn test_loadavg_parse() {
        assert_eq!(parse_loadavg("0.50 1.25 2.00 1/123 4567"), [0.5, 1.25, 2.0]);
        assert_eq!(parse_loadavg(""), [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_memory_usage_percent() {
        let snapshot = HostSnapshot {
            hostname: "h".into(),
            platform: "linux".into(),
            cpus: 2,
            total_memory: 200,
            free_memory: 50,
            load_average: [0.0; 3],
            uptime_seconds: 1.0,
        };
        assert_eq!(snapshot.memory_usage_percent(), 75.0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_linux_probe_reads_host() {
        let probe = LinuxSystemProbe::new();
        let snapshot = probe.snapshot().unwrap();
        assert!(snapshot.total_memory > 0);
        assert!(snapshot.cpus >= 1);

        let usage = probe.disk_usage(Path::new("/")).unwrap();
        assert!((0.0..=100.0).contains(&usage));
        assert!(probe.disk_usage(Path::new("/definitely/not/here")).is_err());
    }
}
