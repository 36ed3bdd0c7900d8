//! Linux probe backed by procfs.
//!
//! CPU utilization needs two `/proc/stat` reads at least 100 ms apart; the
//! idle-vs-total delta ratio over that window is the utilization. Network and
//! disk counters are cumulative, so the probe keeps the previous reading and
//! reports deltas.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::sample::HostSample;

const CPU_WINDOW: Duration = Duration::from_millis(150);

#[derive(Debug)]
pub(crate) struct Probe {
    prev_net: Option<(u64, u64)>,
    prev_disk: Option<HashMap<String, u64>>,
    prev_disk_at: Instant,
    warned: bool,
}

impl Probe {
    pub(crate) fn prime() -> Self {
        // Arm the delta counters so the first sample reports a real interval.
        Self {
            prev_net: read_net_totals(),
            prev_disk: read_disk_io_ms(),
            prev_disk_at: Instant::now(),
            warned: false,
        }
    }

    pub(crate) async fn sample(&mut self) -> HostSample {
        let mut sample = HostSample::default();
        let mut degraded = false;

        match cpu_percent().await {
            Some(cpu) => sample.cpu_percent = cpu,
            None => degraded = true,
        }

        match read_meminfo() {
            Some((total, available)) => {
                sample.memory_total_bytes = total;
                sample.memory_available_bytes = available;
                if total > 0 {
                    sample.memory_percent =
                        100.0 * (1.0 - (available as f64) / (total as f64)).clamp(0.0, 1.0);
                }
            }
            None => degraded = true,
        }

        match read_net_totals() {
            Some((rx, tx)) => {
                if let Some((prev_rx, prev_tx)) = self.prev_net {
                    sample.net_received_bytes = rx.saturating_sub(prev_rx);
                    sample.net_sent_bytes = tx.saturating_sub(prev_tx);
                }
                self.prev_net = Some((rx, tx));
            }
            None => degraded = true,
        }

        let now = Instant::now();
        match read_disk_io_ms() {
            Some(current) => {
                if let Some(prev) = &self.prev_disk {
                    let wall_ms = now.duration_since(self.prev_disk_at).as_millis().max(1) as f64;
                    let busiest = current
                        .iter()
                        .filter_map(|(name, io_ms)| {
                            let prev_ms = prev.get(name)?;
                            Some(io_ms.saturating_sub(*prev_ms) as f64)
                        })
                        .fold(0.0f64, f64::max);
                    sample.disk_busy_percent = (busiest / wall_ms * 100.0).clamp(0.0, 100.0);
                }
                self.prev_disk = Some(current);
                self.prev_disk_at = now;
            }
            None => degraded = true,
        }

        if degraded && !self.warned {
            self.warned = true;
            tracing::warn!("host probe degraded; missing readings report as zero");
        }

        sample
    }
}

async fn cpu_percent() -> Option<f64> {
    let first = read_cpu_times()?;
    tokio::time::sleep(CPU_WINDOW).await;
    let second = read_cpu_times()?;

    let total = second.total.checked_sub(first.total)?;
    if total == 0 {
        return Some(0.0);
    }
    let idle = second.idle.saturating_sub(first.idle);
    Some((100.0 * (1.0 - (idle as f64) / (total as f64))).clamp(0.0, 100.0))
}

#[derive(Debug, Clone, Copy)]
struct CpuTimes {
    total: u64,
    idle: u64,
}

fn read_cpu_times() -> Option<CpuTimes> {
    let stat = std::fs::read_to_string("/proc/stat").ok()?;
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|v| v.parse().ok())
        .collect();
    if fields.len() < 4 {
        return None;
    }

    // user nice system idle iowait irq softirq steal ...
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    let total: u64 = fields.iter().sum();
    Some(CpuTimes { total, idle })
}

fn read_meminfo() -> Option<(u64, u64)> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    let mut total_kib = None;
    let mut available_kib = None;

    for line in meminfo.lines() {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("MemTotal:") => total_kib = parts.next().and_then(|v| v.parse::<u64>().ok()),
            Some("MemAvailable:") => {
                available_kib = parts.next().and_then(|v| v.parse::<u64>().ok());
            }
            _ => {}
        }
        if total_kib.is_some() && available_kib.is_some() {
            break;
        }
    }

    Some((total_kib? * 1024, available_kib? * 1024))
}

fn read_net_totals() -> Option<(u64, u64)> {
    let dev = std::fs::read_to_string("/proc/net/dev").ok()?;
    let mut rx_total = 0u64;
    let mut tx_total = 0u64;

    for line in dev.lines().skip(2) {
        let Some((iface, rest)) = line.split_once(':') else {
            continue;
        };
        if iface.trim() == "lo" {
            continue;
        }
        let fields: Vec<&str> = rest.split_whitespace().collect();
        if fields.len() < 9 {
            continue;
        }
        rx_total = rx_total.saturating_add(fields[0].parse().unwrap_or(0));
        tx_total = tx_total.saturating_add(fields[8].parse().unwrap_or(0));
    }

    Some((rx_total, tx_total))
}

/// Cumulative milliseconds spent doing I/O, per block device.
fn read_disk_io_ms() -> Option<HashMap<String, u64>> {
    let diskstats = std::fs::read_to_string("/proc/diskstats").ok()?;
    let mut out = HashMap::new();

    for line in diskstats.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // major minor name + at least the 10 classic stat columns.
        if fields.len() < 13 {
            continue;
        }
        let name = fields[2];
        if name.starts_with("loop") || name.starts_with("ram") {
            continue;
        }
        if let Ok(io_ms) = fields[12].parse::<u64>() {
            out.insert(name.to_string(), io_ms);
        }
    }

    Some(out)
}
