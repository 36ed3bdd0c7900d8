//! Portable probe for non-Linux hosts (Windows performance counters, macOS)
//! via sysinfo. Disk busy time has no portable source here and reports zero.

use sysinfo::{Networks, System};

use crate::sample::HostSample;

#[derive(Debug)]
pub(crate) struct Probe {
    sys: System,
    networks: Networks,
}

impl Probe {
    pub(crate) fn prime() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        let networks = Networks::new_with_refreshed_list();

        tracing::info!("disk busy sampling unavailable on this platform; reporting zero");

        Self { sys, networks }
    }

    pub(crate) async fn sample(&mut self) -> HostSample {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();
        self.networks.refresh(true);

        let total = self.sys.total_memory();
        let available = self.sys.available_memory();
        let memory_percent = if total > 0 {
            100.0 * (1.0 - (available as f64) / (total as f64)).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let mut rx = 0u64;
        let mut tx = 0u64;
        for (_, data) in self.networks.iter() {
            rx = rx.saturating_add(data.received());
            tx = tx.saturating_add(data.transmitted());
        }

        HostSample {
            cpu_percent: f64::from(self.sys.global_cpu_usage()).clamp(0.0, 100.0),
            memory_percent,
            memory_available_bytes: available,
            memory_total_bytes: total,
            disk_busy_percent: 0.0,
            net_received_bytes: rx,
            net_sent_bytes: tx,
        }
    }
}
