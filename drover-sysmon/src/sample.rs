/// One point-in-time reading of host resource usage.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HostSample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_available_bytes: u64,
    pub memory_total_bytes: u64,
    pub disk_busy_percent: f64,
    /// Bytes received/sent since the previous sample, all interfaces.
    pub net_received_bytes: u64,
    pub net_sent_bytes: u64,
}

/// Aggregate view over the samples of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HostUsage {
    pub sample_count: usize,

    pub cpu_avg_percent: f64,
    pub cpu_min_percent: f64,
    pub cpu_max_percent: f64,

    pub memory_avg_percent: f64,
    pub memory_min_percent: f64,
    pub memory_max_percent: f64,

    pub memory_available_bytes: u64,
    pub memory_total_bytes: u64,

    pub disk_busy_avg_percent: f64,
    pub net_received_total_bytes: u64,
    pub net_sent_total_bytes: u64,
}

impl HostUsage {
    #[must_use]
    pub fn summarize(samples: &[HostSample]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let n = samples.len() as f64;
        let mut out = Self {
            sample_count: samples.len(),
            cpu_min_percent: f64::MAX,
            memory_min_percent: f64::MAX,
            ..Self::default()
        };

        for s in samples {
            out.cpu_avg_percent += s.cpu_percent;
            out.cpu_min_percent = out.cpu_min_percent.min(s.cpu_percent);
            out.cpu_max_percent = out.cpu_max_percent.max(s.cpu_percent);

            out.memory_avg_percent += s.memory_percent;
            out.memory_min_percent = out.memory_min_percent.min(s.memory_percent);
            out.memory_max_percent = out.memory_max_percent.max(s.memory_percent);

            out.disk_busy_avg_percent += s.disk_busy_percent;
            out.net_received_total_bytes = out
                .net_received_total_bytes
                .saturating_add(s.net_received_bytes);
            out.net_sent_total_bytes = out.net_sent_total_bytes.saturating_add(s.net_sent_bytes);
        }

        out.cpu_avg_percent /= n;
        out.memory_avg_percent /= n;
        out.disk_busy_avg_percent /= n;

        // Latest reading wins for instantaneous gauges.
        if let Some(last) = samples.last() {
            out.memory_available_bytes = last.memory_available_bytes;
            out.memory_total_bytes = last.memory_total_bytes;
        }

        out
    }
}
