//! Shared latency/outcome accounting for a run.
//!
//! Workers are many producers; the orchestrator is the single consumer.
//! Counters are plain atomics. Latency samples for percentile estimation go
//! into one uniform reservoir shared across all steps, guarded by a short
//! critical section: a contended `try_lock` drops the sample, never the
//! counters.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng as _;
use rand::SeedableRng as _;
use rand::rngs::SmallRng;

/// Samples retained for percentile estimation. Everything is retained exactly
/// until this many observations; uniform reservoir sampling past that.
pub const RESERVOIR_CAPACITY: usize = 16_384;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Request completed and the protocol reported success.
    Ok,
    /// The server answered with a protocol-level error (non-2xx, SQL error).
    FailRequest,
    /// No well-formed answer: timeout, connection refused, DNS.
    FailTransport,
}

#[derive(Debug, Default)]
struct UnitCounters {
    total: AtomicU64,
    ok: AtomicU64,
    fail_request: AtomicU64,
    fail_transport: AtomicU64,
    latency_sum_us: AtomicU64,
    latency_min_us: AtomicU64,
    latency_max_us: AtomicU64,
}

#[derive(Debug)]
struct Reservoir {
    samples: Vec<f64>,
    seen: u64,
    rng: SmallRng,
}

impl Reservoir {
    fn new() -> Self {
        Self {
            samples: Vec::with_capacity(RESERVOIR_CAPACITY),
            seen: 0,
            rng: SmallRng::from_os_rng(),
        }
    }

    fn push(&mut self, latency_ms: f64) {
        self.seen = self.seen.saturating_add(1);
        if self.samples.len() < RESERVOIR_CAPACITY {
            self.samples.push(latency_ms);
            return;
        }

        // Classic uniform replacement: keep each of the `seen` samples with
        // equal probability.
        let slot = self.rng.random_range(0..self.seen);
        if (slot as usize) < RESERVOIR_CAPACITY {
            self.samples[slot as usize] = latency_ms;
        }
    }
}

#[derive(Debug)]
pub struct OutcomeAggregator {
    units: Vec<(String, UnitCounters)>,
    reservoir: Mutex<Reservoir>,
    dropped_samples: AtomicU64,
    frozen: AtomicBool,
}

impl OutcomeAggregator {
    #[must_use]
    pub fn new(unit_names: Vec<String>) -> Self {
        let units = unit_names
            .into_iter()
            .map(|name| {
                let counters = UnitCounters {
                    latency_min_us: AtomicU64::new(u64::MAX),
                    ..UnitCounters::default()
                };
                (name, counters)
            })
            .collect();

        Self {
            units,
            reservoir: Mutex::new(Reservoir::new()),
            dropped_samples: AtomicU64::new(0),
            frozen: AtomicBool::new(false),
        }
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn observe(&self, unit: usize, latency: Duration, outcome: Outcome) {
        let Some((_, counters)) = self.units.get(unit) else {
            // A unit index outside the plan is a driver bug; observing it here
            // would silently skew results.
            debug_assert!(false, "unit index {unit} out of range");
            return;
        };

        let us = latency.as_micros().min(u128::from(u64::MAX)) as u64;
        counters.total.fetch_add(1, Ordering::Relaxed);
        match outcome {
            Outcome::Ok => counters.ok.fetch_add(1, Ordering::Relaxed),
            Outcome::FailRequest => counters.fail_request.fetch_add(1, Ordering::Relaxed),
            Outcome::FailTransport => counters.fail_transport.fetch_add(1, Ordering::Relaxed),
        };
        counters.latency_sum_us.fetch_add(us, Ordering::Relaxed);
        counters.latency_min_us.fetch_min(us, Ordering::Relaxed);
        counters.latency_max_us.fetch_max(us, Ordering::Relaxed);

        match self.reservoir.try_lock() {
            Some(mut reservoir) => reservoir.push(us as f64 / 1_000.0),
            None => {
                self.dropped_samples.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn total(&self) -> u64 {
        self.units
            .iter()
            .map(|(_, c)| c.total.load(Ordering::Relaxed))
            .sum()
    }

    /// Freeze the counters into an immutable snapshot. Meant to be called once
    /// after all workers have drained.
    pub fn snapshot(&self) -> AggregateSnapshot {
        if self.frozen.swap(true, Ordering::AcqRel) {
            tracing::warn!("aggregator snapshot taken more than once");
        }

        let mut units = Vec::with_capacity(self.units.len());
        let mut total = 0u64;
        let mut ok = 0u64;
        let mut fail_request = 0u64;
        let mut fail_transport = 0u64;
        let mut latency_sum_us = 0u64;
        let mut min_us = u64::MAX;
        let mut max_us = 0u64;

        for (name, c) in &self.units {
            let unit_total = c.total.load(Ordering::Relaxed);
            let unit_ok = c.ok.load(Ordering::Relaxed);
            let unit_fail_request = c.fail_request.load(Ordering::Relaxed);
            let unit_fail_transport = c.fail_transport.load(Ordering::Relaxed);
            let unit_sum_us = c.latency_sum_us.load(Ordering::Relaxed);
            let unit_min_us = c.latency_min_us.load(Ordering::Relaxed);
            let unit_max_us = c.latency_max_us.load(Ordering::Relaxed);

            total += unit_total;
            ok += unit_ok;
            fail_request += unit_fail_request;
            fail_transport += unit_fail_transport;
            latency_sum_us += unit_sum_us;
            min_us = min_us.min(unit_min_us);
            max_us = max_us.max(unit_max_us);

            units.push(UnitSnapshot {
                name: name.clone(),
                total: unit_total,
                ok: unit_ok,
                fail_request: unit_fail_request,
                fail_transport: unit_fail_transport,
                average_ms: if unit_total > 0 {
                    unit_sum_us as f64 / 1_000.0 / unit_total as f64
                } else {
                    0.0
                },
            });
        }

        let mut samples = {
            let reservoir = self.reservoir.lock();
            reservoir.samples.clone()
        };
        samples.sort_by(|a, b| a.total_cmp(b));

        let (p50_ms, p95_ms, p99_ms) = (
            percentile(&samples, 0.50),
            percentile(&samples, 0.95),
            percentile(&samples, 0.99),
        );

        AggregateSnapshot {
            total,
            ok,
            fail_request,
            fail_transport,
            average_ms: if total > 0 {
                latency_sum_us as f64 / 1_000.0 / total as f64
            } else {
                0.0
            },
            min_ms: if total > 0 && min_us != u64::MAX {
                min_us as f64 / 1_000.0
            } else {
                0.0
            },
            max_ms: max_us as f64 / 1_000.0,
            p50_ms,
            p95_ms,
            p99_ms,
            units,
            dropped_samples: self.dropped_samples.load(Ordering::Relaxed),
        }
    }
}

/// Percentile by linear interpolation at position `(n - 1) * p` over a sorted
/// slice; 0 when the slice is empty.
#[must_use]
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let p = p.clamp(0.0, 1.0);
    let pos = (sorted.len() - 1) as f64 * p;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let fraction = pos - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct UnitSnapshot {
    pub name: String,
    pub total: u64,
    pub ok: u64,
    pub fail_request: u64,
    pub fail_transport: u64,
    pub average_ms: f64,
}

impl UnitSnapshot {
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.fail_request + self.fail_transport
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AggregateSnapshot {
    pub total: u64,
    pub ok: u64,
    pub fail_request: u64,
    pub fail_transport: u64,
    pub average_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub units: Vec<UnitSnapshot>,
    pub dropped_samples: u64,
}

impl AggregateSnapshot {
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.fail_request + self.fail_transport
    }

    #[must_use]
    pub fn error_rate_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.failed() as f64 / self.total as f64 * 100.0
    }
}
