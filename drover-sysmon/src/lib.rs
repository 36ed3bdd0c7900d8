//! Host resource sampling for load runs.
//!
//! The sampler runs as a background task at a fixed cadence and records point
//! samples of CPU, memory, disk, and network usage. Probe failures degrade to
//! zero-valued samples; the sampler never surfaces an error to its caller.

mod sample;

#[cfg(target_os = "linux")]
mod proc;
#[cfg(not(target_os = "linux"))]
mod fallback;

pub use sample::{HostSample, HostUsage};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;

#[cfg(target_os = "linux")]
use proc::Probe;
#[cfg(not(target_os = "linux"))]
use fallback::Probe;

pub const DEFAULT_CADENCE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ResourceSampler {
    cadence: Duration,
}

impl Default for ResourceSampler {
    fn default() -> Self {
        Self {
            cadence: DEFAULT_CADENCE,
        }
    }
}

impl ResourceSampler {
    #[must_use]
    pub fn new(cadence: Duration) -> Self {
        Self {
            cadence: cadence.max(Duration::from_millis(200)),
        }
    }

    /// Capture a baseline and start sampling in the background.
    #[must_use]
    pub fn start(&self) -> SamplerHandle {
        let shared = Arc::new(Shared {
            samples: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
            notify: Notify::new(),
        });

        let cadence = self.cadence;
        let task_shared = shared.clone();
        let task = tokio::spawn(async move {
            let mut probe = Probe::prime();

            let mut interval = tokio::time::interval(cadence);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The immediate first tick would sample right on top of the baseline.
            interval.tick().await;

            loop {
                if task_shared.stopped.load(Ordering::Acquire) {
                    break;
                }
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = task_shared.notify.notified() => break,
                }
                if task_shared.stopped.load(Ordering::Acquire) {
                    break;
                }

                let sample = probe.sample().await;
                task_shared.samples.lock().push(sample);
            }
        });

        SamplerHandle {
            shared,
            task: Some(task),
        }
    }
}

#[derive(Debug)]
struct Shared {
    samples: Mutex<Vec<HostSample>>,
    stopped: AtomicBool,
    notify: Notify,
}

#[derive(Debug)]
pub struct SamplerHandle {
    shared: Arc<Shared>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl SamplerHandle {
    /// Mean/min/max over the samples collected so far.
    #[must_use]
    pub fn snapshot(&self) -> HostUsage {
        HostUsage::summarize(&self.shared.samples.lock())
    }

    /// Stop collecting and return the final summary.
    pub async fn stop(mut self) -> HostUsage {
        self.shared.stopped.store(true, Ordering::Release);
        // notify_one stores a permit, so a stop that races the task's select
        // registration is not lost.
        self.shared.notify.notify_one();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.snapshot()
    }
}

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        self.shared.stopped.store(true, Ordering::Release);
        self.shared.notify.notify_one();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
