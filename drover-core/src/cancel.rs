//! Run-scoped signals: the start gate that keeps worker setup out of the
//! measured window, and the root cancellation signal every component observes.

use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct StartSignal {
    started: AtomicBool,
    notify: Notify,
}

impl StartSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) {
        self.started.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub async fn wait(&self) {
        while !self.started.load(Ordering::Acquire) {
            self.notify.notified().await;
        }
    }
}

/// Root cancellation for a run. Cloning shares the signal.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    fired: AtomicBool,
    fired_at: OnceLock<Instant>,
    notify: Notify,
}

impl CancelSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if !self.inner.fired.swap(true, Ordering::AcqRel) {
            let _ = self.inner.fired_at.set(Instant::now());
            self.inner.notify.notify_waiters();
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    /// When the signal fired, if it has.
    #[must_use]
    pub fn cancelled_at(&self) -> Option<Instant> {
        self.inner.fired_at.get().copied()
    }

    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            self.inner.notify.notified().await;
        }
    }

    /// Resolves `grace` after cancellation fires. Raced against an in-flight
    /// dispatch this bounds how long such a request may keep running.
    pub async fn cancelled_then(&self, grace: Duration) {
        self.cancelled().await;
        tokio::time::sleep(grace).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_signal_releases_waiters() {
        let signal = Arc::new(StartSignal::new());
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        signal.start();
        waiter.await.unwrap_or_else(|e| panic!("{e}"));
    }

    #[tokio::test]
    async fn cancel_records_fire_time_once() {
        let cancel = CancelSignal::new();
        assert!(!cancel.is_cancelled());
        assert!(cancel.cancelled_at().is_none());

        cancel.cancel();
        let first = cancel.cancelled_at();
        assert!(cancel.is_cancelled());
        assert!(first.is_some());

        tokio::time::sleep(Duration::from_millis(5)).await;
        cancel.cancel();
        assert_eq!(cancel.cancelled_at(), first);
    }

    #[tokio::test]
    async fn cancelled_resolves_for_late_subscribers() {
        let cancel = CancelSignal::new();
        cancel.cancel();
        // Must not hang even though the notify fired before we subscribed.
        tokio::time::timeout(Duration::from_millis(100), cancel.cancelled())
            .await
            .unwrap_or_else(|_| panic!("cancelled() hung"));
    }
}
