//! Target request rate as a function of elapsed run time.

use std::time::Duration;

use crate::scenario::{LoadProfile, Scenario};

/// Resolved arrival schedule for one run: the load profile plus the common
/// ramp-up window that scales every rate-based profile from zero.
#[derive(Debug, Clone)]
pub struct RateSchedule {
    profile: LoadProfile,
    ramp_up: Duration,
}

impl RateSchedule {
    #[must_use]
    pub fn new(profile: LoadProfile, ramp_up: Duration) -> Self {
        Self { profile, ramp_up }
    }

    #[must_use]
    pub fn for_scenario(scenario: &Scenario) -> Self {
        Self::new(scenario.load_profile.clone(), scenario.settings.ramp_up)
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        self.profile.duration()
    }

    /// False for Stress, which issues as fast as the adapters permit.
    #[must_use]
    pub fn is_paced(&self) -> bool {
        !matches!(self.profile, LoadProfile::Stress { .. })
    }

    /// Target requests/second at `elapsed`. `None` means unpaced (Stress).
    #[must_use]
    pub fn rate_at(&self, elapsed: Duration) -> Option<f64> {
        let base = match &self.profile {
            LoadProfile::ConstantRate { rate, .. } | LoadProfile::Soak { rate, .. } => *rate,
            LoadProfile::RampUp {
                start_rate,
                end_rate,
                duration,
            } => {
                let t = fraction(elapsed, *duration);
                start_rate + (end_rate - start_rate) * t
            }
            LoadProfile::Spike {
                base_rate,
                spike_rate,
                spike_start,
                spike_duration,
                duration,
            } => {
                let start = spike_start.unwrap_or(*duration / 2);
                if elapsed >= start && elapsed < start.saturating_add(*spike_duration) {
                    *spike_rate
                } else {
                    *base_rate
                }
            }
            LoadProfile::Stress { .. } => return None,
        };

        Some(base * self.ramp_scale(elapsed))
    }

    fn ramp_scale(&self, elapsed: Duration) -> f64 {
        if self.ramp_up.is_zero() {
            return 1.0;
        }
        fraction(elapsed, self.ramp_up)
    }
}

fn fraction(elapsed: Duration, window: Duration) -> f64 {
    if window.is_zero() {
        return 1.0;
    }
    (elapsed.as_secs_f64() / window.as_secs_f64()).clamp(0.0, 1.0)
}

/// Pool size for a scenario: Stress pins it to `maxConcurrency`; rate-based
/// profiles use the configured concurrent-user cap.
#[must_use]
pub fn worker_count(scenario: &Scenario) -> u64 {
    match &scenario.load_profile {
        LoadProfile::Stress {
            max_concurrency, ..
        } => (*max_concurrency).max(1),
        _ => scenario.settings.concurrent_users.max(1),
    }
}
