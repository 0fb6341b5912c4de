//! Scheduler loop of the validation job.

use super::builder::RetryConfig;
use super::job::{Inner, JobError};
use crate::metrics::MetricsErrorKind;
use crate::prelude::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Failed cycles in a row logged at WARN; later ones go to DEBUG.
const WARN_FAILED_CYCLES: u32 = 3;

/// Retry state between failed cycles.
#[derive(Debug, Default)]
struct RetryState {
    failed_cycles: u32,
    backoff: Option<Duration>,
    skipping: bool,
}

impl RetryState {
    /// Records a failed cycle and returns the delay before the retry.
    fn cycle_failed(&mut self, retry: &RetryConfig) -> Duration {
        let backoff = match self.backoff {
            None => retry.min_backoff,
            Some(previous) => jittered(
                previous.saturating_mul(2).min(retry.max_backoff),
                retry.max_backoff,
            ),
        };
        self.failed_cycles += 1;
        self.backoff = Some(backoff);
        self.skipping = false;
        backoff
    }

    /// Records a published cycle; returns how many failures preceded it.
    fn cycle_published(&mut self) -> u32 {
        self.backoff = None;
        self.skipping = false;
        std::mem::take(&mut self.failed_cycles)
    }

    /// Records a skipped tick; `true` only for the first skip in a row.
    fn tick_skipped(&mut self) -> bool {
        !std::mem::replace(&mut self.skipping, true)
    }

    fn warn_on_failure(&self) -> bool {
        self.failed_cycles <= WARN_FAILED_CYCLES
    }
}

/// Adds up to 10% random delay, never exceeding `max`, so registries
/// restarted together spread their retries.
fn jittered(base: Duration, max: Duration) -> Duration {
    let spread = u64::try_from(base.as_millis() / 10).unwrap_or(u64::MAX);
    if spread == 0 {
        return base;
    }
    base.saturating_add(Duration::from_millis(fastrand::u64(0..=spread)))
        .min(max)
}

async fn sleep_opt(delay: Option<Duration>) {
    match delay {
        Some(d) => sleep(d).await,
        None => std::future::pending().await,
    }
}

impl Inner {
    /// Runs a cycle on every tick until cancelled.
    ///
    /// The first tick fires immediately. Ticks missed while a cycle runs are
    /// skipped. After a failed cycle a retry is scheduled with backoff, ahead
    /// of the next regular tick.
    pub(crate) async fn run_scheduler(self: Arc<Self>, cancellation_token: CancellationToken) {
        let scheduler_id = fastrand::u64(..);
        info!(
            "Starting validation scheduler: id={}, refresh_period_secs={}",
            scheduler_id,
            self.config().refresh_period.as_secs()
        );

        let mut ticker = interval(self.config().refresh_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut state = RetryState::default();

        loop {
            tokio::select! {
                () = cancellation_token.cancelled() => {
                    debug!("Cancellation signal received; stopping scheduler");
                    return;
                }
                _ = ticker.tick() => {}
                () = sleep_opt(state.backoff) => {
                    debug!("Retrying failed validation cycle");
                }
            }

            match self.run_cycle_guarded().await {
                Ok(result) if result.is_published() => {
                    let failed = state.cycle_published();
                    if failed > 0 {
                        info!("Validation recovered after {} failed cycles", failed);
                    }
                }
                Ok(_) => {
                    let backoff = state.cycle_failed(&self.config().retry);
                    if state.warn_on_failure() {
                        warn!(
                            "Validation cycle failed closed; retrying: backoff_ms={}",
                            backoff.as_millis()
                        );
                    } else {
                        debug!(
                            "Validation cycle failed closed again; retrying: backoff_ms={}, failed_cycles={}",
                            backoff.as_millis(),
                            state.failed_cycles
                        );
                    }
                }
                Err(JobError::AlreadyRunning) => {
                    self.record_error(MetricsErrorKind::CycleSkipped);
                    if state.tick_skipped() {
                        warn!("Previous validation cycle still running; tick skipped");
                    }
                }
                Err(e) => {
                    debug!("Scheduler stopping: {}", e);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retry() -> RetryConfig {
        RetryConfig {
            min_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_backoff_grows_and_clamps() {
        let mut state = RetryState::default();

        assert_eq!(state.cycle_failed(&retry()), Duration::from_secs(10));
        let second = state.cycle_failed(&retry());
        assert!(second >= Duration::from_secs(20) && second <= Duration::from_secs(22));
        for _ in 0..5 {
            state.cycle_failed(&retry());
        }
        assert_eq!(state.backoff, Some(Duration::from_secs(60)));
        assert!(!state.warn_on_failure());

        assert_eq!(state.cycle_published(), 7);
        assert_eq!(state.backoff, None);
        assert_eq!(state.cycle_failed(&retry()), Duration::from_secs(10));
        assert!(state.warn_on_failure());
    }

    #[test]
    fn test_only_first_skip_in_a_row_warns() {
        let mut state = RetryState::default();

        assert!(state.tick_skipped());
        assert!(!state.tick_skipped());
        state.cycle_published();
        assert!(state.tick_skipped());
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        assert_eq!(jittered(Duration::ZERO, Duration::from_secs(1)), Duration::ZERO);
        let max = Duration::from_secs(100);
        let value = jittered(Duration::from_secs(50), max);
        assert!(value >= Duration::from_secs(50) && value <= Duration::from_secs(55));
        assert_eq!(jittered(max, max), max);
    }
}
