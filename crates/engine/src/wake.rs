//! Debounced wake signal shared by producers and the scheduler.
//!
//! A signal is accepted only if no other signal was accepted within the
//! debounce window. Accepting resets the backoff multiplier and wakes the
//! scheduler out of its idle sleep; a rejected signal changes nothing.
//!
//! The window is measured against an injected [`Clock`] so tests can move
//! time by hand.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::backoff::Backoff;

/// Monotonic time source.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// State touched by both producers and the scheduler.
#[derive(Debug)]
struct SchedulerState {
    backoff: Backoff,
    last_accepted: Option<Instant>,
}

pub struct WakeSignal {
    state: Mutex<SchedulerState>,
    notify: Notify,
    debounce: Duration,
    clock: Arc<dyn Clock>,
}

impl WakeSignal {
    pub fn new(backoff: Backoff, debounce: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                backoff,
                last_accepted: None,
            }),
            notify: Notify::new(),
            debounce,
            clock,
        }
    }

    /// Ask the scheduler to run soon. Returns whether the signal was accepted.
    pub fn signal(&self) -> bool {
        let now = self.clock.now();
        {
            let mut state = self.state();
            if let Some(last) = state.last_accepted {
                if now.saturating_duration_since(last) < self.debounce {
                    tracing::trace!("Wake signal debounced");
                    return false;
                }
            }
            state.last_accepted = Some(now);
            state.backoff.reset();
        }

        // Stores a permit if the scheduler is not currently waiting.
        self.notify.notify_one();
        tracing::debug!("Wake signal accepted; backoff reset");
        true
    }

    /// Resolves on the next accepted signal.
    pub async fn notified(&self) {
        self.notify.notified().await
    }

    pub fn multiplier(&self) -> u32 {
        self.state().backoff.multiplier()
    }

    /// Length of the next idle sleep.
    pub fn sleep_interval(&self) -> Duration {
        self.state().backoff.interval()
    }

    /// Record a sleep that timed out. Returns the new multiplier.
    pub fn record_idle(&self) -> u32 {
        self.state().backoff.on_idle()
    }

    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal_with_clock() -> (WakeSignal, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let wake = WakeSignal::new(
            Backoff::new(Duration::from_secs(60), Duration::from_secs(3600)),
            Duration::from_secs(300),
            clock.clone(),
        );
        (wake, clock)
    }

    #[test]
    fn test_first_signal_accepted() {
        let (wake, _clock) = signal_with_clock();
        assert!(wake.signal());
    }

    #[test]
    fn test_second_signal_within_window_ignored() {
        let (wake, clock) = signal_with_clock();
        for _ in 0..4 {
            wake.record_idle();
        }
        assert_eq!(wake.multiplier(), 9);

        assert!(wake.signal());
        assert_eq!(wake.multiplier(), 1);

        wake.record_idle();
        assert_eq!(wake.multiplier(), 3);

        clock.advance(Duration::from_secs(10));
        assert!(!wake.signal());
        assert_eq!(wake.multiplier(), 3);
    }

    #[test]
    fn test_signal_accepted_after_window() {
        let (wake, clock) = signal_with_clock();
        assert!(wake.signal());
        wake.record_idle();

        clock.advance(Duration::from_secs(299));
        assert!(!wake.signal());

        clock.advance(Duration::from_secs(1));
        assert!(wake.signal());
        assert_eq!(wake.multiplier(), 1);
    }

    #[test]
    fn test_sleep_interval_follows_multiplier() {
        let (wake, _clock) = signal_with_clock();
        assert_eq!(wake.sleep_interval(), Duration::from_secs(60));
        wake.record_idle();
        assert_eq!(wake.sleep_interval(), Duration::from_secs(180));
    }

    #[tokio::test]
    async fn test_accepted_signal_leaves_permit_for_sleeper() {
        let (wake, _clock) = signal_with_clock();
        assert!(wake.signal());
        tokio::time::timeout(Duration::from_secs(1), wake.notified())
            .await
            .expect("permit should be stored");
    }
}
