//! Adaptive sleep multiplier for the scheduler.
//!
//! Each idle sleep that runs to completion grows the multiplier by two; an
//! accepted wake signal resets it to one. The multiplier never exceeds
//! `max_interval / base_interval`.

use std::time::Duration;

/// Amount added to the multiplier after an idle sleep.
const IDLE_STEP: u32 = 2;

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    multiplier: u32,
    ceiling: u32,
}

impl Backoff {
    pub fn new(base: Duration, max_interval: Duration) -> Self {
        let ceiling = if base.is_zero() {
            1
        } else {
            (max_interval.as_millis() / base.as_millis().max(1)).clamp(1, u32::MAX as u128) as u32
        };

        Self {
            base,
            multiplier: 1,
            ceiling,
        }
    }

    pub fn multiplier(&self) -> u32 {
        self.multiplier
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// How long the next idle sleep lasts.
    pub fn interval(&self) -> Duration {
        self.base * self.multiplier
    }

    /// Grow after a sleep that ended without a signal. Returns the new multiplier.
    pub fn on_idle(&mut self) -> u32 {
        self.multiplier = self.multiplier.saturating_add(IDLE_STEP).min(self.ceiling);
        self.multiplier
    }

    pub fn reset(&mut self) {
        self.multiplier = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_backoff() -> Backoff {
        Backoff::new(Duration::from_secs(60), Duration::from_secs(3600))
    }

    #[test]
    fn test_starts_at_base_interval() {
        let backoff = default_backoff();
        assert_eq!(backoff.multiplier(), 1);
        assert_eq!(backoff.ceiling(), 60);
        assert_eq!(backoff.interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_grows_by_two_per_idle_sleep_up_to_ceiling() {
        let mut backoff = default_backoff();
        for n in 1..=40u32 {
            backoff.on_idle();
            assert_eq!(backoff.multiplier(), (1 + 2 * n).min(60), "after {} idle sleeps", n);
        }
        assert_eq!(backoff.interval(), Duration::from_secs(3600));
    }

    #[test]
    fn test_reset_returns_to_one() {
        let mut backoff = default_backoff();
        backoff.on_idle();
        backoff.on_idle();
        assert_eq!(backoff.multiplier(), 5);
        backoff.reset();
        assert_eq!(backoff.multiplier(), 1);
    }

    #[test]
    fn test_ceiling_never_below_one() {
        let mut backoff = Backoff::new(Duration::from_secs(60), Duration::from_secs(10));
        assert_eq!(backoff.ceiling(), 1);
        backoff.on_idle();
        assert_eq!(backoff.multiplier(), 1);
    }
}
