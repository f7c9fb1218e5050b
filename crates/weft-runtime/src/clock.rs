use std::cell::Cell;

use chrono::{DateTime, TimeDelta, Utc};

/// External time source.
///
/// The scheduler consults the clock only when the ready queue is empty and a
/// timer is pending; `Sleep(0)` never reaches it. `wait_until` blocks the
/// embedding until the deadline has passed, however the implementation
/// chooses to define "passed".
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
    fn wait_until(&self, deadline: DateTime<Utc>);
}

/// Wall-clock time; `wait_until` sleeps the calling thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn wait_until(&self, deadline: DateTime<Utc>) {
        let delta = deadline - self.now();
        if let Ok(pause) = delta.to_std() {
            if !pause.is_zero() {
                std::thread::sleep(pause);
            }
        }
    }
}

/// Deterministic clock for tests and simulated embeddings: `wait_until`
/// jumps straight to the deadline, so sleeps complete instantly in causal
/// order without real elapsed time.
#[derive(Debug)]
pub struct ManualClock {
    now: Cell<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Cell::new(start),
        }
    }

    pub fn starting_at_epoch() -> Self {
        Self::new(DateTime::UNIX_EPOCH)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::starting_at_epoch()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }

    fn wait_until(&self, deadline: DateTime<Utc>) {
        // Time never moves backwards, even for deadlines already behind us.
        if deadline > self.now.get() {
            self.now.set(deadline);
        }
    }
}

/// Convert a sleep request in seconds into a timer delta.
///
/// Rejects negative, NaN and non-finite values (`None`), which the
/// dispatcher reports as misuse.
pub(crate) fn sleep_delta(seconds: f64) -> Option<TimeDelta> {
    let std = std::time::Duration::try_from_secs_f64(seconds).ok()?;
    TimeDelta::from_std(std).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_jumps_to_deadlines() {
        let clock = ManualClock::starting_at_epoch();
        let later = clock.now() + TimeDelta::milliseconds(250);
        clock.wait_until(later);
        assert_eq!(clock.now(), later);
    }

    #[test]
    fn manual_clock_ignores_past_deadlines() {
        let clock = ManualClock::starting_at_epoch();
        let later = clock.now() + TimeDelta::seconds(5);
        clock.wait_until(later);
        clock.wait_until(later - TimeDelta::seconds(3));
        assert_eq!(clock.now(), later);
    }

    #[test]
    fn sleep_delta_rejects_unusable_durations() {
        assert!(sleep_delta(-1.0).is_none());
        assert!(sleep_delta(f64::NAN).is_none());
        assert!(sleep_delta(f64::INFINITY).is_none());
        assert_eq!(sleep_delta(0.001), Some(TimeDelta::milliseconds(1)));
    }
}
