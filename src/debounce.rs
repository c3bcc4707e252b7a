//! Coalesce-until-quiet debouncing as an explicit pending value plus deadline
//!
//! The owner calls [`Debounce::schedule`] whenever the value changes and
//! [`Debounce::poll`] from its tick. A value is released once no newer value
//! was scheduled for the whole delay.

use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct Debounce<T> {
    delay: Duration,
    pending: Option<(T, Instant)>,
}

impl<T> Debounce<T> {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Replace any pending value and restart the delay
    pub fn schedule(&mut self, value: T, now: Instant) {
        self.pending = Some((value, now + self.delay));
    }

    /// Take the pending value if its deadline has passed
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        let due = self
            .pending
            .as_ref()
            .is_some_and(|(_, deadline)| now >= *deadline);
        if !due {
            return None;
        }
        self.pending.take().map(|(value, _)| value)
    }

    /// Drop the pending value without releasing it
    pub fn cancel(&mut self) -> Option<T> {
        self.pending.take().map(|(value, _)| value)
    }

    #[must_use]
    pub fn pending(&self) -> Option<&T> {
        self.pending.as_ref().map(|(value, _)| value)
    }

    /// When the pending value becomes due
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(_, deadline)| *deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn releases_after_quiet_period() {
        let start = Instant::now();
        let mut debounce = Debounce::new(Duration::from_millis(1000));
        debounce.schedule(4, start);

        assert_eq!(debounce.poll(start + Duration::from_millis(999)), None);
        assert_eq!(debounce.pending(), Some(&4));
        assert_eq!(debounce.poll(start + Duration::from_millis(1000)), Some(4));
        assert_eq!(debounce.poll(start + Duration::from_millis(5000)), None);
    }

    #[test]
    fn reschedule_restarts_delay_and_keeps_latest() {
        let start = Instant::now();
        let mut debounce = Debounce::new(Duration::from_millis(100));
        debounce.schedule(1, start);
        debounce.schedule(2, start + Duration::from_millis(80));

        assert_eq!(debounce.poll(start + Duration::from_millis(120)), None);
        assert_eq!(debounce.poll(start + Duration::from_millis(180)), Some(2));
    }

    #[test]
    fn cancel_drops_value() {
        let start = Instant::now();
        let mut debounce = Debounce::new(Duration::ZERO);
        debounce.schedule("x", start);
        assert_eq!(debounce.cancel(), Some("x"));
        assert_eq!(debounce.poll(start), None);
        assert!(debounce.deadline().is_none());
    }
}
