use std::time::{Duration, Instant};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Holds back a rapidly changing value until it has been quiet for `delay`.
#[derive(Debug, Clone)]
pub struct Debouncer<T> {
    delay: Duration,
    settled: T,
    pending: Option<(T, Instant)>,
}

impl<T: Clone + PartialEq> Debouncer<T> {
    pub fn new(initial: T, delay: Duration) -> Self {
        Self {
            delay,
            settled: initial,
            pending: None,
        }
    }

    /// Records a new raw value; restarts the quiet period.
    pub fn push(&mut self, value: T, now: Instant) {
        if self.pending.is_none() && value == self.settled {
            return;
        }
        self.pending = Some((value, now + self.delay));
    }

    /// Settled value as of `now`, promoting the pending one once its quiet
    /// period has elapsed.
    pub fn poll(&mut self, now: Instant) -> &T {
        let quiet = matches!(self.pending, Some((_, due)) if due <= now);
        if quiet && let Some((value, _)) = self.pending.take() {
            self.settled = value;
        }
        &self.settled
    }

    pub fn settled(&self) -> &T {
        &self.settled
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Skips the quiet period, e.g. when the input is cleared explicitly.
    pub fn flush(&mut self) -> &T {
        if let Some((value, _)) = self.pending.take() {
            self.settled = value;
        }
        &self.settled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_settles_after_quiet_period() {
        let start = Instant::now();
        let mut search = Debouncer::new(String::new(), DEFAULT_DEBOUNCE);

        search.push("m".to_string(), start);
        search.push("mi".to_string(), start + Duration::from_millis(100));
        search.push("milk".to_string(), start + Duration::from_millis(200));

        assert_eq!(search.poll(start + Duration::from_millis(450)), "");
        assert_eq!(search.poll(start + Duration::from_millis(500)), "milk");
        assert!(!search.is_pending());
    }

    #[test]
    fn flush_skips_the_wait() {
        let start = Instant::now();
        let mut search = Debouncer::new(String::new(), DEFAULT_DEBOUNCE);
        search.push("milk".to_string(), start);
        assert_eq!(search.flush(), "milk");
        assert_eq!(search.settled(), "milk");
    }

    #[test]
    fn pushing_the_settled_value_is_ignored() {
        let mut search = Debouncer::new("milk".to_string(), DEFAULT_DEBOUNCE);
        search.push("milk".to_string(), Instant::now());
        assert!(!search.is_pending());
    }
}
