use std::time::Duration;

/// Doubling delay between connection attempts, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max_delay: Duration,
}

impl Backoff {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            current: base_delay.min(max_delay),
            max_delay,
        }
    }

    /// Delay to use now; the following call returns twice as much (up to the cap).
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max_delay);
        delay
    }
}
