use std::time::Duration;

const BACKOFF_BASE_MS: u64 = 1000;
const BACKOFF_MAX_SHIFT: u32 = 4;

/// Exponential reconnect delay: 1s, 2s, 4s, 8s, 16s, 16s, ...
pub struct Backoff {
    attempt: u32,
    max_attempts: u32,
}

impl Backoff {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts,
        }
    }

    pub fn next(&mut self) -> Duration {
        self.attempt += 1;
        let delay = BACKOFF_BASE_MS * 2u64.pow((self.attempt - 1).min(BACKOFF_MAX_SHIFT));
        Duration::from_millis(delay)
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
