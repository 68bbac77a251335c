// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Reconnect backoff: doubles on every failed attempt, clamped at a maximum,
//! and resets once a channel is open again.

use crate::config::ConnectionOptions;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    current: Duration,
    initial: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Backoff {
        // a max below the initial value would make the first interval exceed the cap
        let max = max.max(initial);
        Backoff {
            current: initial,
            initial,
            max,
        }
    }

    /// Interval to wait before the next attempt.
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn increase(&mut self) {
        self.current = self.current.saturating_mul(2).min(self.max);
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl From<&ConnectionOptions> for Backoff {
    fn from(opts: &ConnectionOptions) -> Self {
        Backoff::new(opts.initial_backoff_interval(), opts.max_backoff_interval())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_the_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(400));

        let mut seen = vec![];
        for _ in 0..5 {
            seen.push(backoff.current().as_millis());
            backoff.increase();
        }

        assert_eq!(seen, vec![100, 200, 400, 400, 400]);
    }

    #[test]
    fn reset_goes_back_to_initial() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(400));
        backoff.increase();
        backoff.increase();
        backoff.reset();

        assert_eq!(backoff.current(), Duration::from_millis(100));
    }

    #[test]
    fn cap_never_sits_below_initial() {
        let mut backoff = Backoff::new(Duration::from_secs(2), Duration::from_secs(1));
        backoff.increase();

        assert_eq!(backoff.current(), Duration::from_secs(2));
    }

    #[test]
    fn built_from_default_options() {
        let backoff = Backoff::from(&ConnectionOptions::new("amqp://localhost"));
        assert_eq!(backoff.current(), Duration::from_secs(1));
    }
}
