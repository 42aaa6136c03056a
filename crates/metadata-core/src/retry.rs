//! Bounded retry with linear backoff.
//!
//! `Retry` is a small state machine driven by the caller: ask for the next delay, make an
//! attempt, then record the outcome. Termination and backoff are decided here only.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Added to the delay for every failed attempt.
    pub increment: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            increment: Duration::from_millis(250),
            max_attempts: 10,
        }
    }
}

impl RetryPolicy {
    /// Delay before an attempt, given how many attempts already failed.
    pub fn delay_after_failures(&self, failures: u32) -> Duration {
        self.initial_delay + self.increment * failures
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// Waiting for the next attempt; `n` attempts have failed so far.
    Attempting(u32),
    Succeeded,
    GivenUp,
}

#[derive(Debug, Clone)]
pub struct Retry {
    policy: RetryPolicy,
    state: RetryState,
    attempts: u32,
}

impl Retry {
    pub fn new(policy: RetryPolicy) -> Self {
        let state = if policy.max_attempts == 0 {
            RetryState::GivenUp
        } else {
            RetryState::Attempting(0)
        };
        Self {
            policy,
            state,
            attempts: 0,
        }
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    /// Attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay to wait before the next attempt, `None` once finished.
    pub fn next_delay(&self) -> Option<Duration> {
        match self.state {
            RetryState::Attempting(failures) => Some(self.policy.delay_after_failures(failures)),
            RetryState::Succeeded | RetryState::GivenUp => None,
        }
    }

    pub fn record_success(&mut self) -> RetryState {
        if let RetryState::Attempting(_) = self.state {
            self.attempts += 1;
            self.state = RetryState::Succeeded;
        }
        self.state
    }

    pub fn record_failure(&mut self) -> RetryState {
        if let RetryState::Attempting(failures) = self.state {
            self.attempts += 1;
            let failures = failures + 1;
            self.state = if failures >= self.policy.max_attempts {
                RetryState::GivenUp
            } else {
                RetryState::Attempting(failures)
            };
        }
        self.state
    }
}
