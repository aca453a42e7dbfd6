//! Strike breaker for the token and connection tiers.
//!
//! Each tier counts its failures inside a sliding window. A failure outside
//! the window of the previous run starts a fresh count. Once `max_strikes`
//! failures land in one window the tier gives up, which ends the current
//! consume stream and hands retrying back to the runtime.
//!
//! Between strikes the caller sleeps for an exponentially growing pause:
//!
//! ```text
//! strike 1: initial_backoff
//! strike 2: initial_backoff * multiplier
//! strike n: min(initial_backoff * multiplier^(n-1), max_backoff)
//! ```

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::RetryConfig;

/// The two stages guarded by a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Fetching a socket token over REST.
    Token,
    /// Opening and reading the socket.
    Connection,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token => f.write_str("token"),
            Self::Connection => f.write_str("connection"),
        }
    }
}

/// What to do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Try again after the pause.
    Retry(Duration),
    /// Stop; `strikes` failures landed in one window.
    GiveUp { strikes: u32 },
}

/// Failure counter for one tier.
#[derive(Debug, Clone)]
pub struct StrikeBreaker {
    tier: Tier,
    policy: RetryConfig,
    window_start: Option<Instant>,
    strikes: u32,
}

impl StrikeBreaker {
    /// Creates a breaker with no recorded failures.
    pub fn new(tier: Tier, policy: RetryConfig) -> Self {
        Self {
            tier,
            policy,
            window_start: None,
            strikes: 0,
        }
    }

    /// The guarded tier.
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Failures in the current window.
    pub fn strikes(&self) -> u32 {
        self.strikes
    }

    /// Counting window length.
    pub fn window(&self) -> Duration {
        self.policy.window()
    }

    /// Records a failure at `now`.
    pub fn strike(&mut self, now: Instant) -> Verdict {
        match self.window_start {
            Some(start) if now.saturating_duration_since(start) <= self.policy.window() => {
                self.strikes += 1;
            }
            _ => {
                self.window_start = Some(now);
                self.strikes = 1;
            }
        }

        if self.strikes >= self.policy.max_strikes {
            Verdict::GiveUp {
                strikes: self.strikes,
            }
        } else {
            Verdict::Retry(self.backoff(self.strikes))
        }
    }

    /// Forgets every recorded failure.
    pub fn reset(&mut self) {
        self.window_start = None;
        self.strikes = 0;
    }

    /// Pause before the attempt following failure number `strike`.
    pub fn backoff(&self, strike: u32) -> Duration {
        let exponent = strike.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.policy.initial_backoff_ms as f64 * self.policy.multiplier.powi(exponent);
        let capped = millis.min(self.policy.max_backoff_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_strikes: u32) -> RetryConfig {
        RetryConfig {
            max_strikes,
            ..RetryConfig::default()
        }
    }

    #[test]
    fn second_failure_within_window_gives_up() {
        let mut breaker = StrikeBreaker::new(Tier::Token, policy(2));
        let t0 = Instant::now();

        assert_eq!(
            breaker.strike(t0),
            Verdict::Retry(Duration::from_millis(500))
        );
        assert_eq!(
            breaker.strike(t0 + Duration::from_secs(3)),
            Verdict::GiveUp { strikes: 2 }
        );
    }

    #[test]
    fn failures_outside_window_start_over() {
        let mut breaker = StrikeBreaker::new(Tier::Connection, policy(2));
        let t0 = Instant::now();

        assert!(matches!(breaker.strike(t0), Verdict::Retry(_)));
        assert!(matches!(
            breaker.strike(t0 + Duration::from_secs(16)),
            Verdict::Retry(_)
        ));
        assert_eq!(breaker.strikes(), 1);
        assert!(matches!(
            breaker.strike(t0 + Duration::from_secs(20)),
            Verdict::GiveUp { strikes: 2 }
        ));
    }

    #[test]
    fn reset_clears_the_count() {
        let mut breaker = StrikeBreaker::new(Tier::Token, policy(2));
        let t0 = Instant::now();
        breaker.strike(t0);
        breaker.reset();
        assert!(matches!(breaker.strike(t0), Verdict::Retry(_)));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let breaker = StrikeBreaker::new(Tier::Token, policy(10));
        assert_eq!(breaker.backoff(1), Duration::from_millis(500));
        assert_eq!(breaker.backoff(2), Duration::from_millis(1000));
        assert_eq!(breaker.backoff(4), Duration::from_millis(4000));
        assert_eq!(breaker.backoff(20), Duration::from_millis(30_000));
    }

    #[test]
    fn zero_backoff_retries_immediately() {
        let mut breaker = StrikeBreaker::new(
            Tier::Token,
            RetryConfig {
                initial_backoff_ms: 0,
                ..RetryConfig::default()
            },
        );
        assert_eq!(breaker.strike(Instant::now()), Verdict::Retry(Duration::ZERO));
    }
}
