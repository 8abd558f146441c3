//! Request pacing, decoupled from measurement.
//!
//! Remote targets rate-limit or queue bursts of requests, which shows up as
//! latency that has nothing to do with the comparison being attacked. Pacing
//! happens strictly outside the timed window.

use std::fmt;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

use crate::config::ConfigError;

/// How oracle calls are spaced out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pacing {
    /// Call as fast as possible. The right choice for local oracles.
    #[default]
    None,
    /// Leave at least this much idle time between the end of one call and the start of the next.
    Fixed(Duration),
    /// Token bucket: at most `per_second` calls per second with bursts of up to `burst`.
    RateLimit {
        /// Sustained call rate.
        per_second: u32,
        /// Calls allowed back to back before throttling.
        burst: u32,
    },
}

impl Pacing {
    /// Fixed delay from fractional seconds, as taken on the command line.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidPacing`] for negative, non-finite or
    /// unrepresentably large delays.
    pub fn from_secs_f64(secs: f64) -> Result<Self, ConfigError> {
        let delay = Duration::try_from_secs_f64(secs).map_err(|e| {
            ConfigError::InvalidPacing(format!("invalid delay of {} seconds: {}", secs, e))
        })?;
        if delay.is_zero() {
            Ok(Pacing::None)
        } else {
            Ok(Pacing::Fixed(delay))
        }
    }

    /// Check that the policy can be turned into a [`Pacer`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Pacing::RateLimit { per_second, burst } if *per_second == 0 || *burst == 0 => {
                Err(ConfigError::InvalidPacing(format!(
                    "rate limit needs a positive rate and burst, got {}/s burst {}",
                    per_second, burst
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Runtime state for a [`Pacing`] policy.
pub struct Pacer {
    policy: Pacing,
    limiter: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    clock: DefaultClock,
    last_call_end: Option<Instant>,
}

impl Pacer {
    /// Create the pacer for `policy`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidPacing`] for a zero rate or burst.
    pub fn new(policy: Pacing) -> Result<Self, ConfigError> {
        policy.validate()?;
        let limiter = match policy {
            Pacing::RateLimit { per_second, burst } => {
                match (NonZeroU32::new(per_second), NonZeroU32::new(burst)) {
                    (Some(rate), Some(burst)) => {
                        Some(RateLimiter::direct(Quota::per_second(rate).allow_burst(burst)))
                    }
                    _ => None,
                }
            }
            _ => None,
        };
        Ok(Self {
            policy,
            limiter,
            clock: DefaultClock::default(),
            last_call_end: None,
        })
    }

    /// Block until the next call is allowed.
    pub fn wait(&mut self) {
        match self.policy {
            Pacing::None => {}
            Pacing::Fixed(delay) => {
                if let Some(end) = self.last_call_end {
                    let idle = end.elapsed();
                    if idle < delay {
                        std::thread::sleep(delay - idle);
                    }
                }
            }
            Pacing::RateLimit { .. } => {
                if let Some(limiter) = &self.limiter {
                    while let Err(not_until) = limiter.check() {
                        std::thread::sleep(not_until.wait_time_from(self.clock.now()));
                    }
                }
            }
        }
    }

    /// Record that a call just finished.
    pub fn finished(&mut self) {
        if matches!(self.policy, Pacing::Fixed(_)) {
            self.last_call_end = Some(Instant::now());
        }
    }
}

impl fmt::Debug for Pacer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pacer")
            .field("policy", &self.policy)
            .field("last_call_end", &self.last_call_end)
            .finish_non_exhaustive()
    }
}
