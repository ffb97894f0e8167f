use std::num::NonZeroU32;
use std::thread;
use std::time::{Duration, Instant};

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tracing::debug;

use crate::config::PacingConfig;

pub trait Pacer {
    fn before_call(&mut self);
    fn after_call(&mut self);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

impl Pacer for NoDelay {
    fn before_call(&mut self) {}
    fn after_call(&mut self) {}
}

/// At least `interval` between the end of one call and the start of the next.
#[derive(Debug, Clone)]
pub struct FixedInterval {
    interval: Duration,
    last_finished: Option<Instant>,
}

impl FixedInterval {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_finished: None,
        }
    }
}

impl Pacer for FixedInterval {
    fn before_call(&mut self) {
        let Some(last) = self.last_finished else {
            return;
        };
        let remaining = self.interval.saturating_sub(last.elapsed());
        if !remaining.is_zero() {
            debug!(wait_ms = remaining.as_millis() as u64, "pacing search call");
            thread::sleep(remaining);
        }
    }

    fn after_call(&mut self) {
        self.last_finished = Some(Instant::now());
    }
}

/// Up to `burst` calls back to back, refilled at one call per `interval`.
pub struct TokenBucket {
    limiter: DefaultDirectRateLimiter,
    clock: DefaultClock,
}

impl TokenBucket {
    /// `None` when `interval` is zero.
    pub fn new(burst: u32, interval: Duration) -> Option<Self> {
        let burst = NonZeroU32::new(burst.max(1))?;
        let quota = Quota::with_period(interval)?.allow_burst(burst);
        Some(Self {
            limiter: RateLimiter::direct(quota),
            clock: DefaultClock::default(),
        })
    }
}

impl Pacer for TokenBucket {
    fn before_call(&mut self) {
        while let Err(not_until) = self.limiter.check() {
            let wait = not_until.wait_time_from(self.clock.now());
            debug!(wait_ms = wait.as_millis() as u64, "pacing search call");
            thread::sleep(wait);
        }
    }

    fn after_call(&mut self) {}
}

pub fn pacer_from_config(config: PacingConfig) -> Box<dyn Pacer> {
    match config {
        PacingConfig::Fixed { interval } if interval.is_zero() => Box::new(NoDelay),
        PacingConfig::Fixed { interval } => Box::new(FixedInterval::new(interval)),
        PacingConfig::TokenBucket { burst, interval } => match TokenBucket::new(burst, interval) {
            Some(bucket) => Box::new(bucket),
            None => Box::new(NoDelay),
        },
    }
}
