//! Fixed-rate tick scheduler.
//!
//! Session ticks run at a fixed rate (60 Hz by default) no matter how often
//! the caller's loop spins. Elapsed wall time is accumulated and paid out in
//! whole ticks; long stalls are clamped so the session never tries to catch up
//! on hundreds of ticks at once.

use std::time::{Duration, Instant};

use tracing::warn;

/// Default tick rate in Hz.
pub const DEFAULT_TICK_RATE: u32 = 60;

/// Largest stretch of wall time paid out in one call.
pub const MAX_FRAME_TIME: Duration = Duration::from_millis(250);

/// Drives a callback at a fixed rate from an irregular outer loop.
pub struct TickDriver {
    interval: Duration,
    previous: Instant,
    accumulator: Duration,
    tick_count: u64,
}

impl Default for TickDriver {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_RATE)
    }
}

impl TickDriver {
    /// A driver ticking `rate_hz` times per second, starting now. A rate of
    /// zero falls back to [`DEFAULT_TICK_RATE`].
    pub fn new(rate_hz: u32) -> Self {
        Self::starting_at(rate_hz, Instant::now())
    }

    /// A driver whose clock starts at `start`.
    pub fn starting_at(rate_hz: u32, start: Instant) -> Self {
        let rate = if rate_hz == 0 { DEFAULT_TICK_RATE } else { rate_hz };
        Self {
            interval: Duration::from_secs(1) / rate,
            previous: start,
            accumulator: Duration::ZERO,
            tick_count: 0,
        }
    }

    /// Length of one tick.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Ticks run so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Run every tick that is due now. Returns how many ran.
    pub fn advance(&mut self, step: impl FnMut(Duration)) -> u32 {
        self.advance_at(Instant::now(), step)
    }

    /// Run every tick that is due at `now`. `step` receives the tick interval.
    pub fn advance_at(&mut self, now: Instant, mut step: impl FnMut(Duration)) -> u32 {
        let mut frame_time = now.saturating_duration_since(self.previous);
        self.previous = now;

        if frame_time > MAX_FRAME_TIME {
            warn!(
                "Frame time {:.1}ms exceeds maximum, clamping to {:.1}ms",
                frame_time.as_secs_f64() * 1000.0,
                MAX_FRAME_TIME.as_secs_f64() * 1000.0
            );
            frame_time = MAX_FRAME_TIME;
        }
        self.accumulator += frame_time;

        let mut ran = 0;
        while self.accumulator >= self.interval {
            step(self.interval);
            self.accumulator -= self.interval;
            self.tick_count += 1;
            ran += 1;
        }
        ran
    }

    /// Time from `now` until the next tick is due.
    pub fn time_until_next(&self, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(self.previous) + self.accumulator;
        self.interval.saturating_sub(elapsed)
    }
}
