//! Fixed-rate tick accounting for the server loop.

use std::time::Duration;

/// Default server tick rate in Hz.
pub const DEFAULT_TICK_RATE: u32 = 20;

/// Longest stretch of real time a single `accumulate` call will convert into
/// ticks. Anything beyond is dropped so a stalled loop does not spiral.
const MAX_CATCH_UP_SECS: f64 = 0.25;

/// Accumulates real elapsed time and yields whole ticks at a fixed rate.
#[derive(Debug, Clone)]
pub struct ServerTickSchedule {
    accumulator_secs: f64,
    tick_duration_secs: f64,
    total_ticks: u64,
}

impl ServerTickSchedule {
    pub fn new() -> Self {
        Self::with_tick_rate(DEFAULT_TICK_RATE)
    }

    /// A schedule at `hz` ticks per second (clamped to at least 1).
    pub fn with_tick_rate(hz: u32) -> Self {
        Self {
            accumulator_secs: 0.0,
            tick_duration_secs: 1.0 / f64::from(hz.max(1)),
            total_ticks: 0,
        }
    }

    /// Adds elapsed time and returns how many ticks are now due.
    pub fn accumulate(&mut self, dt_secs: f64) -> u32 {
        if dt_secs > MAX_CATCH_UP_SECS {
            tracing::warn!(
                "tick loop stalled for {:.1}ms, dropping backlog",
                dt_secs * 1000.0
            );
        }
        self.accumulator_secs += dt_secs.min(MAX_CATCH_UP_SECS);
        let mut ticks = 0u32;
        while self.accumulator_secs >= self.tick_duration_secs {
            self.accumulator_secs -= self.tick_duration_secs;
            self.total_ticks += 1;
            ticks += 1;
        }
        ticks
    }

    /// Time until the next tick is due.
    pub fn until_next_tick(&self) -> Duration {
        Duration::from_secs_f64((self.tick_duration_secs - self.accumulator_secs).max(0.0))
    }

    pub fn total_ticks(&self) -> u64 {
        self.total_ticks
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(self.tick_duration_secs)
    }
}

impl Default for ServerTickSchedule {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rate_is_twenty_hz() {
        let schedule = ServerTickSchedule::new();
        assert_eq!(schedule.tick_duration(), Duration::from_millis(50));
    }

    #[test]
    fn test_accumulate_yields_whole_ticks() {
        let mut schedule = ServerTickSchedule::with_tick_rate(20);
        assert_eq!(schedule.accumulate(0.02), 0);
        assert_eq!(schedule.accumulate(0.04), 1);
        assert_eq!(schedule.accumulate(0.1), 2);
        assert_eq!(schedule.total_ticks(), 3);
    }

    #[test]
    fn test_long_stall_is_clamped() {
        let mut schedule = ServerTickSchedule::with_tick_rate(20);
        // 10 seconds of backlog collapses to the 250ms cap: 5 ticks.
        assert_eq!(schedule.accumulate(10.0), 5);
    }

    #[test]
    fn test_until_next_tick_shrinks_as_time_accumulates() {
        let mut schedule = ServerTickSchedule::with_tick_rate(10);
        let before = schedule.until_next_tick();
        schedule.accumulate(0.03);
        assert!(schedule.until_next_tick() < before);
    }
}
