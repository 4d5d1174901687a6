//! Client frame pacing.
//!
//! Network-side work (draining messages, requesting chunks, sending the
//! player transform) runs at a fixed step; the frame callback runs once per
//! iteration.

use std::time::{Duration, Instant};

/// Fixed client update step: 20 Hz, matching the server tick.
pub const UPDATE_DT: f64 = 1.0 / 20.0;

/// Longest frame time fed into the accumulator.
pub const MAX_FRAME_TIME: f64 = 0.25;

pub struct FrameLoop {
    previous: Instant,
    accumulator: f64,
    frame_budget: Duration,
    frames: u64,
    updates: u64,
}

impl FrameLoop {
    /// `target_fps` of 0 means unpaced.
    pub fn new(target_fps: u32) -> Self {
        let frame_budget = if target_fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(1.0 / f64::from(target_fps))
        };
        Self {
            previous: Instant::now(),
            accumulator: 0.0,
            frame_budget,
            frames: 0,
            updates: 0,
        }
    }

    /// Runs one iteration: zero or more `update` steps, then `frame` once,
    /// then sleeps out the rest of the frame budget.
    pub fn run_once<S>(&mut self, state: &mut S, update: impl FnMut(&mut S, f64), frame: impl FnMut(&mut S)) {
        let started = Instant::now();
        let elapsed = started.duration_since(self.previous).as_secs_f64();
        self.previous = started;
        self.advance(elapsed, state, update, frame);

        let spent = started.elapsed();
        if spent < self.frame_budget {
            std::thread::sleep(self.frame_budget - spent);
        }
    }

    fn advance<S>(
        &mut self,
        elapsed: f64,
        state: &mut S,
        mut update: impl FnMut(&mut S, f64),
        mut frame: impl FnMut(&mut S),
    ) {
        if elapsed > MAX_FRAME_TIME {
            tracing::warn!(
                "frame took {:.1}ms, clamping to {:.1}ms",
                elapsed * 1000.0,
                MAX_FRAME_TIME * 1000.0
            );
        }
        self.accumulator += elapsed.min(MAX_FRAME_TIME);
        while self.accumulator >= UPDATE_DT {
            update(state, UPDATE_DT);
            self.accumulator -= UPDATE_DT;
            self.updates += 1;
        }
        frame(state);
        self.frames += 1;
    }

    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    pub fn update_count(&self) -> u64 {
        self.updates
    }
}
