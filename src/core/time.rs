//! Simulation Time
//!
//! The simulation never reads the wall clock. Time is derived from the tick
//! counter so that replays produce identical timestamps.

use serde::{Deserialize, Serialize};

/// Simulation time in seconds.
pub type Seconds = f64;

/// Tolerance for comparing accumulated simulation timestamps.
pub const TIME_EPSILON: Seconds = 1e-6;

/// Tick-driven simulation clock.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimClock {
    tick: u64,
    dt: Seconds,
}

impl SimClock {
    /// Create a clock at tick 0 with the given step length.
    pub fn new(dt: Seconds) -> Self {
        Self { tick: 0, dt }
    }

    /// Current tick number.
    #[inline]
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Fixed step length.
    #[inline]
    pub fn dt(&self) -> Seconds {
        self.dt
    }

    /// Current simulation time.
    ///
    /// Computed from the tick count rather than summed, so it never drifts.
    #[inline]
    pub fn now(&self) -> Seconds {
        self.tick as Seconds * self.dt
    }

    /// Advance by one tick and return the new time.
    pub fn advance(&mut self) -> Seconds {
        self.tick += 1;
        self.now()
    }
}

/// Fixed-timestep accumulator with a catch-up ceiling.
///
/// Frame time beyond `max_frame_time` is discarded so a long stall cannot
/// queue an unbounded number of steps (spiral of death).
#[derive(Clone, Debug)]
pub struct FixedTimestep {
    dt: Seconds,
    max_frame_time: Seconds,
    accumulator: Seconds,
}

impl FixedTimestep {
    /// Create an accumulator for steps of `dt` seconds.
    pub fn new(dt: Seconds, max_frame_time: Seconds) -> Self {
        Self {
            dt,
            max_frame_time,
            accumulator: 0.0,
        }
    }

    /// Step length.
    #[inline]
    pub fn dt(&self) -> Seconds {
        self.dt
    }

    /// Add elapsed frame time; returns how many fixed steps are due.
    pub fn accumulate(&mut self, frame_dt: Seconds) -> u32 {
        let frame_dt = if frame_dt.is_finite() {
            frame_dt.clamp(0.0, self.max_frame_time)
        } else {
            0.0
        };
        self.accumulator += frame_dt;

        let mut steps = 0;
        while self.accumulator + TIME_EPSILON >= self.dt {
            self.accumulator -= self.dt;
            steps += 1;
        }
        self.accumulator = self.accumulator.max(0.0);
        steps
    }

    /// Interpolation factor (0..1) for rendering between the last two steps.
    pub fn alpha(&self) -> f32 {
        (self.accumulator / self.dt) as f32
    }

    /// Drop any partially accumulated time.
    pub fn reset(&mut self) {
        self.accumulator = 0.0;
    }
}
