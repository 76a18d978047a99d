//! Session clock: the pausable game clock and the wall clock.
//!
//! The stopwatch only advances while the session is not paused. The wall
//! clock always advances. Both read in seconds since the clock was
//! created, plus any simulated time added with [`SessionClock::advance_by`].

use std::time::Instant;

use crate::timer::ClockReading;

/// Source of [`ClockReading`]s for a running session.
#[derive(Debug, Clone)]
pub struct SessionClock {
    origin: Instant,
    last_sample: Instant,
    stopwatch: f64,
    simulated: f64,
    paused: bool,
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionClock {
    /// A running clock at zero.
    pub fn new() -> Self {
        Self::starting_at(0.0)
    }

    /// A running clock whose stopwatch resumes at `stopwatch` seconds.
    pub fn starting_at(stopwatch: f64) -> Self {
        let now = Instant::now();
        Self {
            origin: now,
            last_sample: now,
            stopwatch: stopwatch.max(0.0),
            simulated: 0.0,
            paused: false,
        }
    }

    /// Whether the stopwatch is paused.
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    /// Pause or resume the stopwatch.
    ///
    /// Time elapsed before the switch is credited under the old state.
    pub fn set_paused(&mut self, paused: bool) {
        if self.paused != paused {
            self.accumulate();
            self.paused = paused;
        }
    }

    /// Add simulated seconds to both clocks. The stopwatch only takes them
    /// while running.
    pub fn advance_by(&mut self, seconds: f64) {
        let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        self.simulated += seconds;
        if !self.paused {
            self.stopwatch += seconds;
        }
    }

    /// Read both clocks, crediting wall time elapsed since the last read.
    pub fn sample(&mut self) -> ClockReading {
        self.accumulate();
        ClockReading {
            stopwatch: self.stopwatch,
            realtime: self.realtime(),
            stopwatch_paused: self.paused,
        }
    }

    /// Stopwatch seconds as of the last read.
    pub const fn stopwatch(&self) -> f64 {
        self.stopwatch
    }

    /// Wall-clock seconds since the clock was created.
    pub fn realtime(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() + self.simulated
    }

    fn accumulate(&mut self) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_sample).as_secs_f64();
        self.last_sample = now;
        if !self.paused {
            self.stopwatch += elapsed;
        }
    }
}
