//! Periodic activation timers.
//!
//! A [`PeriodicTimer`] tracks one clock: the time of the last activation
//! and a period. The next activation is always `last + period`, so falling
//! behind never loses activations; they are counted and consumed by
//! advancing `last` in whole periods.
//!
//! [`DualClockTimer`] runs two of them. The stopwatch timer follows the
//! pausable game clock, the realtime timer follows the wall clock and takes
//! over whenever the stopwatch is paused.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Activations closer than this after a fire are skipped.
pub const DOUBLE_FIRE_GUARD_SECONDS: f64 = 1.0 / 20.0;

/// Where a [`PeriodicTimer`] stands relative to a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerState {
    /// Not started.
    Idle,
    /// Waiting for the next activation.
    Armed,
    /// At least one activation is due and not yet consumed.
    Fired,
}

/// A single-clock periodic schedule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodicTimer {
    period: f64,
    last_activation: f64,
    started: bool,
}

impl PeriodicTimer {
    /// An idle timer with `period` seconds between activations.
    pub const fn new(period: f64) -> Self {
        Self {
            period,
            last_activation: 0.0,
            started: false,
        }
    }

    /// Arm the timer so the first activation is one period after `now`.
    pub const fn start(&mut self, now: f64) {
        self.last_activation = now;
        self.started = true;
    }

    /// Whether [`Self::start`] has been called.
    pub const fn is_started(&self) -> bool {
        self.started
    }

    /// Seconds between activations.
    pub const fn period(&self) -> f64 {
        self.period
    }

    /// Change the period. The next activation moves to `last + period`.
    pub const fn set_period(&mut self, period: f64) {
        self.period = period;
    }

    /// Time of the next activation.
    pub fn next_activation(&self) -> f64 {
        self.last_activation + self.period
    }

    /// Time of the last consumed activation.
    pub const fn last_activation(&self) -> f64 {
        self.last_activation
    }

    /// Overwrite the last activation time, used when restoring a save.
    pub const fn set_last_activation(&mut self, time: f64) {
        self.last_activation = time;
        self.started = true;
    }

    /// State at `now`.
    pub fn state(&self, now: f64) -> TimerState {
        if !self.started {
            TimerState::Idle
        } else if self.should_activate(now) {
            TimerState::Fired
        } else {
            TimerState::Armed
        }
    }

    /// Whether an activation is due at `now`.
    pub fn should_activate(&self, now: f64) -> bool {
        self.started && self.period > 0.0 && now >= self.next_activation()
    }

    /// Consume one activation.
    pub fn schedule_next_activation(&mut self) {
        self.last_activation += self.period;
    }

    /// Number of activations due at `now`.
    pub fn scheduled_activation_count(&self, now: f64) -> u32 {
        if !self.should_activate(now) {
            return 0;
        }
        let periods = ((now - self.next_activation()) / self.period).floor();
        if periods >= f64::from(u32::MAX) {
            return u32::MAX;
        }
        // Range checked above, and `periods` is non-negative.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let whole = periods as u32;
        whole.saturating_add(1)
    }

    /// Advance the schedule by `count` periods without firing.
    pub fn skip(&mut self, count: u32) {
        self.last_activation += self.period * f64::from(count);
    }

    /// Consume every activation due at `now`. Returns how many there were.
    pub fn skip_all_scheduled(&mut self, now: f64) -> u32 {
        let count = self.scheduled_activation_count(now);
        self.skip(count);
        count
    }

    /// Move the schedule `seconds` earlier.
    pub fn rewind(&mut self, seconds: f64) {
        if seconds.is_finite() {
            self.last_activation -= seconds;
        }
    }

    /// Seconds until the next activation. Negative when overdue.
    pub fn time_remaining(&self, now: f64) -> f64 {
        self.next_activation() - now
    }
}

/// One reading of both clocks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClockReading {
    /// Pausable game-clock seconds.
    pub stopwatch: f64,
    /// Wall-clock seconds since the session started.
    pub realtime: f64,
    /// Whether the game clock is paused.
    pub stopwatch_paused: bool,
}

impl ClockReading {
    /// A running stopwatch at `stopwatch`, with the wall clock in step.
    pub const fn running(stopwatch: f64) -> Self {
        Self {
            stopwatch,
            realtime: stopwatch,
            stopwatch_paused: false,
        }
    }
}

/// A periodic schedule that follows the game clock and falls back to the
/// wall clock while the game clock is paused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DualClockTimer {
    stopwatch: PeriodicTimer,
    realtime: PeriodicTimer,
    was_paused: bool,
}

impl DualClockTimer {
    /// Start both clocks at `reading`.
    pub fn new(period: f64, reading: ClockReading) -> Self {
        let mut stopwatch = PeriodicTimer::new(period);
        let mut realtime = PeriodicTimer::new(period);
        stopwatch.start(reading.stopwatch);
        realtime.start(reading.realtime);
        Self {
            stopwatch,
            realtime,
            was_paused: reading.stopwatch_paused,
        }
    }

    const fn current(&self, reading: &ClockReading) -> (&PeriodicTimer, f64) {
        if reading.stopwatch_paused {
            (&self.realtime, reading.realtime)
        } else {
            (&self.stopwatch, reading.stopwatch)
        }
    }

    const fn current_mut(&mut self, reading: &ClockReading) -> (&mut PeriodicTimer, f64) {
        if reading.stopwatch_paused {
            (&mut self.realtime, reading.realtime)
        } else {
            (&mut self.stopwatch, reading.stopwatch)
        }
    }

    /// Advance to `reading`. Returns true when the timer fires.
    ///
    /// Fires at most once per call. Every due activation is consumed, and
    /// one more is skipped if it would land within
    /// [`DOUBLE_FIRE_GUARD_SECONDS`].
    pub fn update(&mut self, reading: &ClockReading) -> bool {
        if self.was_paused != reading.stopwatch_paused {
            self.was_paused = reading.stopwatch_paused;
            if reading.stopwatch_paused {
                let skipped = self.realtime.skip_all_scheduled(reading.realtime);
                debug!(skipped, "Switched to realtime timer");
            }
        }

        let (timer, now) = self.current_mut(reading);
        if !timer.should_activate(now) {
            return false;
        }
        timer.skip_all_scheduled(now);
        if timer.time_remaining(now) <= DOUBLE_FIRE_GUARD_SECONDS {
            debug!("Prevented double timer activation");
            timer.skip(1);
        }
        true
    }

    /// Seconds until the next activation on the active clock.
    pub fn time_remaining(&self, reading: &ClockReading) -> f64 {
        let (timer, now) = self.current(reading);
        timer.time_remaining(now)
    }

    /// Activations due on the active clock.
    pub fn scheduled_activation_count(&self, reading: &ClockReading) -> u32 {
        let (timer, now) = self.current(reading);
        timer.scheduled_activation_count(now)
    }

    /// Skip `count` activations on the active clock.
    pub fn skip(&mut self, count: u32, reading: &ClockReading) {
        let (timer, _) = self.current_mut(reading);
        timer.skip(count);
    }

    /// Consume every due activation on the active clock.
    pub fn skip_all_scheduled(&mut self, reading: &ClockReading) -> u32 {
        let (timer, now) = self.current_mut(reading);
        timer.skip_all_scheduled(now)
    }

    /// Move both schedules `seconds` earlier.
    pub fn rewind(&mut self, seconds: f64) {
        self.stopwatch.rewind(seconds);
        self.realtime.rewind(seconds);
    }

    /// Seconds between activations.
    pub const fn period(&self) -> f64 {
        self.stopwatch.period()
    }

    /// Change the period on both clocks.
    pub const fn set_period(&mut self, period: f64) {
        self.stopwatch.set_period(period);
        self.realtime.set_period(period);
    }

    /// Last activation on the game clock.
    pub const fn stopwatch_last_activation(&self) -> f64 {
        self.stopwatch.last_activation()
    }

    /// Restore the game-clock phase. Anything already due on the wall
    /// clock is discarded.
    pub fn set_stopwatch_last_activation(&mut self, time: f64, reading: &ClockReading) {
        self.stopwatch.set_last_activation(time);
        self.realtime.skip_all_scheduled(reading.realtime);
    }

    /// Last activation on the wall clock.
    pub const fn realtime_last_activation(&self) -> f64 {
        self.realtime.last_activation()
    }

    /// Restore the wall-clock phase.
    pub const fn set_realtime_last_activation(&mut self, time: f64) {
        self.realtime.set_last_activation(time);
    }
}
