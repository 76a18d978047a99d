//! Operator control state for a running session.
//!
//! This module provides shared state used by the session loop and
//! whatever drives it from outside (a console, a chat bridge, a signal
//! handler). The operator can pause the game clock, change tick speed,
//! queue debug commands, and trigger a clean shutdown without stopping
//! the process.
//!
//! # Architecture
//!
//! Flags and the tick interval are atomics so the loop reads them
//! without locks. The command queue and end reason sit behind tokio
//! mutexes, and stop requests wake a sleeping loop through a [`Notify`].
//!
//! Pausing does not halt the loop. It pauses the stopwatch, and the
//! activation timer falls back to the wall clock until resumed.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};

use crate::commands::ChaosCommand;
use crate::config::RunnerConfig;

/// Smallest tick interval the operator may set, in milliseconds.
pub const MIN_TICK_INTERVAL_MS: u64 = 10;

/// Reason why the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEndReason {
    /// Reached the configured `max_ticks` limit.
    MaxTicksReached,
    /// Reached the configured `max_real_time_seconds` limit.
    MaxRealTimeReached,
    /// An operator issued a stop command.
    OperatorStop,
}

/// Shared operator control state.
///
/// Wrap in [`std::sync::Arc`] and share between the session loop and
/// its controllers.
#[derive(Debug)]
pub struct OperatorState {
    /// Whether the game clock is paused.
    paused: AtomicBool,

    /// Whether a stop has been requested.
    stop_requested: AtomicBool,

    /// Wakes a sleeping loop when a stop is requested.
    stop_notify: Notify,

    /// Current tick interval in milliseconds (runtime-adjustable).
    tick_interval_ms: AtomicU64,

    /// Wall-clock time when the session started.
    started_at: DateTime<Utc>,

    /// Maximum number of ticks (0 = unlimited).
    max_ticks: u64,

    /// Maximum wall-clock seconds (0 = unlimited).
    max_real_time_seconds: u64,

    /// Commands awaiting execution at the next tick.
    commands: Mutex<Vec<ChaosCommand>>,

    /// Reason the session ended, if it has.
    end_reason: Mutex<Option<SessionEndReason>>,
}

impl OperatorState {
    /// Create operator state from the runner configuration.
    pub fn new(config: &RunnerConfig) -> Self {
        Self {
            paused: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            stop_notify: Notify::new(),
            tick_interval_ms: AtomicU64::new(config.tick_interval_ms),
            started_at: Utc::now(),
            max_ticks: config.max_ticks,
            max_real_time_seconds: config.max_real_time_seconds,
            commands: Mutex::new(Vec::new()),
            end_reason: Mutex::new(None),
        }
    }

    // -----------------------------------------------------------------------
    // Pause / Resume
    // -----------------------------------------------------------------------

    /// Check whether the game clock is paused.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Pause the game clock.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    /// Resume the game clock.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    // -----------------------------------------------------------------------
    // Stop
    // -----------------------------------------------------------------------

    /// Request a clean stop and wake the loop if it is sleeping.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.stop_notify.notify_one();
    }

    /// Check whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Wait until a stop is requested.
    pub async fn stopped(&self) {
        while !self.is_stop_requested() {
            self.stop_notify.notified().await;
        }
    }

    /// Record the reason the session ended.
    pub async fn set_end_reason(&self, reason: SessionEndReason) {
        let mut guard = self.end_reason.lock().await;
        *guard = Some(reason);
    }

    /// Get the reason the session ended, if it has.
    pub async fn end_reason(&self) -> Option<SessionEndReason> {
        *self.end_reason.lock().await
    }

    // -----------------------------------------------------------------------
    // Tick Speed
    // -----------------------------------------------------------------------

    /// Get the current tick interval in milliseconds.
    pub fn tick_interval_ms(&self) -> u64 {
        self.tick_interval_ms.load(Ordering::Acquire)
    }

    /// Set the tick interval in milliseconds.
    ///
    /// Returns the previous interval on success, or `None` if the value
    /// was below [`MIN_TICK_INTERVAL_MS`].
    pub fn set_tick_interval_ms(&self, ms: u64) -> Option<u64> {
        if ms < MIN_TICK_INTERVAL_MS {
            return None;
        }
        let prev = self.tick_interval_ms.swap(ms, Ordering::AcqRel);
        Some(prev)
    }

    // -----------------------------------------------------------------------
    // Boundaries
    // -----------------------------------------------------------------------

    /// Check whether the tick limit has been reached.
    ///
    /// Returns `true` if `max_ticks > 0` and `ticks >= max_ticks`.
    pub const fn tick_limit_reached(&self, ticks: u64) -> bool {
        self.max_ticks > 0 && ticks >= self.max_ticks
    }

    /// Check whether the wall-clock time limit has been reached.
    pub fn time_limit_reached(&self) -> bool {
        self.max_real_time_seconds > 0 && self.elapsed_seconds() >= self.max_real_time_seconds
    }

    /// Return the wall-clock start time.
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Return elapsed seconds since the session started.
    pub fn elapsed_seconds(&self) -> u64 {
        let elapsed = Utc::now()
            .signed_duration_since(self.started_at)
            .num_seconds();
        // `num_seconds` can be negative if clocks are weird; treat as 0.
        u64::try_from(elapsed.max(0)).unwrap_or(u64::MAX)
    }

    /// Get the configured max ticks.
    pub const fn max_ticks(&self) -> u64 {
        self.max_ticks
    }

    /// Get the configured max real-time seconds.
    pub const fn max_real_time_seconds(&self) -> u64 {
        self.max_real_time_seconds
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Queue a command for the next tick.
    pub async fn queue_command(&self, command: ChaosCommand) {
        let mut queue = self.commands.lock().await;
        queue.push(command);
    }

    /// Drain all queued commands, oldest first.
    pub async fn drain_commands(&self) -> Vec<ChaosCommand> {
        let mut queue = self.commands.lock().await;
        std::mem::take(&mut *queue)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn runner_config(max_ticks: u64) -> RunnerConfig {
        RunnerConfig {
            max_ticks,
            ..RunnerConfig::default()
        }
    }

    #[test]
    fn initial_state_is_running() {
        let state = OperatorState::new(&runner_config(0));
        assert!(!state.is_paused());
        assert!(!state.is_stop_requested());
        assert_eq!(state.tick_interval_ms(), 50);
    }

    #[test]
    fn pause_and_resume() {
        let state = OperatorState::new(&runner_config(0));
        state.pause();
        assert!(state.is_paused());
        state.resume();
        assert!(!state.is_paused());
    }

    #[test]
    fn set_tick_interval() {
        let state = OperatorState::new(&runner_config(0));
        assert_eq!(state.set_tick_interval_ms(200), Some(50));
        assert_eq!(state.tick_interval_ms(), 200);
        assert!(state.set_tick_interval_ms(1).is_none());
        assert_eq!(state.tick_interval_ms(), 200);
    }

    #[test]
    fn tick_limit() {
        let unlimited = OperatorState::new(&runner_config(0));
        assert!(!unlimited.tick_limit_reached(999_999));

        let bounded = OperatorState::new(&runner_config(100));
        assert!(!bounded.tick_limit_reached(99));
        assert!(bounded.tick_limit_reached(100));
    }

    #[test]
    fn time_limit_zero_means_unlimited() {
        let state = OperatorState::new(&runner_config(0));
        assert!(!state.time_limit_reached());
    }

    #[tokio::test]
    async fn queue_and_drain_commands() {
        let state = OperatorState::new(&runner_config(0));
        state.queue_command(ChaosCommand::SkipScheduled).await;
        state.queue_command(ChaosCommand::EndAllActiveEffects).await;
        let commands = state.drain_commands().await;
        assert_eq!(
            commands,
            vec![ChaosCommand::SkipScheduled, ChaosCommand::EndAllActiveEffects]
        );
        assert!(state.drain_commands().await.is_empty());
    }

    #[tokio::test]
    async fn stop_wakes_waiter() {
        let state = Arc::new(OperatorState::new(&runner_config(0)));
        let waiter = {
            let state = Arc::clone(&state);
            tokio::spawn(async move { state.stopped().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        state.request_stop();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn end_reason_is_recorded() {
        let state = OperatorState::new(&runner_config(0));
        assert_eq!(state.end_reason().await, None);
        state.set_end_reason(SessionEndReason::OperatorStop).await;
        assert_eq!(state.end_reason().await, Some(SessionEndReason::OperatorStop));
    }
}
