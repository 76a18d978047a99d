//! Session loop runner with operator controls.
//!
//! This module provides [`run_session`], the top-level async function
//! that drives a [`ChaosSession`] with support for:
//!
//! - **Bounded runs**: stop after `max_ticks` or `max_real_time_seconds`
//! - **Pause/resume**: the game clock stops and the timer follows the wall clock
//! - **Variable tick speed**: tick interval adjustable at runtime
//! - **Stages**: a new stage every `stage_length_seconds` of game time
//! - **Queued commands**: drained and executed between ticks
//! - **Clean shutdown**: optional snapshot, then every active effect ends
//!
//! A tick never awaits. The runner only yields while sleeping between
//! ticks and while draining the command queue.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clock::SessionClock;
use crate::commands::CommandOutcome;
use crate::config::RunnerConfig;
use crate::host::SessionHost;
use crate::operator::{OperatorState, SessionEndReason};
use crate::session::ChaosSession;
use crate::snapshot::SnapshotError;
use crate::timer::ClockReading;

/// Errors that can occur during the session run.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// Saving the final snapshot failed.
    #[error("failed to save scheduler snapshot: {source}")]
    Snapshot {
        /// The underlying snapshot error.
        #[from]
        source: SnapshotError,
    },
}

/// Result of the session run.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionResult {
    /// The reason the session ended.
    pub end_reason: SessionEndReason,
    /// Total number of ticks executed.
    pub total_ticks: u64,
    /// Effects dispatched by the signaler or by commands.
    pub dispatched: u64,
    /// Stages started, including the first.
    pub stages: u32,
    /// Game-clock seconds at shutdown.
    pub final_stopwatch: f64,
}

/// Callback invoked after each tick completes.
///
/// Implementations can use this to refresh an overlay, export state, and
/// so on.
pub trait TickCallback: Send {
    /// Called after a tick completes.
    fn on_tick(&mut self, reading: &ClockReading, session: &ChaosSession);
}

/// A no-op tick callback for testing.
pub struct NoOpCallback;

impl TickCallback for NoOpCallback {
    fn on_tick(&mut self, _reading: &ClockReading, _session: &ChaosSession) {}
}

/// Run the session loop until a termination condition is met.
///
/// The first stage starts before the first tick. When
/// `config.save_path` is set and the session is the authority, a
/// snapshot is written after the loop ends. The session is shut down in
/// every case.
///
/// # Errors
///
/// Returns [`RunnerError::Snapshot`] if the final snapshot cannot be
/// written. The session has still been shut down.
pub async fn run_session(
    session: &mut ChaosSession,
    clock: &mut SessionClock,
    operator: &Arc<OperatorState>,
    host: &mut dyn SessionHost,
    callback: &mut dyn TickCallback,
    config: &RunnerConfig,
) -> Result<SessionResult, RunnerError> {
    let mut total_ticks: u64 = 0;
    let mut dispatched: u64 = 0;

    info!(
        max_ticks = operator.max_ticks(),
        max_real_time_seconds = operator.max_real_time_seconds(),
        tick_interval_ms = operator.tick_interval_ms(),
        stage_length_seconds = config.stage_length_seconds,
        "Session starting"
    );

    session.start_stage();
    let mut stage_started_at = clock.sample().stopwatch;

    let end_reason = loop {
        // --- Check stop request (before tick) ---
        if operator.is_stop_requested() {
            info!("Operator stop requested");
            break SessionEndReason::OperatorStop;
        }

        // --- Check time limit (before tick) ---
        if operator.time_limit_reached() {
            info!(
                max_seconds = operator.max_real_time_seconds(),
                elapsed = operator.elapsed_seconds(),
                "Real-time limit reached"
            );
            break SessionEndReason::MaxRealTimeReached;
        }

        // --- Apply pause state ---
        let paused = operator.is_paused();
        if paused != clock.is_paused() {
            info!(paused, "Game clock pause changed");
            clock.set_paused(paused);
        }

        // --- Run queued commands ---
        for command in operator.drain_commands().await {
            let name = command.name();
            match session.execute(command, host) {
                Ok(outcome) => {
                    info!(command = name, outcome = ?outcome, "Command executed");
                    if matches!(outcome, CommandOutcome::Dispatched { .. }) {
                        dispatched = dispatched.saturating_add(1);
                    }
                }
                Err(e) => warn!(command = name, error = %e, "Command failed"),
            }
        }

        // --- Stage transition ---
        let reading = clock.sample();
        if reading.stopwatch - stage_started_at >= config.stage_length_seconds {
            session.end_stage(host);
            session.start_stage();
            stage_started_at = reading.stopwatch;
        }

        // --- Execute tick ---
        if session
            .tick(reading, host)
            .is_some_and(|outcome| outcome.is_dispatched())
        {
            dispatched = dispatched.saturating_add(1);
        }
        total_ticks = total_ticks.saturating_add(1);
        callback.on_tick(&reading, session);

        // --- Check tick limit (after tick) ---
        if operator.tick_limit_reached(total_ticks) {
            info!(
                ticks = total_ticks,
                max_ticks = operator.max_ticks(),
                "Tick limit reached"
            );
            break SessionEndReason::MaxTicksReached;
        }

        // --- Sleep for tick interval, waking early on stop ---
        let interval_ms = operator.tick_interval_ms();
        if interval_ms > 0 {
            tokio::select! {
                () = tokio::time::sleep(Duration::from_millis(interval_ms)) => {}
                () = operator.stopped() => debug!("Woken by stop request"),
            }
        }
    };

    operator.set_end_reason(end_reason).await;
    let final_reading = clock.sample();
    let saved = save_snapshot(session, &final_reading, config);
    session.shutdown();
    saved?;

    Ok(SessionResult {
        end_reason,
        total_ticks,
        dispatched,
        stages: session.stage(),
        final_stopwatch: final_reading.stopwatch,
    })
}

fn save_snapshot(
    session: &ChaosSession,
    reading: &ClockReading,
    config: &RunnerConfig,
) -> Result<(), SnapshotError> {
    let Some(path) = config.save_path.as_deref() else {
        return Ok(());
    };
    if !session.role().is_authority() {
        debug!("Observers do not save scheduler state");
        return Ok(());
    }
    let snapshot = session.snapshot(reading)?;
    snapshot.write_to(Path::new(path))?;
    info!(
        path,
        dispatch_count = snapshot.dispatch_count,
        active_effects = snapshot.active_effects.len(),
        "Saved scheduler snapshot"
    );
    Ok(())
}

/// Log the session end sequence.
pub fn log_session_end(result: &SessionResult) {
    info!(
        reason = ?result.end_reason,
        total_ticks = result.total_ticks,
        dispatched = result.dispatched,
        stages = result.stages,
        final_stopwatch = result.final_stopwatch,
        "Session ended"
    );
    if result.total_ticks == 0 {
        warn!("Session ended with no ticks executed");
    }
}
