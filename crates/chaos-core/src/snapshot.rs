//! Serializable scheduler state for save and resume.
//!
//! A [`SchedulerSnapshot`] holds everything needed to continue a session
//! exactly where it stopped: both random streams, the dispatch counter,
//! the timer phase, per-run activation counts and the active timed
//! effects with their remaining time. Effects are referenced by
//! identifier rather than catalog index so a save survives catalog
//! changes; unknown identifiers are skipped on restore.
//!
//! Capture and restore live on [`ChaosSession`].
//!
//! [`ChaosSession`]: crate::session::ChaosSession

use std::path::Path;

use chaos_types::DispatchId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rng::EffectRng;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Errors that can occur while reading or writing a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// Failed to read or write the snapshot file.
    #[error("snapshot I/O failed: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The snapshot is not valid JSON for this format.
    #[error("snapshot JSON is invalid: {source}")]
    Json {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },

    /// The snapshot was written by an incompatible format version.
    #[error("unsupported snapshot version {found} (expected {expected})")]
    UnsupportedVersion {
        /// Version found in the file.
        found: u32,
        /// Version this build reads.
        expected: u32,
    },

    /// Only the authority saves and restores scheduler state.
    #[error("only the authority can capture or restore scheduler state")]
    NotAuthority,
}

/// Timer phase on both clocks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimerSnapshot {
    /// Game-clock reading when the snapshot was taken.
    pub stopwatch_time: f64,
    /// Wall-clock reading when the snapshot was taken.
    pub realtime_time: f64,
    /// Last activation on the game clock.
    pub stopwatch_last_activation: f64,
    /// Last activation on the wall clock.
    pub realtime_last_activation: f64,
}

/// Per-run activation count of one effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedRunCount {
    /// Effect identifier.
    pub effect: String,
    /// Activations so far this run.
    pub count: u32,
}

/// One active timed effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedTimedEffect {
    /// Effect identifier.
    pub effect: String,
    /// Dispatch ID of the instance.
    pub dispatch_id: DispatchId,
    /// Seed of the instance's RNG branch.
    pub rng_seed: u64,
    /// Total duration for fixed-duration instances.
    pub duration: Option<f64>,
    /// Seconds left for fixed-duration instances.
    pub remaining: Option<f64>,
    /// Payload state from the effect's serialize hook.
    #[serde(default)]
    pub data: Vec<u8>,
}

impl SavedTimedEffect {
    /// How far into its duration the instance was.
    pub fn elapsed(&self) -> f64 {
        match (self.duration, self.remaining) {
            (Some(duration), Some(remaining)) => (duration - remaining).max(0.0),
            _ => 0.0,
        }
    }
}

/// Complete persisted scheduler state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    /// Format version, see [`SNAPSHOT_VERSION`].
    pub version: u32,
    /// When the snapshot was taken.
    pub saved_at: DateTime<Utc>,
    /// Instance-seed stream.
    pub effect_rng: EffectRng,
    /// Selection or vote stream of the active signaler.
    pub selection_rng: EffectRng,
    /// Last allocated dispatch ID.
    pub dispatch_count: u64,
    /// Timer phase.
    pub timer: TimerSnapshot,
    /// Per-run activation counts, only effects with a non-zero count.
    pub run_counts: Vec<SavedRunCount>,
    /// Active timed effects in registration order.
    pub active_effects: Vec<SavedTimedEffect>,
}

impl SchedulerSnapshot {
    /// Encode as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Json`] if encoding fails.
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Decode from JSON and check the format version.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Json`] for malformed input and
    /// [`SnapshotError::UnsupportedVersion`] for other format versions.
    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        let snapshot: Self = serde_json::from_str(json)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        Ok(snapshot)
    }

    /// Write to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError`] if encoding or writing fails.
    pub fn write_to(&self, path: &Path) -> Result<(), SnapshotError> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Read from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError`] if reading or decoding fails.
    pub fn read_from(path: &Path) -> Result<Self, SnapshotError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    fn snapshot() -> SchedulerSnapshot {
        SchedulerSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            effect_rng: EffectRng::from_seed(1),
            selection_rng: EffectRng::from_seed(2),
            dispatch_count: 47,
            timer: TimerSnapshot {
                stopwatch_time: 100.0,
                realtime_time: 130.0,
                stopwatch_last_activation: 60.0,
                realtime_last_activation: 120.0,
            },
            run_counts: vec![SavedRunCount {
                effect: String::from("low_gravity"),
                count: 3,
            }],
            active_effects: vec![SavedTimedEffect {
                effect: String::from("low_gravity"),
                dispatch_id: DispatchId(46),
                rng_seed: 9,
                duration: Some(30.0),
                remaining: Some(12.5),
                data: vec![1, 2, 3],
            }],
        }
    }

    #[test]
    fn json_keeps_counter_and_streams() {
        let original = snapshot();
        let mut restored = SchedulerSnapshot::from_json(&original.to_json().unwrap()).unwrap();
        let mut original_rng = original.effect_rng.clone();
        assert_eq!(restored.dispatch_count, 47);
        assert_eq!(restored.effect_rng.next_seed(), original_rng.next_seed());
        assert_eq!(restored.active_effects, original.active_effects);
        assert_eq!(restored.timer, original.timer);
    }

    #[test]
    fn other_versions_are_rejected() {
        let mut future = snapshot();
        future.version = SNAPSHOT_VERSION.saturating_add(1);
        let json = future.to_json().unwrap();
        assert!(matches!(
            SchedulerSnapshot::from_json(&json),
            Err(SnapshotError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn elapsed_from_remaining() {
        let saved = snapshot().active_effects.remove(0);
        assert_eq!(saved.elapsed(), 17.5);
        let stage_bound = SavedTimedEffect {
            duration: None,
            remaining: None,
            ..saved
        };
        assert_eq!(stage_bound.elapsed(), 0.0);
    }

    #[test]
    fn file_round_trip() {
        let path = std::env::temp_dir().join(format!("chaos-snapshot-{}.json", std::process::id()));
        snapshot().write_to(&path).unwrap();
        let restored = SchedulerSnapshot::read_from(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(restored.run_counts.len(), 1);
    }
}
