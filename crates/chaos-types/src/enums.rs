//! Enumeration types shared across the scheduler crates.
//!
//! All enums serialize as `snake_case` strings so they read naturally in
//! `chaos-config.yaml` and in persisted snapshots.

use serde::{Deserialize, Serialize};

/// How long a timed effect stays active once started.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DurationKind {
    /// Ends after a fixed number of seconds on the game clock.
    FixedDuration {
        /// Base duration in seconds.
        seconds: f64,
    },
    /// Ends when the current stage completes.
    UntilStageEnd,
    /// Stays active until the run ends or an operator ends it.
    Permanent,
}

impl DurationKind {
    /// Base duration in seconds, for fixed-duration effects only.
    pub const fn fixed_seconds(self) -> Option<f64> {
        match self {
            Self::FixedDuration { seconds } => Some(seconds),
            Self::UntilStageEnd | Self::Permanent => None,
        }
    }

    /// Whether this is [`DurationKind::FixedDuration`].
    pub const fn is_fixed(self) -> bool {
        matches!(self, Self::FixedDuration { .. })
    }
}

impl core::fmt::Display for DurationKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::FixedDuration { seconds } => write!(f, "fixed({seconds}s)"),
            Self::UntilStageEnd => write!(f, "until_stage_end"),
            Self::Permanent => write!(f, "permanent"),
        }
    }
}

/// Which activation counter drives repetition weight decay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepetitionScope {
    /// Decay by activations during the current stage.
    #[default]
    PerStage,
    /// Decay by activations during the whole run.
    PerRun,
}

/// Which side of the session a participant is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Runs the timer, selects and dispatches effects.
    #[default]
    Authority,
    /// Replays replicated dispatch and termination messages.
    Observer,
}

impl Role {
    /// Whether this participant is the authority.
    pub const fn is_authority(self) -> bool {
        matches!(self, Self::Authority)
    }
}

/// The two time bases the activation timer can run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockKind {
    /// Game-time clock that stops while the game is paused.
    Stopwatch,
    /// Wall-clock time that keeps running during pauses.
    Realtime,
}

/// What triggers an effect activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationMode {
    /// A periodic timer picks a weighted random effect.
    #[default]
    Timer,
    /// Viewers vote between a set of candidate effects.
    Vote,
}

/// How the winning option of a vote is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteWinnerMode {
    /// The option with the most votes wins; ties are broken at random.
    #[default]
    MostVotes,
    /// Each option wins with probability proportional to its votes.
    RandomProportional,
}
