//! Debug command surface.
//!
//! Commands arrive as text (from a console, a chat bridge or the operator
//! queue), are parsed into a [`ChaosCommand`] and executed by
//! [`ChaosSession::execute`]. Every command requires the authority role.
//!
//! | Command                          | Effect                                   |
//! |----------------------------------|------------------------------------------|
//! | `force-dispatch <id> [seed]`     | Dispatch a named effect, validated       |
//! | `force-dispatch-random`          | Dispatch a weighted random pick          |
//! | `end-all-active-effects`         | End every active timed effect            |
//! | `skip-scheduled`                 | Consume due timer activations            |
//! | `rewind <seconds>`               | Move the timer phase back                |
//!
//! [`ChaosSession::execute`]: crate::session::ChaosSession::execute

use core::str::FromStr;

use chaos_types::{DispatchId, EffectIndex};
use serde::{Deserialize, Serialize};

/// A parsed debug command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "command")]
pub enum ChaosCommand {
    /// Dispatch the named effect, skipping the counters.
    ForceDispatch {
        /// Case-insensitive effect identifier.
        identifier: String,
        /// Instance seed to use instead of drawing one.
        seed: Option<u64>,
    },
    /// Dispatch a weighted random activatable effect.
    ForceDispatchRandom,
    /// End every active timed effect.
    EndAllActiveEffects,
    /// Consume every due timer activation without dispatching.
    SkipScheduled,
    /// Move the timer phase back by a number of seconds.
    Rewind {
        /// Seconds to rewind.
        seconds: f64,
    },
}

impl ChaosCommand {
    /// The command word as typed.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ForceDispatch { .. } => "force-dispatch",
            Self::ForceDispatchRandom => "force-dispatch-random",
            Self::EndAllActiveEffects => "end-all-active-effects",
            Self::SkipScheduled => "skip-scheduled",
            Self::Rewind { .. } => "rewind",
        }
    }
}

impl FromStr for ChaosCommand {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Err(CommandError::Empty);
        };
        let command = match name.to_ascii_lowercase().as_str() {
            "force-dispatch" => {
                let identifier = words
                    .next()
                    .ok_or(CommandError::MissingArgument {
                        command: "force-dispatch",
                        argument: "identifier",
                    })?
                    .to_owned();
                let seed = words
                    .next()
                    .map(|raw| {
                        raw.parse::<u64>()
                            .ok()
                            .ok_or_else(|| CommandError::InvalidArgument {
                                command: "force-dispatch",
                                value: raw.to_owned(),
                            })
                    })
                    .transpose()?;
                Self::ForceDispatch { identifier, seed }
            }
            "force-dispatch-random" => Self::ForceDispatchRandom,
            "end-all-active-effects" => Self::EndAllActiveEffects,
            "skip-scheduled" => Self::SkipScheduled,
            "rewind" => {
                let raw = words.next().ok_or(CommandError::MissingArgument {
                    command: "rewind",
                    argument: "seconds",
                })?;
                let seconds = raw
                    .parse::<f64>()
                    .ok()
                    .filter(|s| s.is_finite() && *s >= 0.0)
                    .ok_or_else(|| CommandError::InvalidArgument {
                        command: "rewind",
                        value: raw.to_owned(),
                    })?;
                Self::Rewind { seconds }
            }
            other => {
                return Err(CommandError::UnknownCommand {
                    name: other.to_owned(),
                });
            }
        };
        if let Some(extra) = words.next() {
            return Err(CommandError::InvalidArgument {
                command: command.name(),
                value: extra.to_owned(),
            });
        }
        Ok(command)
    }
}

/// Errors from parsing or executing a command.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    /// The line was blank.
    #[error("empty command")]
    Empty,

    /// The command word is not known.
    #[error("unknown command: {name}")]
    UnknownCommand {
        /// The word that was typed.
        name: String,
    },

    /// A required argument was not given.
    #[error("{command}: missing argument <{argument}>")]
    MissingArgument {
        /// Command being parsed.
        command: &'static str,
        /// Name of the missing argument.
        argument: &'static str,
    },

    /// An argument did not parse.
    #[error("{command}: invalid argument {value:?}")]
    InvalidArgument {
        /// Command being parsed.
        command: &'static str,
        /// The offending text.
        value: String,
    },

    /// Only the authority can run commands.
    #[error("commands can only be run on the authority")]
    NotAuthority,

    /// No effect has the given identifier.
    #[error("no effect named {identifier:?}")]
    UnknownEffect {
        /// The identifier that was looked up.
        identifier: String,
    },

    /// The effect exists but cannot start right now.
    #[error("{identifier} cannot be activated right now")]
    Ineligible {
        /// The identifier that was refused.
        identifier: String,
    },

    /// The dispatcher refused for another reason.
    #[error("dispatch rejected: {reason}")]
    Rejected {
        /// Why the dispatcher refused.
        reason: String,
    },
}

/// What an executed command did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommandOutcome {
    /// An effect was dispatched.
    Dispatched {
        /// The dispatched effect.
        effect: EffectIndex,
        /// Its dispatch ID.
        dispatch_id: DispatchId,
    },
    /// Active timed effects were ended.
    Ended {
        /// How many instances ended.
        count: usize,
    },
    /// Due timer activations were consumed.
    Skipped {
        /// How many activations were skipped.
        count: u32,
    },
    /// The timer phase moved back.
    Rewound {
        /// Seconds rewound.
        seconds: f64,
    },
}
