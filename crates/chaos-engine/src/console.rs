//! Operator console on stdin.
//!
//! Each line is either a loop control word or a scheduler debug command,
//! which is queued on the [`OperatorState`] and executed between ticks.
//!
//! | Line                | Action                               |
//! |---------------------|--------------------------------------|
//! | `pause`             | Pause the game clock                 |
//! | `resume`            | Resume the game clock                |
//! | `speed <ms>`        | Set the tick interval                |
//! | `stop`              | End the session cleanly              |
//! | anything else       | Parsed as a debug command and queued |

use core::str::FromStr;
use std::sync::Arc;

use chaos_core::commands::{ChaosCommand, CommandError};
use chaos_core::operator::OperatorState;
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// One parsed console line.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    /// Pause the game clock.
    Pause,
    /// Resume the game clock.
    Resume,
    /// Change the tick interval.
    Speed {
        /// New interval in milliseconds.
        tick_interval_ms: u64,
    },
    /// Stop the session.
    Stop,
    /// A scheduler debug command.
    Chaos(ChaosCommand),
}

impl FromStr for ConsoleCommand {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let first = words.next().map(str::to_ascii_lowercase);
        let command = match first.as_deref() {
            Some("pause") => Self::Pause,
            Some("resume") => Self::Resume,
            Some("stop") => Self::Stop,
            Some("speed") => {
                let raw = words.next().ok_or(CommandError::MissingArgument {
                    command: "speed",
                    argument: "ms",
                })?;
                let tick_interval_ms =
                    raw.parse::<u64>()
                        .ok()
                        .ok_or_else(|| CommandError::InvalidArgument {
                            command: "speed",
                            value: raw.to_owned(),
                        })?;
                Self::Speed { tick_interval_ms }
            }
            _ => return line.parse().map(Self::Chaos),
        };
        if let Some(extra) = words.next() {
            return Err(CommandError::InvalidArgument {
                command: "console",
                value: extra.to_owned(),
            });
        }
        Ok(command)
    }
}

/// Apply one console command to the operator state.
pub async fn apply(operator: &OperatorState, command: ConsoleCommand) {
    match command {
        ConsoleCommand::Pause => {
            operator.pause();
            info!("Paused");
        }
        ConsoleCommand::Resume => {
            operator.resume();
            info!("Resumed");
        }
        ConsoleCommand::Speed { tick_interval_ms } => {
            match operator.set_tick_interval_ms(tick_interval_ms) {
                Some(previous) => info!(previous, tick_interval_ms, "Tick interval changed"),
                None => warn!(tick_interval_ms, "Tick interval too small"),
            }
        }
        ConsoleCommand::Stop => {
            info!("Stop requested");
            operator.request_stop();
        }
        ConsoleCommand::Chaos(chaos) => {
            info!(command = chaos.name(), "Queued command");
            operator.queue_command(chaos).await;
        }
    }
}

/// Read stdin lines until EOF, applying each to `operator`.
pub fn spawn_console(operator: Arc<OperatorState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match line.parse::<ConsoleCommand>() {
                        Ok(command) => apply(&operator, command).await,
                        Err(e) => warn!(error = %e, "Ignoring console line"),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Console input failed");
                    break;
                }
            }
        }
    })
}
