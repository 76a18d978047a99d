//! Chaos engine binary.
//!
//! This is the main entry point that wires together the effect catalog,
//! the scheduler session, operator controls and persistence. It loads
//! configuration, initializes all subsystems, and runs the session loop
//! until a termination condition is met.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `chaos-config.yaml` (or `CHAOS_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Build the effect catalog from the registration table
//! 4. Read the saved snapshot, if one exists
//! 5. Create the session clock and the session, restoring the snapshot
//! 6. Create operator state, the stdin console and the Ctrl-C handler
//! 7. Run the session loop
//! 8. Log the result

mod console;
mod effects;
mod error;
mod host;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chaos_core::clock::SessionClock;
use chaos_core::config::{ChaosConfig, LoggingConfig};
use chaos_core::operator::OperatorState;
use chaos_core::registry::EffectRegistry;
use chaos_core::runner;
use chaos_core::session::ChaosSession;
use chaos_core::snapshot::SchedulerSnapshot;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::host::{LoggingHost, StatusCallback};

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "chaos-config.yaml";

/// Application entry point for the chaos engine.
///
/// # Errors
///
/// Returns an error if any initialization step or the session itself fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config_path = config_path();
    let config = load_config(&config_path)?;

    // 2. Initialize structured logging.
    init_logging(&config.logging)?;
    info!(
        config = %config_path.display(),
        seed = ?config.session.seed,
        role = ?config.session.role,
        mode = ?config.activation.mode,
        time_between_effects = config.general.time_between_effects,
        "chaos-engine starting"
    );

    // 3. Build the catalog.
    let registry = Arc::new(EffectRegistry::build(effects::REGISTRATIONS));
    info!(
        effect_count = registry.len(),
        issue_count = registry.issues().len(),
        "Effect catalog built"
    );

    // 4. Read the saved snapshot.
    let saved = load_snapshot(&config)?;

    // 5. Create the clock and the session.
    let mut clock = saved.as_ref().map_or_else(SessionClock::new, |snapshot| {
        SessionClock::starting_at(snapshot.timer.stopwatch_time)
    });
    let mut session = ChaosSession::new(registry, &config, clock.sample());
    let mut host = LoggingHost::new();
    if let Some(snapshot) = saved {
        let restored = session.restore(&snapshot, &clock.sample(), &mut host)?;
        info!(
            restored,
            dispatch_count = snapshot.dispatch_count,
            saved_at = %snapshot.saved_at,
            "Resumed from snapshot"
        );
    }
    info!(run_seed = session.run_seed(), "Session created");

    // 6. Operator state, console and Ctrl-C.
    let operator = Arc::new(OperatorState::new(&config.runner));
    let _console = console::spawn_console(Arc::clone(&operator));
    {
        let operator = Arc::clone(&operator);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Ctrl-C received");
                    operator.request_stop();
                }
                Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
            }
        });
    }

    // 7. Run the session.
    let mut callback = StatusCallback::new();
    let result = runner::run_session(
        &mut session,
        &mut clock,
        &operator,
        &mut host,
        &mut callback,
        &config.runner,
    )
    .await
    .map_err(EngineError::from)?;

    // 8. Log results.
    runner::log_session_end(&result);
    info!(
        end_reason = ?result.end_reason,
        broadcasts = host.broadcasts(),
        "chaos-engine shutdown complete"
    );

    Ok(())
}

/// Config file path: `CHAOS_CONFIG` if set, else the default.
fn config_path() -> PathBuf {
    std::env::var_os("CHAOS_CONFIG").map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

/// Load the configuration, falling back to defaults when the file is
/// missing.
fn load_config(path: &Path) -> Result<ChaosConfig, EngineError> {
    if path.exists() {
        Ok(ChaosConfig::from_file(path)?)
    } else {
        let mut config = ChaosConfig::default();
        config.session.apply_env_overrides();
        Ok(config)
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the configured
/// level.
fn init_logging(logging: &LoggingConfig) -> Result<(), EngineError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .map_err(|e| EngineError::Logging {
            message: format!("invalid log filter: {e}"),
        })?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    let installed = if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| EngineError::Logging {
        message: format!("{e}"),
    })
}

/// Read the snapshot at `runner.save_path`, if the session may resume
/// from one and the file exists.
fn load_snapshot(config: &ChaosConfig) -> Result<Option<SchedulerSnapshot>, EngineError> {
    let Some(save_path) = config.runner.save_path.as_deref() else {
        return Ok(None);
    };
    let path = Path::new(save_path);
    if !config.session.role.is_authority() {
        info!("Observers do not resume from snapshots");
        return Ok(None);
    }
    if !path.exists() {
        info!(path = save_path, "No snapshot found, starting fresh");
        return Ok(None);
    }
    Ok(Some(SchedulerSnapshot::read_from(path)?))
}
