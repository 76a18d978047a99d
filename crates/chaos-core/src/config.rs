//! Configuration loading and typed config structures for the scheduler.
//!
//! The canonical configuration lives in `chaos-config.yaml`. Every
//! section is optional and falls back to the defaults below, so an empty
//! file is a valid configuration.
//!
//! Values under [`GeneralConfig`] and [`ChaosConfig::effects`] are live:
//! the session reads them on every selection, and hosts may change them
//! between ticks through [`ChaosSession::general_mut`] and
//! [`ChaosSession::settings_mut`].
//!
//! [`ChaosSession::general_mut`]: crate::session::ChaosSession::general_mut
//! [`ChaosSession::settings_mut`]: crate::session::ChaosSession::settings_mut

use std::collections::BTreeMap;
use std::path::Path;

use chaos_types::{ActivationMode, RepetitionScope, Role, VoteWinnerMode};
use serde::{Deserialize, Serialize};

/// Smallest allowed time between timer-driven activations, in seconds.
pub const MIN_TIME_BETWEEN_EFFECTS: f64 = 5.0;

/// Largest allowed per-stage effect list.
pub const MAX_PER_STAGE_LIST_SIZE: u32 = 100;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value is outside its allowed range.
    #[error("invalid config value for {field}: {reason}")]
    InvalidValue {
        /// Dotted path of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level scheduler configuration.
///
/// Mirrors the structure of `chaos-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChaosConfig {
    /// Session identity: seed and role.
    #[serde(default)]
    pub session: SessionConfig,

    /// Global scheduling switches.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Candidate pool restrictions.
    #[serde(default)]
    pub selection: SelectionConfig,

    /// Timer or vote activation.
    #[serde(default)]
    pub activation: ActivationConfig,

    /// Per-effect overrides keyed by effect identifier.
    #[serde(default)]
    pub effects: BTreeMap<String, EffectOverride>,

    /// Loop driver settings.
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ChaosConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// The `CHAOS_SEED` environment variable overrides `session.seed`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::InvalidValue`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&contents)?;
        config.session.apply_env_overrides();
        Ok(config)
    }

    /// Parse and validate configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::InvalidValue`] if a value is out of range.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let period = self.general.time_between_effects;
        if !period.is_finite() || period < MIN_TIME_BETWEEN_EFFECTS {
            return Err(ConfigError::InvalidValue {
                field: "general.time_between_effects",
                reason: format!("must be at least {MIN_TIME_BETWEEN_EFFECTS} seconds, got {period}"),
            });
        }
        let list_size = self.selection.per_stage_list_size;
        if list_size == 0 || list_size > MAX_PER_STAGE_LIST_SIZE {
            return Err(ConfigError::InvalidValue {
                field: "selection.per_stage_list_size",
                reason: format!("must be in 1..={MAX_PER_STAGE_LIST_SIZE}, got {list_size}"),
            });
        }
        if self.activation.vote_options == 0 {
            return Err(ConfigError::InvalidValue {
                field: "activation.vote_options",
                reason: String::from("must be at least 1"),
            });
        }
        let stage_length = self.runner.stage_length_seconds;
        if !stage_length.is_finite() || stage_length <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "runner.stage_length_seconds",
                reason: format!("must be positive, got {stage_length}"),
            });
        }
        for (identifier, effect) in &self.effects {
            if effect.weight.is_some_and(|w| !w.is_finite() || w < 0.0) {
                return Err(ConfigError::InvalidValue {
                    field: "effects.weight",
                    reason: format!("weight for {identifier} must be non-negative"),
                });
            }
            if effect
                .repetition_decay
                .is_some_and(|d| !(0.0..=1.0).contains(&d))
            {
                return Err(ConfigError::InvalidValue {
                    field: "effects.repetition_decay",
                    reason: format!("decay for {identifier} must be in 0..=1"),
                });
            }
        }
        Ok(())
    }
}

/// Session identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Run seed. When absent, a seed is drawn from entropy at startup.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Whether this process is the authority or an observer.
    #[serde(default)]
    pub role: Role,
}

impl SessionConfig {
    /// Apply `CHAOS_SEED` if it is set and parses as `u64`.
    pub fn apply_env_overrides(&mut self) {
        if let Some(seed) = std::env::var("CHAOS_SEED")
            .ok()
            .and_then(|value| value.trim().parse().ok())
        {
            self.seed = Some(seed);
        }
    }
}

/// Global scheduling switches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Stop the timer from dispatching anything.
    #[serde(default)]
    pub disable_dispatching: bool,

    /// Seconds between timer-driven activations.
    #[serde(default = "default_time_between_effects")]
    pub time_between_effects: f64,

    /// Seed the selection stream from the run seed. When false, the
    /// selection stream is seeded from entropy and runs are not
    /// reproducible.
    #[serde(default = "default_true")]
    pub seeded_selection: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            disable_dispatching: false,
            time_between_effects: default_time_between_effects(),
            seeded_selection: true,
        }
    }
}

/// Candidate pool restrictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Restrict timer picks each stage to a random subset of enabled effects.
    #[serde(default)]
    pub per_stage_effect_list: bool,

    /// Size of the per-stage subset.
    #[serde(default = "default_per_stage_list_size")]
    pub per_stage_list_size: u32,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            per_stage_effect_list: false,
            per_stage_list_size: default_per_stage_list_size(),
        }
    }
}

/// Activation trigger settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationConfig {
    /// Timer or vote.
    #[serde(default)]
    pub mode: ActivationMode,

    /// Number of effect options per vote.
    #[serde(default = "default_vote_options")]
    pub vote_options: u32,

    /// Append a "random effect" option to every vote.
    #[serde(default = "default_true")]
    pub include_random_option: bool,

    /// How a vote winner is chosen.
    #[serde(default)]
    pub winner_mode: VoteWinnerMode,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            mode: ActivationMode::Timer,
            vote_options: default_vote_options(),
            include_random_option: true,
            winner_mode: VoteWinnerMode::MostVotes,
        }
    }
}

/// Per-effect override. Absent fields keep the registered default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EffectOverride {
    /// Whether the effect may be selected at all.
    #[serde(default)]
    pub enabled: Option<bool>,

    /// Base selection weight.
    #[serde(default)]
    pub weight: Option<f32>,

    /// Fraction of weight lost per prior activation.
    #[serde(default)]
    pub repetition_decay: Option<f32>,

    /// Which counter drives the decay.
    #[serde(default)]
    pub repetition_scope: Option<RepetitionScope>,
}

/// Loop driver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Milliseconds between ticks.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Stop after this many ticks (0 = unlimited).
    #[serde(default)]
    pub max_ticks: u64,

    /// Stop after this many wall-clock seconds (0 = unlimited).
    #[serde(default)]
    pub max_real_time_seconds: u64,

    /// Game-clock seconds per stage.
    #[serde(default = "default_stage_length_seconds")]
    pub stage_length_seconds: f64,

    /// Where to write the scheduler snapshot on shutdown and read it on
    /// startup. No persistence when absent.
    #[serde(default)]
    pub save_path: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            max_ticks: 0,
            max_real_time_seconds: 0,
            stage_length_seconds: default_stage_length_seconds(),
            save_path: None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

const fn default_true() -> bool {
    true
}

const fn default_time_between_effects() -> f64 {
    60.0
}

const fn default_per_stage_list_size() -> u32 {
    20
}

const fn default_vote_options() -> u32 {
    3
}

const fn default_tick_interval_ms() -> u64 {
    50
}

const fn default_stage_length_seconds() -> f64 {
    300.0
}

fn default_log_level() -> String {
    String::from("info")
}
