//! Effect catalog, selection, timing and lifecycle for the chaos effect
//! scheduler.
//!
//! This crate owns everything between "an effect type exists" and "an
//! instance of it is running and will end exactly once": the catalog,
//! weighted selection, eligibility, the dual-clock activation timer, the
//! dispatcher, the timed-effect lifecycle, audience votes, persistence and
//! the async loop that drives a session.
//!
//! # Modules
//!
//! - [`builtin`] -- The always-present [`Nothing`] fallback effect.
//! - [`clock`] -- [`SessionClock`], the pausable game clock plus wall clock.
//! - [`commands`] -- Debug commands parsed from text.
//! - [`config`] -- Configuration loading from `chaos-config.yaml` into
//!   strongly-typed structs.
//! - [`counters`] -- Per-stage and per-run activation counters.
//! - [`dispatcher`] -- [`EffectDispatcher`], which starts instances.
//! - [`effect`] -- The [`Effect`] payload trait and hook plumbing.
//! - [`eligibility`] -- Whether an effect may start, and its weight.
//! - [`host`] -- The [`SessionHost`] outbound trait.
//! - [`lifecycle`] -- [`TimedEffectManager`], owner of active timed effects.
//! - [`operator`] -- Shared pause/stop/speed/command state for the loop.
//! - [`registry`] -- The immutable [`EffectRegistry`] catalog.
//! - [`rng`] -- [`EffectRng`], the seedable serializable random stream.
//! - [`runner`] -- [`run_session`], the async session loop.
//! - [`selection`] -- [`WeightedSelector`], cumulative-weight picking.
//! - [`session`] -- [`ChaosSession`], the context object for one run.
//! - [`settings`] -- Live per-effect enable/weight/decay settings.
//! - [`signaler`] -- Timer and vote activation signalers.
//! - [`snapshot`] -- [`SchedulerSnapshot`] save and resume.
//! - [`timer`] -- Periodic and dual-clock timers.
//! - [`vote`] -- [`VoteSelection`], one round of audience voting.
//!
//! [`Nothing`]: builtin::Nothing
//! [`SessionClock`]: clock::SessionClock
//! [`EffectDispatcher`]: dispatcher::EffectDispatcher
//! [`Effect`]: effect::Effect
//! [`SessionHost`]: host::SessionHost
//! [`TimedEffectManager`]: lifecycle::TimedEffectManager
//! [`EffectRegistry`]: registry::EffectRegistry
//! [`EffectRng`]: rng::EffectRng
//! [`run_session`]: runner::run_session
//! [`WeightedSelector`]: selection::WeightedSelector
//! [`ChaosSession`]: session::ChaosSession
//! [`SchedulerSnapshot`]: snapshot::SchedulerSnapshot
//! [`VoteSelection`]: vote::VoteSelection

pub mod builtin;
pub mod clock;
pub mod commands;
pub mod config;
pub mod counters;
pub mod dispatcher;
pub mod effect;
pub mod eligibility;
pub mod host;
pub mod lifecycle;
pub mod operator;
pub mod registry;
pub mod rng;
pub mod runner;
pub mod selection;
pub mod session;
pub mod settings;
pub mod signaler;
pub mod snapshot;
pub mod timer;
pub mod vote;
