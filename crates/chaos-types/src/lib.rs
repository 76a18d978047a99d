//! Shared type definitions for the chaos effect scheduler.
//!
//! This crate contains plain data types used by the scheduler core, the
//! engine binary, and any transport or overlay that consumes replication
//! traffic. It has no behavior beyond small helpers on the types.
//!
//! # Modules
//!
//! - [`ids`] -- Numeric identifier newtypes ([`EffectIndex`], [`DispatchId`]).
//! - [`enums`] -- Duration policies, repetition scopes, roles, clocks and
//!   vote modes.
//! - [`flags`] -- [`DispatchFlags`] and [`DispatchArgs`].
//! - [`messages`] -- Replication messages, notices and overlay views.

pub mod enums;
pub mod flags;
pub mod ids;
pub mod messages;

pub use enums::*;
pub use flags::*;
pub use ids::*;
pub use messages::*;
