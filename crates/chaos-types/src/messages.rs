//! Replication messages, user-visible notices and overlay views.
//!
//! The authority sends [`ReplicationMessage`]s to every observer. The
//! concrete byte encoding is left to the transport; these types only fix
//! the fields and their meaning.

use serde::{Deserialize, Serialize};

use crate::enums::DurationKind;
use crate::flags::DispatchFlags;
use crate::ids::DispatchId;

/// The serialized state of one effect instance.
///
/// The header fields are written by the scheduler; `data` is whatever the
/// effect payload chose to serialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedEffect {
    /// Dispatch ID assigned by the authority.
    pub dispatch_id: DispatchId,
    /// Seed of the per-instance RNG branch.
    pub rng_seed: u64,
    /// Final duration in seconds for fixed-duration effects, after
    /// duration multipliers were applied.
    pub duration: Option<f64>,
    /// Payload-specific bytes.
    pub data: Vec<u8>,
}

/// Sent once per networked dispatch, before the start hook runs anywhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectDispatched {
    /// Case-insensitive identifier of the dispatched effect.
    pub effect_identifier: String,
    /// Flags the authority dispatched with.
    pub flags: DispatchFlags,
    /// Seed override the authority dispatched with, if any.
    pub override_seed: Option<u64>,
    /// Serialized instance state.
    pub instance: SerializedEffect,
}

/// Sent once per networked timed effect, after its end hook ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectEnded {
    /// Dispatch ID of the instance that ended.
    pub dispatch_id: DispatchId,
}

/// Authority-to-observer replication traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ReplicationMessage {
    /// An effect was dispatched.
    EffectDispatched(EffectDispatched),
    /// A timed effect ended.
    EffectEnded(EffectEnded),
}

impl ReplicationMessage {
    /// Dispatch ID the message refers to.
    pub const fn dispatch_id(&self) -> DispatchId {
        match self {
            Self::EffectDispatched(msg) => msg.instance.dispatch_id,
            Self::EffectEnded(msg) => msg.dispatch_id,
        }
    }
}

/// A user-visible chat notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Notice {
    /// An effect is being activated.
    EffectActivated {
        /// Display name of the effect.
        display_name: String,
    },
    /// An effect hook failed; the dispatch continued.
    EffectFailed {
        /// Display name of the effect.
        display_name: String,
    },
    /// A forced activation was rejected because the effect is ineligible.
    CannotActivate {
        /// Display name of the effect.
        display_name: String,
    },
}

/// What the overlay needs to show about one active timed effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveEffectInfo {
    /// Dispatch ID of the instance.
    pub dispatch_id: DispatchId,
    /// Effect identifier.
    pub identifier: String,
    /// Effect display name.
    pub display_name: String,
    /// Duration policy.
    pub duration: DurationKind,
    /// Seconds left for fixed-duration effects.
    pub remaining_seconds: Option<f64>,
}
