//! Effects the scheduler always provides.

use crate::effect::Effect;
use crate::registry::{EffectDescriptor, FALLBACK_IDENTIFIER, RegisteredEffect};

/// The always-available fallback effect. Does nothing.
///
/// Picked whenever a selection comes up empty. Its default weight is zero,
/// so it is never chosen on its own merits unless configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct Nothing;

impl Effect for Nothing {}

impl RegisteredEffect for Nothing {
    fn descriptor() -> EffectDescriptor {
        EffectDescriptor::new::<Self>(FALLBACK_IDENTIFIER, "Nothing").weight(0.0)
    }
}
