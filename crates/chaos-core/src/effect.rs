//! The effect payload contract.
//!
//! Every effect is a type implementing [`Effect`]. The scheduler owns the
//! instance for its whole lifetime and calls its hooks at fixed points:
//!
//! 1. `on_pre_start` on the authority, before the instance is replicated.
//! 2. `serialize` on the authority for networked effects.
//! 3. `deserialize` on observers and when restoring a save.
//! 4. `on_start` everywhere the instance runs.
//! 5. `on_end` exactly once, when the instance is torn down.
//!
//! Hooks return [`HookResult`]. A failing or panicking hook is logged with
//! the effect identifier and the hook name, then the scheduler carries on.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use chaos_types::DispatchId;
use tracing::error;

use crate::lifecycle::TimedEffectManager;
use crate::rng::EffectRng;

/// Errors an effect hook can report.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// The hook decided it could not complete.
    #[error("{message}")]
    Failed {
        /// Human-readable failure description.
        message: String,
    },

    /// Encoding or decoding the payload state failed.
    #[error("payload encoding failed: {source}")]
    Encoding {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },

    /// The hook panicked.
    #[error("hook panicked: {message}")]
    Panicked {
        /// The panic message, if it was a string.
        message: String,
    },
}

impl HookError {
    /// Build a [`HookError::Failed`] from any message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// Result type returned by effect hooks.
pub type HookResult = Result<(), HookError>;

/// Which hook is being invoked, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    /// [`Effect::on_pre_start`].
    PreStart,
    /// [`Effect::on_start`].
    Start,
    /// [`Effect::on_end`].
    End,
    /// [`Effect::serialize`].
    Serialize,
    /// [`Effect::deserialize`].
    Deserialize,
}

impl core::fmt::Display for HookKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::PreStart => "on_pre_start",
            Self::Start => "on_start",
            Self::End => "on_end",
            Self::Serialize => "serialize",
            Self::Deserialize => "deserialize",
        };
        f.write_str(name)
    }
}

/// What a start hook can reach while it runs.
pub struct EffectContext<'a> {
    /// Dispatch ID of the instance being started.
    pub dispatch_id: DispatchId,
    /// The instance's own RNG branch. Seeded identically on every
    /// participant, so draws made here agree across the session.
    pub rng: &'a mut EffectRng,
    /// The other active timed effects, for effects that modify their peers.
    pub active_effects: &'a mut TimedEffectManager,
}

/// Upcast support so active instances can be queried by concrete type.
pub trait AsAny: Any {
    /// Borrow as [`Any`].
    fn as_any(&self) -> &dyn Any;
    /// Mutably borrow as [`Any`].
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A gameplay-modifying effect payload.
///
/// All hooks have no-op defaults, so a payload only implements what it
/// needs.
pub trait Effect: AsAny + Send {
    /// Authority-only preparation before the instance is replicated.
    /// Draw random parameters here so they can be serialized.
    fn on_pre_start(&mut self, ctx: &mut EffectContext<'_>) -> HookResult {
        let _ = ctx;
        Ok(())
    }

    /// Apply the effect.
    fn on_start(&mut self, ctx: &mut EffectContext<'_>) -> HookResult {
        let _ = ctx;
        Ok(())
    }

    /// Undo the effect. Runs exactly once per instance.
    fn on_end(&mut self) -> HookResult {
        Ok(())
    }

    /// Encode the state observers need to reproduce this instance.
    fn serialize(&self) -> Result<Vec<u8>, HookError> {
        Ok(Vec::new())
    }

    /// Decode state produced by [`Effect::serialize`].
    fn deserialize(&mut self, data: &[u8]) -> HookResult {
        let _ = data;
        Ok(())
    }

    /// Factor applied to the duration of timed effects dispatched while
    /// this instance is active.
    fn duration_multiplier(&self) -> f64 {
        1.0
    }
}

impl dyn Effect {
    /// Downcast to a concrete payload type.
    pub fn downcast_ref<T: Effect>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Mutably downcast to a concrete payload type.
    pub fn downcast_mut<T: Effect>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

/// Run one hook, converting panics into [`HookError::Panicked`] and
/// logging any failure.
pub(crate) fn invoke_hook<T>(
    identifier: &str,
    hook: HookKind,
    f: impl FnOnce() -> Result<T, HookError>,
) -> Result<T, HookError> {
    let result = match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(panic) => Err(HookError::Panicked {
            message: panic_message(&*panic),
        }),
    };
    if let Err(ref e) = result {
        error!(effect = identifier, hook = %hook, error = %e, "Effect hook failed");
    }
    result
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| String::from("non-string panic payload"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Marker {
        value: u32,
    }

    impl Effect for Marker {}

    #[test]
    fn downcast_through_trait_object() {
        let mut boxed: Box<dyn Effect> = Box::new(Marker { value: 3 });
        assert_eq!(boxed.downcast_ref::<Marker>().unwrap().value, 3);
        boxed.downcast_mut::<Marker>().unwrap().value = 4;
        assert_eq!(boxed.downcast_ref::<Marker>().unwrap().value, 4);
    }

    #[test]
    fn invoke_hook_passes_success_through() {
        let result = invoke_hook("marker", HookKind::Start, || Ok(5));
        assert_eq!(result.unwrap(), 5);
    }

    #[test]
    fn invoke_hook_reports_failure() {
        let result: Result<(), HookError> =
            invoke_hook("marker", HookKind::End, || Err(HookError::failed("boom")));
        assert!(matches!(result, Err(HookError::Failed { .. })));
    }

    #[test]
    fn invoke_hook_catches_panics() {
        let result: Result<(), HookError> =
            invoke_hook("marker", HookKind::Start, || panic!("exploded"));
        match result {
            Err(HookError::Panicked { message }) => assert_eq!(message, "exploded"),
            other => panic!("expected panic error, got {other:?}"),
        }
    }

    #[test]
    fn hook_kind_display_names() {
        assert_eq!(HookKind::PreStart.to_string(), "on_pre_start");
        assert_eq!(HookKind::Deserialize.to_string(), "deserialize");
    }
}
