//! Demo effect payloads and the registration table the engine builds its
//! catalog from.
//!
//! The payloads only log what they would do in a game. Parameters that
//! observers need are drawn in `on_pre_start` from the instance stream and
//! carried in the replicated state.

use chaos_core::effect::{Effect, EffectContext, HookError, HookResult};
use chaos_core::registry::{EffectDescriptor, EffectRegistration, RegisteredEffect};
use chaos_types::{DurationKind, RepetitionScope};
use rand::Rng as _;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Every effect the engine knows about.
pub const REGISTRATIONS: &[EffectRegistration] = &[
    EffectRegistration::of::<LowGravity>(),
    EffectRegistration::of::<InvertControls>(),
    EffectRegistration::of::<MirrorWorld>(),
    EffectRegistration::of::<SpawnCrowd>(),
    EffectRegistration::of::<HealAll>(),
    EffectRegistration::of::<SlowMotion>(),
    EffectRegistration::of::<Earthquake>(),
    EffectRegistration::of::<SuddenFog>(),
    EffectRegistration::of::<IncreaseEffectDuration>(),
];

fn encode<T: Serialize>(state: &T) -> Result<Vec<u8>, HookError> {
    Ok(serde_json::to_vec(state)?)
}

// ---------------------------------------------------------------------------
// Timed effects
// ---------------------------------------------------------------------------

/// Scales gravity down for a while.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LowGravity {
    gravity: f64,
}

impl Effect for LowGravity {
    fn on_pre_start(&mut self, ctx: &mut EffectContext<'_>) -> HookResult {
        self.gravity = ctx.rng.random_range(0.2..0.6);
        Ok(())
    }

    fn on_start(&mut self, ctx: &mut EffectContext<'_>) -> HookResult {
        info!(dispatch_id = %ctx.dispatch_id, gravity = self.gravity, "Gravity lowered");
        Ok(())
    }

    fn on_end(&mut self) -> HookResult {
        info!("Gravity restored");
        Ok(())
    }

    fn serialize(&self) -> Result<Vec<u8>, HookError> {
        encode(self)
    }

    fn deserialize(&mut self, data: &[u8]) -> HookResult {
        *self = serde_json::from_slice(data)?;
        Ok(())
    }
}

impl RegisteredEffect for LowGravity {
    fn descriptor() -> EffectDescriptor {
        EffectDescriptor::new::<Self>("low_gravity", "Low Gravity")
            .networked()
            .timed(DurationKind::FixedDuration { seconds: 30.0 })
    }
}

/// Swaps left and right input.
#[derive(Debug, Default)]
pub struct InvertControls;

impl Effect for InvertControls {
    fn on_start(&mut self, _ctx: &mut EffectContext<'_>) -> HookResult {
        info!("Controls inverted");
        Ok(())
    }

    fn on_end(&mut self) -> HookResult {
        info!("Controls restored");
        Ok(())
    }
}

impl RegisteredEffect for InvertControls {
    fn descriptor() -> EffectDescriptor {
        EffectDescriptor::new::<Self>("invert_controls", "Invert Controls")
            .networked()
            .timed(DurationKind::FixedDuration { seconds: 20.0 })
            .allow_duplicates(false)
            .incompatible_with::<MirrorWorld>()
    }
}

/// Flips the screen horizontally. Stacked with inverted controls it
/// cancels out, so the two exclude each other.
#[derive(Debug, Default)]
pub struct MirrorWorld;

impl Effect for MirrorWorld {
    fn on_start(&mut self, _ctx: &mut EffectContext<'_>) -> HookResult {
        info!("World mirrored");
        Ok(())
    }

    fn on_end(&mut self) -> HookResult {
        info!("World unmirrored");
        Ok(())
    }
}

impl RegisteredEffect for MirrorWorld {
    fn descriptor() -> EffectDescriptor {
        EffectDescriptor::new::<Self>("mirror_world", "Mirror World")
            .networked()
            .timed(DurationKind::FixedDuration { seconds: 25.0 })
            .allow_duplicates(false)
            .incompatible_with::<InvertControls>()
    }
}

/// Halves game speed. Timed effects dispatched while it runs last longer.
#[derive(Debug, Default)]
pub struct SlowMotion;

impl Effect for SlowMotion {
    fn on_start(&mut self, _ctx: &mut EffectContext<'_>) -> HookResult {
        info!("Slow motion started");
        Ok(())
    }

    fn on_end(&mut self) -> HookResult {
        info!("Slow motion ended");
        Ok(())
    }

    fn duration_multiplier(&self) -> f64 {
        1.5
    }
}

impl RegisteredEffect for SlowMotion {
    fn descriptor() -> EffectDescriptor {
        EffectDescriptor::new::<Self>("slow_motion", "Slow Motion")
            .networked()
            .timed(DurationKind::FixedDuration { seconds: 40.0 })
            .allow_duplicates(false)
            .ignore_duration_modifiers()
            .weight(0.7)
    }
}

/// Shakes the camera until the stage is over.
#[derive(Debug, Default)]
pub struct Earthquake;

impl Effect for Earthquake {
    fn on_start(&mut self, _ctx: &mut EffectContext<'_>) -> HookResult {
        info!("Earthquake started");
        Ok(())
    }

    fn on_end(&mut self) -> HookResult {
        info!("Earthquake settled");
        Ok(())
    }
}

impl RegisteredEffect for Earthquake {
    fn descriptor() -> EffectDescriptor {
        EffectDescriptor::new::<Self>("earthquake", "Earthquake")
            .networked()
            .timed(DurationKind::UntilStageEnd)
            .allow_duplicates(false)
            .weight(0.5)
    }
}

/// A short burst of fog. Only offered when it would start soon.
#[derive(Debug, Default)]
pub struct SuddenFog;

impl Effect for SuddenFog {
    fn on_start(&mut self, _ctx: &mut EffectContext<'_>) -> HookResult {
        info!("Fog rolled in");
        Ok(())
    }

    fn on_end(&mut self) -> HookResult {
        info!("Fog lifted");
        Ok(())
    }
}

impl RegisteredEffect for SuddenFog {
    fn descriptor() -> EffectDescriptor {
        EffectDescriptor::new::<Self>("sudden_fog", "Sudden Fog")
            .networked()
            .timed(DurationKind::FixedDuration { seconds: 10.0 })
            .can_activate(|context| context.delay < 30.0)
    }
}

// ---------------------------------------------------------------------------
// Instant effects
// ---------------------------------------------------------------------------

/// Spawns a crowd of bystanders next to the player.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SpawnCrowd {
    count: u32,
}

impl Effect for SpawnCrowd {
    fn on_pre_start(&mut self, ctx: &mut EffectContext<'_>) -> HookResult {
        self.count = ctx.rng.random_range(3..=8);
        Ok(())
    }

    fn on_start(&mut self, _ctx: &mut EffectContext<'_>) -> HookResult {
        info!(count = self.count, "Crowd spawned");
        Ok(())
    }

    fn serialize(&self) -> Result<Vec<u8>, HookError> {
        encode(self)
    }

    fn deserialize(&mut self, data: &[u8]) -> HookResult {
        *self = serde_json::from_slice(data)?;
        Ok(())
    }
}

impl RegisteredEffect for SpawnCrowd {
    fn descriptor() -> EffectDescriptor {
        EffectDescriptor::new::<Self>("spawn_crowd", "Spawn Crowd")
            .networked()
            .weight(0.8)
    }
}

/// Restores everyone to full health. Gets rarer each time in a stage.
#[derive(Debug, Default)]
pub struct HealAll;

impl Effect for HealAll {
    fn on_start(&mut self, _ctx: &mut EffectContext<'_>) -> HookResult {
        info!("Everyone healed");
        Ok(())
    }
}

impl RegisteredEffect for HealAll {
    fn descriptor() -> EffectDescriptor {
        EffectDescriptor::new::<Self>("heal_all", "Heal All")
            .networked()
            .repetition_decay(0.5, RepetitionScope::PerStage)
    }
}

/// Extends every active fixed-duration effect.
#[derive(Debug, Default)]
pub struct IncreaseEffectDuration;

/// Factor applied to the remaining effects' total duration.
const DURATION_INCREASE: f64 = 1.5;

impl Effect for IncreaseEffectDuration {
    fn on_start(&mut self, ctx: &mut EffectContext<'_>) -> HookResult {
        let mut extended: u32 = 0;
        for active in ctx.active_effects.iter_mut() {
            if active.ignores_duration_modifiers() || !active.timing().kind.is_fixed() {
                continue;
            }
            active.timing_mut().scale_duration(DURATION_INCREASE);
            extended = extended.saturating_add(1);
        }
        info!(extended, factor = DURATION_INCREASE, "Extended active effects");
        Ok(())
    }
}

impl RegisteredEffect for IncreaseEffectDuration {
    fn descriptor() -> EffectDescriptor {
        EffectDescriptor::new::<Self>("increase_effect_duration", "Increase Effect Duration")
            .networked()
            .weight(0.4)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use std::sync::Arc;

    use chaos_core::config::ChaosConfig;
    use chaos_core::host::RecordingHost;
    use chaos_core::lifecycle::TimedEffectManager;
    use chaos_core::registry::EffectRegistry;
    use chaos_core::rng::EffectRng;
    use chaos_core::session::ChaosSession;
    use chaos_core::timer::ClockReading;
    use chaos_types::{DispatchId, Role};

    use super::*;

    #[test]
    fn registration_table_builds_a_clean_catalog() {
        let registry = EffectRegistry::build(REGISTRATIONS);
        assert!(registry.issues().is_empty(), "{:?}", registry.issues());
        // Every registration plus the built-in fallback.
        assert_eq!(registry.len(), REGISTRATIONS.len() + 1);
        assert!(registry.find_by_identifier("LOW_GRAVITY").is_some());
        let invert = registry.definition_by_identifier("invert_controls").unwrap();
        let mirror = registry.find_by_identifier("mirror_world").unwrap();
        assert_eq!(invert.incompatible_with(), &[mirror]);
    }

    #[test]
    fn low_gravity_state_survives_encoding() {
        let mut rng = EffectRng::from_seed(3);
        let mut active = TimedEffectManager::new(Role::Authority);
        let mut payload = LowGravity::default();
        let mut ctx = EffectContext {
            dispatch_id: DispatchId(1),
            rng: &mut rng,
            active_effects: &mut active,
        };
        payload.on_pre_start(&mut ctx).unwrap();
        assert!((0.2..0.6).contains(&payload.gravity));

        let mut copy = LowGravity::default();
        Effect::deserialize(&mut copy, &Effect::serialize(&payload).unwrap()).unwrap();
        assert_eq!(copy.gravity, payload.gravity);
    }

    #[test]
    fn spawn_crowd_count_is_in_range() {
        let mut rng = EffectRng::from_seed(11);
        let mut active = TimedEffectManager::new(Role::Authority);
        for _ in 0..50 {
            let mut payload = SpawnCrowd::default();
            let mut ctx = EffectContext {
                dispatch_id: DispatchId(1),
                rng: &mut rng,
                active_effects: &mut active,
            };
            payload.on_pre_start(&mut ctx).unwrap();
            assert!((3..=8).contains(&payload.count));
        }
    }

    #[test]
    fn increase_effect_duration_extends_fixed_effects_only() {
        let mut config = ChaosConfig::default();
        config.session.seed = Some(5);
        config.session.role = Role::Authority;
        let registry = Arc::new(EffectRegistry::build(REGISTRATIONS));
        let mut session = ChaosSession::new(registry, &config, ClockReading::running(0.0));
        let mut host = RecordingHost::new();

        session.execute_line("force-dispatch low_gravity", &mut host).unwrap();
        session.execute_line("force-dispatch slow_motion", &mut host).unwrap();
        session.execute_line("force-dispatch earthquake", &mut host).unwrap();
        session
            .execute_line("force-dispatch increase_effect_duration", &mut host)
            .unwrap();

        let gravity = session.active_effects().get(DispatchId(1)).unwrap();
        assert_eq!(gravity.timing().duration, Some(45.0));
        let slow = session.active_effects().get(DispatchId(2)).unwrap();
        assert_eq!(slow.timing().duration, Some(40.0));
        let quake = session.active_effects().get(DispatchId(3)).unwrap();
        assert_eq!(quake.timing().duration, None);
    }
}
