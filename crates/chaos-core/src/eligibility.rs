//! Activation eligibility and selection weights.
//!
//! [`Eligibility`] is a read-only view over the catalog, the live
//! settings, the activation counters and the active timed effects. It
//! answers two questions for every candidate: may it start now (or at a
//! known point in the future), and how likely should it be picked.

use chaos_types::EffectIndex;
use tracing::warn;

use crate::counters::ActivationCounters;
use crate::lifecycle::TimedEffectManager;
use crate::registry::{EffectDefinition, EffectRegistry};
use crate::rng::EffectRng;
use crate::selection::WeightedSelector;
use crate::settings::EffectSettingsStore;

/// When a candidate would start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivationContext {
    /// Seconds from now until the candidate would start.
    pub delay: f64,
    /// Whether the candidate starts immediately.
    pub is_now: bool,
}

impl ActivationContext {
    /// Starting immediately.
    pub const NOW: Self = Self {
        delay: 0.0,
        is_now: true,
    };

    /// Starting `delay` seconds from now. Zero or negative means now.
    pub const fn with_delay(delay: f64) -> Self {
        if delay <= 0.0 {
            Self::NOW
        } else {
            Self {
                delay,
                is_now: false,
            }
        }
    }
}

/// Read-only eligibility view for one selection pass.
#[derive(Debug, Clone, Copy)]
pub struct Eligibility<'a> {
    registry: &'a EffectRegistry,
    settings: &'a EffectSettingsStore,
    counters: &'a ActivationCounters,
    active: &'a TimedEffectManager,
}

impl<'a> Eligibility<'a> {
    /// Assemble a view.
    pub const fn new(
        registry: &'a EffectRegistry,
        settings: &'a EffectSettingsStore,
        counters: &'a ActivationCounters,
        active: &'a TimedEffectManager,
    ) -> Self {
        Self {
            registry,
            settings,
            counters,
            active,
        }
    }

    /// Whether `effect` may start in `context`.
    ///
    /// An effect is refused when it is disabled, when one of its own
    /// predicates says no, when an incompatible effect will still be
    /// running at activation time, or when it disallows duplicates and an
    /// instance of it will still be running.
    pub fn can_activate(&self, effect: EffectIndex, context: &ActivationContext) -> bool {
        let Some(definition) = self.registry.get(effect) else {
            return false;
        };
        if !self.settings.is_enabled(effect) {
            return false;
        }
        if !definition.predicates_allow(context) {
            return false;
        }
        if definition
            .incompatible_with()
            .iter()
            .any(|other| self.active.any_instance_active(*other, context))
        {
            return false;
        }
        if !definition.allows_duplicates() && self.active.any_instance_active(effect, context) {
            return false;
        }
        true
    }

    /// Current selection weight of `effect`.
    ///
    /// `weight × (1 − decay)^count × multipliers`, where `count` is the
    /// activation count in the effect's repetition scope. Never negative.
    pub fn selection_weight(&self, effect: EffectIndex) -> f32 {
        let (Some(definition), Some(settings)) = (self.registry.get(effect), self.settings.get(effect))
        else {
            return 0.0;
        };
        let count = self.counters.get(effect, settings.repetition_scope);
        let exponent = i32::try_from(count).unwrap_or(i32::MAX);
        let decay = (1.0 - settings.repetition_decay).powi(exponent);
        let weight = settings.weight * decay * definition.weight_multiplier();
        if weight.is_finite() && weight > 0.0 {
            weight
        } else {
            0.0
        }
    }

    /// Enabled effects accepted by `keep`, weighted, ignoring activity.
    pub fn enabled_effects(&self, keep: impl Fn(EffectIndex) -> bool) -> WeightedSelector<EffectIndex> {
        let mut selector = WeightedSelector::with_capacity(self.registry.len());
        for definition in self.registry.all() {
            let index = definition.index();
            if self.settings.is_enabled(index) && keep(index) {
                selector.add_choice(index, self.selection_weight(index));
            }
        }
        selector
    }

    /// Every effect that may start in `context`, weighted.
    pub fn activatable_effects(&self, context: &ActivationContext) -> WeightedSelector<EffectIndex> {
        self.activatable_effects_where(context, |_| true)
    }

    /// Every effect accepted by `keep` that may start in `context`, weighted.
    pub fn activatable_effects_where(
        &self,
        context: &ActivationContext,
        keep: impl Fn(EffectIndex) -> bool,
    ) -> WeightedSelector<EffectIndex> {
        let mut selector = WeightedSelector::with_capacity(self.registry.len());
        for definition in self.registry.all() {
            let index = definition.index();
            if keep(index) && self.can_activate(index, context) {
                selector.add_choice(index, self.selection_weight(index));
            }
        }
        selector
    }

    /// Draw one activatable effect, falling back to the registry fallback
    /// when nothing qualifies.
    pub fn pick_activatable(
        &self,
        rng: &mut EffectRng,
        context: &ActivationContext,
        keep: impl Fn(EffectIndex) -> bool,
    ) -> EffectIndex {
        let mut candidates = self.activatable_effects_where(context, keep);
        candidates.get_and_remove_random(rng).unwrap_or_else(|| {
            warn!("No activatable effects, defaulting to nothing");
            self.registry.fallback()
        })
    }

    /// Definition lookup through the underlying registry.
    pub fn definition(&self, effect: EffectIndex) -> Option<&'a EffectDefinition> {
        self.registry.get(effect)
    }

    /// The registry's fallback effect.
    pub const fn fallback(&self) -> EffectIndex {
        self.registry.fallback()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use chaos_types::{DispatchId, DurationKind, RepetitionScope, Role};

    use super::*;
    use crate::effect::Effect;
    use crate::host::NullHost;
    use crate::lifecycle::{ActiveTimedEffect, TimedState};
    use crate::registry::EffectDescriptor;

    #[derive(Debug, Default)]
    struct LowGravity;
    impl Effect for LowGravity {}

    #[derive(Debug, Default)]
    struct HighGravity;
    impl Effect for HighGravity {}

    #[derive(Debug, Default)]
    struct Solo;
    impl Effect for Solo {}

    #[derive(Debug, Default)]
    struct Later;
    impl Effect for Later {}

    fn registry() -> EffectRegistry {
        EffectRegistry::from_descriptors([
            EffectDescriptor::new::<LowGravity>("low_gravity", "Low Gravity")
                .timed(DurationKind::FixedDuration { seconds: 30.0 }),
            EffectDescriptor::new::<HighGravity>("high_gravity", "High Gravity")
                .incompatible_with::<LowGravity>(),
            EffectDescriptor::new::<Solo>("solo", "Solo")
                .timed(DurationKind::UntilStageEnd)
                .allow_duplicates(false)
                .repetition_decay(0.5, RepetitionScope::PerRun),
            EffectDescriptor::new::<Later>("later", "Later").can_activate(|context| !context.is_now),
        ])
    }

    fn activate(
        manager: &mut TimedEffectManager,
        registry: &EffectRegistry,
        identifier: &str,
        id: u64,
    ) {
        let definition = registry.definition_by_identifier(identifier).unwrap();
        let timing = TimedState::new(definition.duration().unwrap(), None);
        manager.register(
            ActiveTimedEffect::new(
                definition,
                DispatchId(id),
                id,
                timing,
                definition.create_instance(),
            ),
            &mut NullHost,
        );
    }

    #[test]
    fn delay_context() {
        assert!(ActivationContext::with_delay(0.0).is_now);
        assert!(ActivationContext::with_delay(-1.0).is_now);
        let later = ActivationContext::with_delay(4.0);
        assert!(!later.is_now);
        assert_eq!(later.delay, 4.0);
    }

    #[test]
    fn incompatible_effect_blocks_until_it_ends() {
        let registry = registry();
        let settings = EffectSettingsStore::from_registry(&registry);
        let counters = ActivationCounters::new(registry.len());
        let mut manager = TimedEffectManager::new(Role::Authority);
        activate(&mut manager, &registry, "low_gravity", 1);
        manager.update(25.0, &mut NullHost);

        let high = registry.find_by_identifier("high_gravity").unwrap();
        let view = Eligibility::new(&registry, &settings, &counters, &manager);
        assert!(!view.can_activate(high, &ActivationContext::NOW));
        assert!(!view.can_activate(high, &ActivationContext::with_delay(4.0)));
        assert!(view.can_activate(high, &ActivationContext::with_delay(6.0)));
    }

    #[test]
    fn duplicates_blocked_when_disallowed() {
        let registry = registry();
        let settings = EffectSettingsStore::from_registry(&registry);
        let counters = ActivationCounters::new(registry.len());
        let mut manager = TimedEffectManager::new(Role::Authority);
        let solo = registry.find_by_identifier("solo").unwrap();

        let view = Eligibility::new(&registry, &settings, &counters, &manager);
        assert!(view.can_activate(solo, &ActivationContext::NOW));

        activate(&mut manager, &registry, "solo", 1);
        let view = Eligibility::new(&registry, &settings, &counters, &manager);
        assert!(!view.can_activate(solo, &ActivationContext::with_delay(1000.0)));
    }

    #[test]
    fn disabled_and_predicate_refusals() {
        let registry = registry();
        let mut settings = EffectSettingsStore::from_registry(&registry);
        let counters = ActivationCounters::new(registry.len());
        let manager = TimedEffectManager::new(Role::Authority);
        let high = registry.find_by_identifier("high_gravity").unwrap();
        let later = registry.find_by_identifier("later").unwrap();
        settings.set_enabled(high, false);

        let view = Eligibility::new(&registry, &settings, &counters, &manager);
        assert!(!view.can_activate(high, &ActivationContext::NOW));
        assert!(!view.can_activate(later, &ActivationContext::NOW));
        assert!(view.can_activate(later, &ActivationContext::with_delay(1.0)));
        assert!(!view.can_activate(EffectIndex(99), &ActivationContext::NOW));
    }

    #[test]
    fn repetition_decay_shrinks_weight() {
        let registry = registry();
        let settings = EffectSettingsStore::from_registry(&registry);
        let mut counters = ActivationCounters::new(registry.len());
        let manager = TimedEffectManager::new(Role::Authority);
        let solo = registry.find_by_identifier("solo").unwrap();

        counters.increment(solo);
        counters.increment(solo);
        counters.reset_stage();
        let view = Eligibility::new(&registry, &settings, &counters, &manager);
        assert_eq!(view.selection_weight(solo), 0.25);
    }

    #[test]
    fn pick_falls_back_to_nothing() {
        let registry = registry();
        let mut settings = EffectSettingsStore::from_registry(&registry);
        for definition in registry.all() {
            settings.set_enabled(definition.index(), false);
        }
        let counters = ActivationCounters::new(registry.len());
        let manager = TimedEffectManager::new(Role::Authority);
        let view = Eligibility::new(&registry, &settings, &counters, &manager);
        let mut rng = EffectRng::from_seed(1);
        let picked = view.pick_activatable(&mut rng, &ActivationContext::NOW, |_| true);
        assert_eq!(picked, registry.fallback());
    }

    #[test]
    fn fallback_never_wins_while_anything_else_qualifies() {
        let registry = registry();
        let settings = EffectSettingsStore::from_registry(&registry);
        let counters = ActivationCounters::new(registry.len());
        let manager = TimedEffectManager::new(Role::Authority);
        let view = Eligibility::new(&registry, &settings, &counters, &manager);
        let mut rng = EffectRng::from_seed(5);
        for _ in 0..500 {
            let picked = view.pick_activatable(&mut rng, &ActivationContext::NOW, |_| true);
            assert_ne!(picked, registry.fallback());
        }
    }
}
