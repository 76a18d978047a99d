//! Live-tunable per-effect settings.
//!
//! Registered defaults seed the store; configuration overrides are layered
//! on top. The selection pipeline reads these values fresh every time it
//! builds a candidate set, so a change made between ticks takes effect on
//! the next selection without any notification plumbing.

use std::collections::BTreeMap;

use chaos_types::{EffectIndex, RepetitionScope};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::EffectOverride;
use crate::registry::EffectRegistry;

/// Current tunable values for one effect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectSettings {
    /// Whether the effect may be selected.
    pub enabled: bool,
    /// Base selection weight, never negative.
    pub weight: f32,
    /// Fraction of weight lost per prior activation, in `[0, 1]`.
    pub repetition_decay: f32,
    /// Which counter drives the decay.
    pub repetition_scope: RepetitionScope,
}

impl EffectSettings {
    /// Layer an override on top of these values.
    pub fn apply(&mut self, effect_override: &EffectOverride) {
        if let Some(enabled) = effect_override.enabled {
            self.enabled = enabled;
        }
        if let Some(weight) = effect_override.weight {
            self.weight = sanitize_weight(weight);
        }
        if let Some(decay) = effect_override.repetition_decay {
            self.repetition_decay = sanitize_decay(decay);
        }
        if let Some(scope) = effect_override.repetition_scope {
            self.repetition_scope = scope;
        }
    }
}

/// Settings for every effect in the catalog, indexed by [`EffectIndex`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectSettingsStore {
    settings: Vec<EffectSettings>,
}

impl EffectSettingsStore {
    /// Registered defaults for every effect.
    pub fn from_registry(registry: &EffectRegistry) -> Self {
        let settings = registry
            .all()
            .map(|definition| EffectSettings {
                enabled: true,
                weight: sanitize_weight(definition.default_weight()),
                repetition_decay: sanitize_decay(definition.default_repetition_decay()),
                repetition_scope: definition.default_repetition_scope(),
            })
            .collect();
        Self { settings }
    }

    /// Registered defaults with configuration overrides applied.
    ///
    /// Overrides naming an unknown identifier are logged and ignored.
    pub fn with_overrides(
        registry: &EffectRegistry,
        overrides: &BTreeMap<String, EffectOverride>,
    ) -> Self {
        let mut store = Self::from_registry(registry);
        store.apply_overrides(registry, overrides);
        store
    }

    /// Apply configuration overrides by identifier.
    pub fn apply_overrides(
        &mut self,
        registry: &EffectRegistry,
        overrides: &BTreeMap<String, EffectOverride>,
    ) {
        for (identifier, effect_override) in overrides {
            let Some(index) = registry.find_by_identifier(identifier) else {
                warn!(effect = identifier.as_str(), "Config override for unknown effect");
                continue;
            };
            if let Some(settings) = self.settings.get_mut(index.as_usize()) {
                settings.apply(effect_override);
            }
        }
    }

    /// Current settings for `effect`.
    pub fn get(&self, effect: EffectIndex) -> Option<&EffectSettings> {
        self.settings.get(effect.as_usize())
    }

    /// Mutable settings for `effect`.
    pub fn get_mut(&mut self, effect: EffectIndex) -> Option<&mut EffectSettings> {
        self.settings.get_mut(effect.as_usize())
    }

    /// Whether `effect` is enabled. Unknown effects are disabled.
    pub fn is_enabled(&self, effect: EffectIndex) -> bool {
        self.get(effect).is_some_and(|settings| settings.enabled)
    }

    /// Enable or disable `effect`. Returns false for unknown effects.
    pub fn set_enabled(&mut self, effect: EffectIndex, enabled: bool) -> bool {
        self.get_mut(effect)
            .map(|settings| settings.enabled = enabled)
            .is_some()
    }

    /// Set the base weight of `effect`. Negative and non-finite values are
    /// stored as zero. Returns false for unknown effects.
    pub fn set_weight(&mut self, effect: EffectIndex, weight: f32) -> bool {
        self.get_mut(effect)
            .map(|settings| settings.weight = sanitize_weight(weight))
            .is_some()
    }

    /// Number of entries.
    pub const fn len(&self) -> usize {
        self.settings.len()
    }

    /// Whether the store has no entries.
    pub const fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }
}

const fn sanitize_weight(weight: f32) -> f32 {
    if weight.is_finite() && weight > 0.0 {
        weight
    } else {
        0.0
    }
}

fn sanitize_decay(decay: f32) -> f32 {
    if decay.is_nan() {
        0.0
    } else {
        decay.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::effect::Effect;
    use crate::registry::EffectDescriptor;

    #[derive(Debug, Default)]
    struct Alpha;
    impl Effect for Alpha {}

    fn registry() -> EffectRegistry {
        EffectRegistry::from_descriptors([EffectDescriptor::new::<Alpha>("alpha", "Alpha")
            .weight(2.0)
            .repetition_decay(0.25, RepetitionScope::PerRun)])
    }

    #[test]
    fn defaults_come_from_registry() {
        let registry = registry();
        let store = EffectSettingsStore::from_registry(&registry);
        let alpha = store.get(EffectIndex(0)).unwrap();
        assert!(alpha.enabled);
        assert_eq!(alpha.weight, 2.0);
        assert_eq!(alpha.repetition_decay, 0.25);
        assert_eq!(alpha.repetition_scope, RepetitionScope::PerRun);
        assert_eq!(store.len(), registry.len());
    }

    #[test]
    fn overrides_apply_by_identifier() {
        let registry = registry();
        let mut overrides = BTreeMap::new();
        overrides.insert(
            String::from("ALPHA"),
            EffectOverride {
                enabled: Some(false),
                weight: Some(0.5),
                ..EffectOverride::default()
            },
        );
        overrides.insert(String::from("ghost"), EffectOverride::default());
        let store = EffectSettingsStore::with_overrides(&registry, &overrides);
        let alpha = store.get(EffectIndex(0)).unwrap();
        assert!(!alpha.enabled);
        assert_eq!(alpha.weight, 0.5);
        assert_eq!(alpha.repetition_decay, 0.25);
    }

    #[test]
    fn live_updates_are_sanitized() {
        let registry = registry();
        let mut store = EffectSettingsStore::from_registry(&registry);
        assert!(store.set_weight(EffectIndex(0), -3.0));
        assert_eq!(store.get(EffectIndex(0)).unwrap().weight, 0.0);
        assert!(store.set_enabled(EffectIndex(0), false));
        assert!(!store.is_enabled(EffectIndex(0)));
        assert!(!store.set_enabled(EffectIndex(42), true));
        assert!(!store.is_enabled(EffectIndex(42)));
    }
}
