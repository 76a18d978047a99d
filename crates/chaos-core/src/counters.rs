//! Per-effect activation counters.
//!
//! Two counters per effect: one for the current stage and one for the
//! whole run. Both drive repetition weight decay. Only the dispatcher
//! increments them, and only after a dispatch succeeded.

use chaos_types::{EffectIndex, RepetitionScope};
use serde::{Deserialize, Serialize};

/// Activation counts for one effect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationCounter {
    /// Activations since the run started.
    pub run: u32,
    /// Activations since the current stage started.
    pub stage: u32,
}

/// Activation counters for every effect in the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationCounters {
    counters: Vec<ActivationCounter>,
}

impl ActivationCounters {
    /// Zeroed counters for `effect_count` effects.
    pub fn new(effect_count: usize) -> Self {
        Self {
            counters: vec![ActivationCounter::default(); effect_count],
        }
    }

    /// Count one activation of `effect` in both scopes.
    pub fn increment(&mut self, effect: EffectIndex) {
        if let Some(counter) = self.counters.get_mut(effect.as_usize()) {
            counter.run = counter.run.saturating_add(1);
            counter.stage = counter.stage.saturating_add(1);
        }
    }

    /// Count for `effect` in `scope`. Unknown effects count as zero.
    pub fn get(&self, effect: EffectIndex, scope: RepetitionScope) -> u32 {
        self.counters
            .get(effect.as_usize())
            .map_or(0, |counter| match scope {
                RepetitionScope::PerStage => counter.stage,
                RepetitionScope::PerRun => counter.run,
            })
    }

    /// Both counters for `effect`.
    pub fn counter(&self, effect: EffectIndex) -> ActivationCounter {
        self.counters
            .get(effect.as_usize())
            .copied()
            .unwrap_or_default()
    }

    /// Overwrite the run counter for `effect`, used when restoring a save.
    pub fn set_run_count(&mut self, effect: EffectIndex, count: u32) {
        if let Some(counter) = self.counters.get_mut(effect.as_usize()) {
            counter.run = count;
        }
    }

    /// Zero every stage counter.
    pub fn reset_stage(&mut self) {
        for counter in &mut self.counters {
            counter.stage = 0;
        }
    }

    /// Zero every counter.
    pub fn reset_run(&mut self) {
        for counter in &mut self.counters {
            *counter = ActivationCounter::default();
        }
    }

    /// Iterate `(effect, counter)` pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (EffectIndex, ActivationCounter)> + '_ {
        self.counters
            .iter()
            .enumerate()
            .filter_map(|(position, counter)| {
                EffectIndex::from_usize(position).map(|index| (index, *counter))
            })
    }
}
