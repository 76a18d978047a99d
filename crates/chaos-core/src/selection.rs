//! Weighted random choice over a small set of values.
//!
//! [`WeightedSelector`] keeps a running total so choices can be added and
//! removed without rebuilding the table. Evaluation partitions `[0, total)`
//! into consecutive spans in insertion order; a uniform draw `u` picks the
//! span containing `u * total`.
//!
//! Degenerate selections (no choices, or every weight zero) evaluate to
//! `None`; callers decide the fallback.

use crate::rng::EffectRng;

/// One entry in a [`WeightedSelector`].
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedChoice<T> {
    /// The value returned when this entry is selected.
    pub value: T,
    /// Non-negative selection weight.
    pub weight: f32,
}

/// A multiset of values with selection weights.
#[derive(Debug, Clone)]
pub struct WeightedSelector<T> {
    choices: Vec<WeightedChoice<T>>,
    total_weight: f32,
}

impl<T> Default for WeightedSelector<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WeightedSelector<T> {
    /// Create an empty selector.
    pub const fn new() -> Self {
        Self {
            choices: Vec::new(),
            total_weight: 0.0,
        }
    }

    /// Create an empty selector with room for `capacity` choices.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            choices: Vec::with_capacity(capacity),
            total_weight: 0.0,
        }
    }

    /// Remove every choice.
    pub fn clear(&mut self) {
        self.choices.clear();
        self.total_weight = 0.0;
    }

    /// Add a choice. Negative and non-finite weights are stored as zero.
    pub fn add_choice(&mut self, value: T, weight: f32) {
        let weight = sanitize_weight(weight);
        self.total_weight += weight;
        self.choices.push(WeightedChoice { value, weight });
    }

    /// Number of choices, including zero-weight ones.
    pub const fn len(&self) -> usize {
        self.choices.len()
    }

    /// Whether there are no choices at all.
    pub const fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }

    /// Sum of all weights.
    pub const fn total_weight(&self) -> f32 {
        self.total_weight
    }

    /// Iterate over the choices in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &WeightedChoice<T>> {
        self.choices.iter()
    }

    /// Probability that a choice with `weight` is picked, given the current total.
    pub fn selection_chance(&self, weight: f32) -> f32 {
        if self.total_weight <= 0.0 {
            return 0.0;
        }
        sanitize_weight(weight) / self.total_weight
    }

    /// Position of the choice selected by the uniform draw `u`.
    ///
    /// `u` is clamped into `[0, 1]`. Zero-weight entries are never
    /// selected; rounding at the upper edge lands on the last entry with
    /// positive weight.
    pub fn evaluate_index(&self, u: f32) -> Option<usize> {
        if self.total_weight <= 0.0 || !self.total_weight.is_finite() {
            return None;
        }
        let u = if u.is_nan() { 0.0 } else { u.clamp(0.0, 1.0) };
        let target = u * self.total_weight;

        let mut cumulative = 0.0_f32;
        let mut last_positive = None;
        for (position, choice) in self.choices.iter().enumerate() {
            if choice.weight <= 0.0 {
                continue;
            }
            cumulative += choice.weight;
            last_positive = Some(position);
            if target < cumulative {
                return Some(position);
            }
        }
        last_positive
    }

    /// The value selected by the uniform draw `u`.
    pub fn evaluate(&self, u: f32) -> Option<&T> {
        self.evaluate_index(u)
            .and_then(|position| self.choices.get(position))
            .map(|choice| &choice.value)
    }

    /// Draw one value from `rng` and remove it from the selector.
    ///
    /// The remaining choices keep their relative order and the running
    /// total is reduced by the removed weight.
    pub fn get_and_remove_random(&mut self, rng: &mut EffectRng) -> Option<T> {
        let position = self.evaluate_index(rng.next_normalized())?;
        self.remove_at(position)
    }

    /// Remove the choice at `position`.
    pub fn remove_at(&mut self, position: usize) -> Option<T> {
        if position >= self.choices.len() {
            return None;
        }
        let removed = self.choices.remove(position);
        self.total_weight = (self.total_weight - removed.weight).max(0.0);
        if self.choices.is_empty() {
            self.total_weight = 0.0;
        }
        Some(removed.value)
    }
}

impl<T: PartialEq> WeightedSelector<T> {
    /// Whether `value` is one of the choices.
    pub fn contains(&self, value: &T) -> bool {
        self.choices.iter().any(|choice| choice.value == *value)
    }
}

const fn sanitize_weight(weight: f32) -> f32 {
    if weight.is_finite() && weight > 0.0 {
        weight
    } else {
        0.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    fn selector(weights: &[f32]) -> WeightedSelector<usize> {
        let mut selector = WeightedSelector::new();
        for (i, w) in weights.iter().enumerate() {
            selector.add_choice(i, *w);
        }
        selector
    }

    #[test]
    fn empty_selector_evaluates_to_none() {
        let selector: WeightedSelector<u8> = WeightedSelector::new();
        assert!(selector.evaluate(0.5).is_none());
    }

    #[test]
    fn all_zero_weights_evaluate_to_none() {
        let selector = selector(&[0.0, 0.0]);
        assert_eq!(selector.len(), 2);
        assert!(selector.evaluate(0.3).is_none());
    }

    #[test]
    fn partitions_in_insertion_order() {
        let selector = selector(&[1.0, 1.0, 2.0]);
        assert_eq!(selector.evaluate(0.0), Some(&0));
        assert_eq!(selector.evaluate(0.24), Some(&0));
        assert_eq!(selector.evaluate(0.26), Some(&1));
        assert_eq!(selector.evaluate(0.6), Some(&2));
        assert_eq!(selector.evaluate(1.0), Some(&2));
    }

    #[test]
    fn zero_weight_is_never_selected() {
        let selector = selector(&[1.0, 0.0, 1.0, 0.0]);
        for step in 0..=100 {
            #[allow(clippy::cast_precision_loss)]
            let u = step as f32 / 100.0;
            let picked = *selector.evaluate(u).unwrap();
            assert!(picked == 0 || picked == 2, "picked {picked} at u={u}");
        }
    }

    #[test]
    fn invalid_weights_are_stored_as_zero() {
        let selector = selector(&[-1.0, f32::NAN, 2.0]);
        assert_eq!(selector.total_weight(), 2.0);
        assert_eq!(selector.evaluate(0.0), Some(&2));
    }

    #[test]
    fn selection_chance_is_relative_to_total() {
        let selector = selector(&[1.0, 3.0]);
        assert!((selector.selection_chance(1.0) - 0.25).abs() < 1e-6);
        assert_eq!(WeightedSelector::<u8>::new().selection_chance(1.0), 0.0);
    }

    #[test]
    fn get_and_remove_drains_each_value_once() {
        let mut selector = selector(&[1.0, 2.0, 3.0, 4.0]);
        let mut rng = EffectRng::from_seed(11);
        let mut drawn = Vec::new();
        while let Some(value) = selector.get_and_remove_random(&mut rng) {
            drawn.push(value);
        }
        drawn.sort_unstable();
        assert_eq!(drawn, vec![0, 1, 2, 3]);
        assert!(selector.is_empty());
        assert_eq!(selector.total_weight(), 0.0);
    }

    #[test]
    fn removal_updates_running_total() {
        let mut selector = selector(&[1.0, 2.0, 3.0]);
        assert_eq!(selector.remove_at(1), Some(1));
        assert!((selector.total_weight() - 4.0).abs() < 1e-6);
        assert!(!selector.contains(&1));
        assert_eq!(selector.remove_at(10), None);
    }

    #[test]
    fn same_draws_give_same_picks() {
        let weights = [0.5, 1.5, 3.0, 0.25];
        let a = selector(&weights);
        let b = selector(&weights);
        let mut rng_a = EffectRng::from_seed(99);
        let mut rng_b = EffectRng::from_seed(99);
        for _ in 0..100 {
            assert_eq!(
                a.evaluate(rng_a.next_normalized()),
                b.evaluate(rng_b.next_normalized())
            );
        }
    }

    #[test]
    fn frequencies_converge_to_weights() {
        let weights = [1.0_f32, 2.0, 3.0, 4.0];
        let selector = selector(&weights);
        let mut rng = EffectRng::from_seed(2024);
        let mut counts = [0_u32; 4];
        let draws = 100_000_u32;
        for _ in 0..draws {
            let picked = *selector.evaluate(rng.next_normalized()).unwrap();
            counts[picked] += 1;
        }
        for (i, weight) in weights.iter().enumerate() {
            let expected = f64::from(*weight) / 10.0;
            let observed = f64::from(counts[i]) / f64::from(draws);
            assert!(
                (observed - expected).abs() < 0.01,
                "choice {i}: observed {observed}, expected {expected}"
            );
        }
    }
}
