// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Weighted random selection among the candidates collected during a scheduling pass.

use rand::{
    distributions::{Distribution, WeightedIndex},
    Rng,
};

/// Collects weighted candidates and draws one of them with probability proportional to
/// its weight.
///
/// A selector lives for a single scheduling pass: candidates are offered while walking
/// the queue and [`choose`](Self::choose) consumes it.
#[derive(Debug)]
pub struct WeightedSelector<T> {
    items: Vec<T>,
    weights: Vec<f64>,
}

impl<T> Default for WeightedSelector<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            weights: Vec::new(),
        }
    }
}

impl<T> WeightedSelector<T> {
    /// Creates an empty selector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a candidate.
    ///
    /// # Panics
    ///
    /// If `weight` is not a finite, strictly positive number.
    pub fn offer(&mut self, item: T, weight: f64) {
        assert!(
            weight.is_finite() && weight > 0.0,
            "selection weight must be finite and positive, got {weight}"
        );
        self.items.push(item);
        self.weights.push(weight);
    }

    /// Returns the number of candidates offered so far.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if nothing was offered.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Draws one candidate, or returns `None` if nothing was offered.
    pub fn choose<R: Rng + ?Sized>(mut self, rng: &mut R) -> Option<T> {
        match self.items.len() {
            0 => None,
            1 => self.items.pop(),
            _ => {
                // Weights are checked by `offer`, so building the distribution cannot fail
                // short of the total overflowing to infinity.
                let index = match WeightedIndex::new(&self.weights) {
                    Ok(distribution) => distribution.sample(rng),
                    Err(error) => {
                        tracing::warn!(%error, "invalid selection weights, picking the heaviest");
                        self.heaviest()
                    }
                };
                Some(self.items.swap_remove(index))
            }
        }
    }

    fn heaviest(&self) -> usize {
        self.weights
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map_or(0, |(index, _)| index)
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng as _};

    use super::WeightedSelector;

    #[test]
    fn test_empty_selector_chooses_nothing() {
        let mut rng = StdRng::seed_from_u64(2);
        let selector = WeightedSelector::<u32>::new();
        assert!(selector.is_empty());
        assert_eq!(selector.choose(&mut rng), None);
    }

    #[test]
    fn test_single_candidate_is_always_chosen() {
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..10 {
            let mut selector = WeightedSelector::new();
            selector.offer("only", 1e-6);
            assert_eq!(selector.choose(&mut rng), Some("only"));
        }
    }

    #[test]
    fn test_choice_is_proportional_to_weight() {
        let mut rng = StdRng::seed_from_u64(42);
        let trials = 10_000;
        let mut counts = [0usize; 3];
        for _ in 0..trials {
            let mut selector = WeightedSelector::<usize>::new();
            selector.offer(0, 0.5);
            selector.offer(1, 0.3);
            selector.offer(2, 0.2);
            assert_eq!(selector.len(), 3);
            counts[selector.choose(&mut rng).unwrap()] += 1;
        }
        for (count, expected) in counts.iter().zip([0.5, 0.3, 0.2]) {
            let ratio = *count as f64 / trials as f64;
            assert!(
                (ratio - expected).abs() < 0.03,
                "expected ratio {expected}, got {ratio}"
            );
        }
    }

    #[test]
    fn test_same_seed_gives_same_choices() {
        let draw = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..20)
                .map(|_| {
                    let mut selector = WeightedSelector::new();
                    for item in 0..5u32 {
                        selector.offer(item, f64::from(item + 1));
                    }
                    selector.choose(&mut rng).unwrap()
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(draw(7), draw(7));
    }

    #[test]
    #[should_panic(expected = "selection weight must be finite and positive")]
    fn test_zero_weight_is_rejected() {
        WeightedSelector::new().offer((), 0.0);
    }

    #[test]
    #[should_panic(expected = "selection weight must be finite and positive")]
    fn test_nan_weight_is_rejected() {
        WeightedSelector::new().offer((), f64::NAN);
    }
}
