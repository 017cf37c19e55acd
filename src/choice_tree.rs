use rand::Rng;
use rand_distr::Distribution;

use crate::{Error, Result};

/// A complete binary tree over reaction propensities, supporting O(log R) updates
/// and weighted sampling of the next reaction.
///
/// The tree is stored as an array: node 1 is the root and node `i` has children `2i` and `2i + 1`.
/// The leaves occupy `[alloc_size, 2 * alloc_size)`, where `alloc_size` is the number of
/// reactions rounded up to a power of two. The padding leaves always stay zero.
#[derive(Debug, Clone)]
pub struct ChoiceTree {
    data: Vec<f64>,
    alloc_size: usize,
    size: usize,
}

impl ChoiceTree {
    /// A tree with every propensity set to zero.
    pub fn empty(size: usize) -> ChoiceTree {
        let alloc_size = size.max(1).next_power_of_two();
        ChoiceTree {
            data: vec![0.; 2 * alloc_size],
            alloc_size,
            size,
        }
    }

    /// Builds the tree level by level from the given propensities.
    pub fn from_propensities(propensities: &[f64]) -> Result<ChoiceTree> {
        let mut tree = ChoiceTree::empty(propensities.len());
        for (idx, &value) in propensities.iter().enumerate() {
            check_propensity(idx, value)?;
            tree.data[tree.alloc_size + idx] = value;
        }
        for node in (1..tree.alloc_size).rev() {
            tree.data[node] = tree.data[2 * node] + tree.data[2 * node + 1];
        }
        Ok(tree)
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Returns the total propensity of all the reactions.
    pub fn total(&self) -> f64 {
        self.data[1]
    }

    /// Returns the propensity currently stored for the reaction.
    pub fn get(&self, idx: usize) -> f64 {
        self.data[self.alloc_size + idx]
    }

    /// Sets the propensity of a reaction and refreshes the sums cached by its ancestors.
    ///
    /// Every ancestor is recomputed from its two children rather than shifted by the
    /// difference, so a subtree whose leaves are all zero sums to exactly zero.
    pub fn update(&mut self, idx: usize, value: f64) -> Result<()> {
        debug_assert!(
            idx < self.len(),
            "Attempted to set an empty index: {idx}"
        );
        check_propensity(idx, value)?;
        let mut node = self.alloc_size + idx;
        self.data[node] = value;
        while node > 1 {
            node /= 2;
            self.data[node] = self.data[2 * node] + self.data[2 * node + 1];
        }
        Ok(())
    }

    /// Selects the reaction whose cumulative propensity interval contains the threshold.
    ///
    /// At every node the search goes left when `threshold < left`, and otherwise subtracts
    /// the left sum and goes right, so a threshold exactly on a boundary belongs to the right.
    /// A subtree with zero weight is never entered, so rounding in the cached sums cannot
    /// select a zero-propensity reaction or a padding leaf.
    pub fn sample(&self, mut threshold: f64) -> usize {
        debug_assert!(self.total() > 0., "Sampled from a tree with zero total propensity");
        let mut node = 1;
        while node < self.alloc_size {
            let left = self.data[2 * node];
            let right = self.data[2 * node + 1];
            if threshold < left || right <= 0. {
                node = 2 * node;
            } else {
                threshold -= left;
                node = 2 * node + 1;
            }
        }
        node - self.alloc_size
    }
}

fn check_propensity(idx: usize, value: f64) -> Result<()> {
    if value >= 0. && value.is_finite() {
        Ok(())
    } else {
        Err(Error::InvariantViolation(format!(
            "reaction {idx} has an invalid propensity {value}"
        )))
    }
}

impl Distribution<usize> for ChoiceTree {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        ChoiceTree::sample(self, rng.random::<f64>() * self.total())
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    #[test]
    fn leaves_are_padded_to_a_power_of_two() {
        let tree = ChoiceTree::from_propensities(&[1., 2., 3.]).unwrap();
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.alloc_size, 4);
        assert_eq!(tree.total(), 6.);
        assert_eq!(tree.get(2), 3.);
    }

    #[test]
    fn boundary_thresholds_route_right() {
        let tree = ChoiceTree::from_propensities(&[1., 2., 3., 4.]).unwrap();
        assert_eq!(tree.sample(0.), 0);
        assert_eq!(tree.sample(0.999), 0);
        assert_eq!(tree.sample(1.), 1);
        assert_eq!(tree.sample(2.999), 1);
        assert_eq!(tree.sample(3.), 2);
        assert_eq!(tree.sample(6.), 3);
        assert_eq!(tree.sample(9.999), 3);
    }

    #[test]
    fn zero_leaves_are_never_selected() {
        let tree = ChoiceTree::from_propensities(&[0., 2., 0., 0., 5.]).unwrap();
        for threshold in [0., 1., 1.999, 2., 4., 6.999] {
            let idx = tree.sample(threshold);
            assert!(idx == 1 || idx == 4, "{threshold} -> {idx}");
        }
        // A threshold past the end due to rounding lands on the last nonzero leaf.
        assert_eq!(tree.sample(7.), 4);
    }

    #[test]
    fn updates_keep_sums_consistent() {
        let mut tree = ChoiceTree::from_propensities(&[0.; 5]).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let mut values = [0.; 5];
        for _ in 0..1000 {
            let idx = rng.random_range(0..5);
            let value = if rng.random_bool(0.3) { 0. } else { rng.random::<f64>() * 10. };
            values[idx] = value;
            tree.update(idx, value).unwrap();
        }
        let expected: f64 = values.iter().sum();
        assert!((tree.total() - expected).abs() < 1e-9);

        for idx in 0..5 {
            tree.update(idx, 0.).unwrap();
        }
        assert_eq!(tree.total(), 0.);
    }

    #[test]
    fn negative_propensities_are_rejected() {
        let mut tree = ChoiceTree::empty(2);
        assert!(matches!(tree.update(1, -0.5), Err(Error::InvariantViolation(_))));
        assert!(tree.update(0, f64::NAN).is_err());
        assert!(ChoiceTree::from_propensities(&[1., -1.]).is_err());
    }

    #[test]
    fn sampling_frequencies_match_propensities() {
        let propensities = [0.5, 3., 0., 1.5, 5.];
        let tree = ChoiceTree::from_propensities(&propensities).unwrap();
        let rng = &mut StdRng::seed_from_u64(11);
        let n = 200_000;
        let mut counts = [0u64; 5];
        for idx in (&tree).sample_iter(rng).take(n) {
            counts[idx] += 1;
        }
        for (count, propensity) in counts.iter().zip(propensities) {
            let p = propensity / tree.total();
            let freq = *count as f64 / n as f64;
            let sigma = (p * (1. - p) / n as f64).sqrt();
            assert!((freq - p).abs() <= 5. * sigma + 1e-12, "{freq} vs {p}");
        }
    }
}
