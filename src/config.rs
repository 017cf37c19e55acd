use bon::Builder;
use rand::{rng, Rng};
use rustc_hash::FxHashSet;

use crate::{Error, Result};

/// The default inverse thermal energy, in 1/eV, weighting uphill reactions.
pub const DEFAULT_POSITIVE_WEIGHT_COEFFICIENT: f64 = 39.;
/// The default total propensity below which a trajectory is considered a dead end.
pub const DEFAULT_TERMINATION_THRESHOLD: f64 = 1. / 1000.;

/// Constants of the kinetic model shared by every trajectory.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KineticsConfig {
    /// Scales the free energy of uphill reactions when deriving their rate constant.
    pub positive_weight_coefficient: f64,
    /// A trajectory terminates once its total propensity drops below this value.
    pub termination_threshold: f64,
}

impl Default for KineticsConfig {
    fn default() -> Self {
        KineticsConfig {
            positive_weight_coefficient: DEFAULT_POSITIVE_WEIGHT_COEFFICIENT,
            termination_threshold: DEFAULT_TERMINATION_THRESHOLD,
        }
    }
}

impl KineticsConfig {
    pub fn validate(&self) -> Result<()> {
        let coefficient = self.positive_weight_coefficient;
        if !(coefficient.is_finite() && coefficient > 0.) {
            return Err(Error::Configuration(format!(
                "the positive weight coefficient must be positive, got {}",
                self.positive_weight_coefficient
            )));
        }
        if !(self.termination_threshold.is_finite() && self.termination_threshold > 0.) {
            return Err(Error::Configuration(format!(
                "the termination threshold must be positive, got {}",
                self.termination_threshold
            )));
        }
        Ok(())
    }
}

/// When a trajectory stops.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Cutoff {
    /// Stop after the given number of reaction events.
    Steps(u64),
    /// Stop once the simulated clock reaches the given time.
    Time(f64),
}

/// The seeds of the trajectories in an ensemble.
#[derive(Clone, Debug, PartialEq)]
pub enum Seeds {
    Explicit(Vec<u64>),
    /// Draw the given number of fresh, distinct seeds.
    Random { count: usize },
}

impl Seeds {
    /// Resolves the seeds to a concrete list.
    pub fn resolve(&self) -> Vec<u64> {
        match self {
            Seeds::Explicit(seeds) => seeds.clone(),
            Seeds::Random { count } => draw_seeds(*count, &mut rng()),
        }
    }
}

/// Draws `count` distinct seeds in `[1, i64::MAX)`.
pub fn draw_seeds(count: usize, rng: &mut impl Rng) -> Vec<u64> {
    let mut seen = FxHashSet::default();
    let mut seeds = Vec::with_capacity(count);
    while seeds.len() < count {
        let seed = rng.random_range(1..i64::MAX as u64);
        if seen.insert(seed) {
            seeds.push(seed);
        }
    }
    seeds
}

/// The parameters of an ensemble run.
#[derive(Clone, Debug, PartialEq, Builder)]
pub struct SimulationParameters {
    /// The number of worker threads.
    #[builder(default = 1)]
    pub threads: usize,
    pub cutoff: Cutoff,
    pub seeds: Vec<u64>,
    #[builder(default)]
    pub kinetics: KineticsConfig,
}

impl SimulationParameters {
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(Error::Configuration(
                "at least one worker thread is required".to_owned(),
            ));
        }
        if self.seeds.is_empty() {
            return Err(Error::Configuration("the seed list is empty".to_owned()));
        }
        if let Cutoff::Time(time) = self.cutoff {
            if !(time.is_finite() && time > 0.) {
                return Err(Error::Configuration(format!(
                    "the time cutoff must be positive, got {time}"
                )));
            }
        }
        self.kinetics.validate()
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    #[test]
    fn drawn_seeds_are_distinct() {
        let seeds = draw_seeds(1000, &mut StdRng::seed_from_u64(7));
        assert_eq!(seeds.len(), 1000);
        assert_eq!(seeds.iter().collect::<FxHashSet<_>>().len(), 1000);
        assert!(seeds.iter().all(|&s| s >= 1 && s < i64::MAX as u64));
    }

    #[test]
    fn empty_seed_list_is_rejected() {
        let params = SimulationParameters::builder()
            .cutoff(Cutoff::Steps(10))
            .seeds(vec![])
            .build();
        assert!(matches!(params.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn invalid_cutoff_and_threads_are_rejected() {
        let params = SimulationParameters::builder()
            .cutoff(Cutoff::Time(-1.))
            .seeds(vec![1])
            .build();
        assert!(matches!(params.validate(), Err(Error::Configuration(_))));

        let params = SimulationParameters::builder()
            .threads(0)
            .cutoff(Cutoff::Steps(5))
            .seeds(vec![1])
            .build();
        assert!(matches!(params.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn default_kinetics_are_valid() {
        KineticsConfig::default().validate().unwrap();
        let config = KineticsConfig {
            termination_threshold: 0.,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
