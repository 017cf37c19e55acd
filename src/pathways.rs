use std::collections::VecDeque;

use itertools::Itertools;
use log::{info, warn};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::{gillespie::TrajectoryHistory, network::ReactionNetwork, Error, Result};

/// A distinct pathway to a target and the number of trajectories that followed it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pathway {
    /// The reactions of the first trajectory found with this set of reactions, in causal order.
    pub reactions: Vec<usize>,
    pub frequency: usize,
}

/// The pathways to a target species over an ensemble.
#[derive(Debug)]
pub struct PathwayReport {
    pub target: usize,
    /// Distinct pathways, sorted by descending frequency.
    pub pathways: Vec<Pathway>,
    /// Trajectories whose history could not be explained causally.
    pub failures: Vec<(u64, Error)>,
}

fn negative_species(state: &[i64]) -> SmallVec<[usize; 8]> {
    state
        .iter()
        .positions(|&count| count < 0)
        .collect()
}

/// Reconstructs the reactions that causally explain the first production of the target.
///
/// Returns `None` if the target is never produced. Starting from the first reaction producing
/// the target, every species driven negative in the partial state is resolved with the earliest
/// reaction of the history producing it, until no species is missing.
pub fn reconstruct_pathway(
    network: &ReactionNetwork,
    initial_state: &[i64],
    history: &[usize],
    target: usize,
) -> Result<Option<Vec<usize>>> {
    let Some(&final_reaction) = history
        .iter()
        .find(|&&reaction| network.produces(reaction, target))
    else {
        return Ok(None);
    };

    let mut pathway = VecDeque::from([final_reaction]);
    let mut partial_state = initial_state.to_owned();
    network.apply(final_reaction, &mut partial_state);

    // Every pass resolves one more causal level, and a history has at most as many levels
    // as it has reactions.
    let mut passes = 0;
    let mut missing = negative_species(&partial_state);
    while !missing.is_empty() {
        if passes == history.len() {
            return Err(Error::InvariantViolation(format!(
                "the pathway to species {target} did not resolve after {passes} passes"
            )));
        }
        passes += 1;
        for &species in &missing {
            let producer = history
                .iter()
                .copied()
                .find(|&reaction| network.produces(reaction, species))
                .ok_or_else(|| {
                    Error::InvariantViolation(format!(
                        "species {species} is consumed but never produced in the history"
                    ))
                })?;
            network.apply(producer, &mut partial_state);
            pathway.push_front(producer);
        }
        missing = negative_species(&partial_state);
    }
    Ok(Some(pathway.into()))
}

/// Groups pathways by their set of reactions, ignoring order and repeats,
/// and sorts the groups by descending frequency. Ties keep the order of first appearance.
pub fn collect_duplicate_pathways(pathways: impl IntoIterator<Item = Vec<usize>>) -> Vec<Pathway> {
    let mut groups: Vec<Pathway> = Vec::new();
    let mut index: FxHashMap<Vec<usize>, usize> = FxHashMap::default();
    for pathway in pathways {
        let key = pathway.iter().copied().sorted_unstable().dedup().collect_vec();
        match index.get(&key) {
            Some(&idx) => groups[idx].frequency += 1,
            None => {
                index.insert(key, groups.len());
                groups.push(Pathway {
                    reactions: pathway,
                    frequency: 1,
                });
            }
        }
    }
    groups.sort_by(|a, b| b.frequency.cmp(&a.frequency));
    groups
}

/// Extracts and caches the pathways to target species over the histories of an ensemble.
pub struct PathwayAnalyzer<'t> {
    network: &'t ReactionNetwork,
    initial_state: &'t [i64],
    histories: &'t [TrajectoryHistory],
    reports: FxHashMap<usize, PathwayReport>,
}

impl<'t> PathwayAnalyzer<'t> {
    pub fn new(
        network: &'t ReactionNetwork,
        initial_state: &'t [i64],
        histories: &'t [TrajectoryHistory],
    ) -> PathwayAnalyzer<'t> {
        PathwayAnalyzer {
            network,
            initial_state,
            histories,
            reports: FxHashMap::default(),
        }
    }

    fn extract(&self, target: usize) -> PathwayReport {
        let mut pathways = Vec::new();
        let mut failures = Vec::new();
        for history in self.histories {
            let pathway =
                reconstruct_pathway(self.network, self.initial_state, &history.reactions, target);
            match pathway {
                Ok(Some(pathway)) => pathways.push(pathway),
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        "failed to reconstruct the pathway to {target} in trajectory {}: {err}",
                        history.seed
                    );
                    failures.push((history.seed, err));
                }
            }
        }
        let found = pathways.len();
        let pathways = collect_duplicate_pathways(pathways);
        info!(
            "species {target} was produced in {found} of {} trajectories by {} pathways",
            self.histories.len(),
            pathways.len()
        );
        PathwayReport {
            target,
            pathways,
            failures,
        }
    }

    /// Returns the pathways to the target, extracting them on first request.
    pub fn pathways(&mut self, target: usize) -> Result<&PathwayReport> {
        if target >= self.network.number_of_species() {
            return Err(Error::UnknownSpecies(target.to_string()));
        }
        if !self.reports.contains_key(&target) {
            let report = self.extract(target);
            self.reports.insert(target, report);
        }
        Ok(&self.reports[&target])
    }

    /// Extracts the pathways to several targets. An invalid target does not stop the others.
    pub fn analyze_targets(&mut self, targets: &[usize]) -> Vec<(usize, Result<()>)> {
        targets
            .iter()
            .map(|&target| (target, self.pathways(target).map(|_| ())))
            .collect()
    }

    /// Returns the report of a target that was already analyzed.
    pub fn report(&self, target: usize) -> Option<&PathwayReport> {
        self.reports.get(&target)
    }
}
