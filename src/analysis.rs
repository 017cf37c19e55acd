//! Summaries of ensemble histories: final states, reaction tallies and time profiles.

use std::cmp::Reverse;

use itertools::Itertools;
use ordered_float::OrderedFloat;
use rustc_hash::FxHashMap;

use crate::{gillespie::TrajectoryHistory, network::ReactionNetwork, Error, Result};

/// The mean and standard deviation of a quantity over an ensemble.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Summary {
    pub mean: f64,
    pub std_dev: f64,
}

impl Summary {
    fn of(values: impl Iterator<Item = f64> + Clone) -> Summary {
        let n = values.clone().count().max(1) as f64;
        let mean = values.clone().sum::<f64>() / n;
        let variance = values.map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        Summary {
            mean,
            std_dev: variance.sqrt(),
        }
    }
}

/// Replays a history on the initial state.
pub fn final_state(
    network: &ReactionNetwork,
    initial_state: &[i64],
    history: &[usize],
) -> Result<Vec<i64>> {
    let mut state = initial_state.to_owned();
    for (step, &reaction) in history.iter().enumerate() {
        network.apply(reaction, &mut state);
        if let Some(species) = network.reactants(reaction).iter().find(|&&s| state[s] < 0) {
            return Err(Error::InvariantViolation(format!(
                "species {species} became negative at step {step}"
            )));
        }
    }
    Ok(state)
}

/// The final count of every species over the ensemble, sorted by descending mean.
pub fn final_state_statistics(final_states: &[Vec<i64>]) -> Vec<(usize, Summary)> {
    let species_count = final_states.first().map_or(0, Vec::len);
    (0..species_count)
        .map(|species| {
            let summary = Summary::of(final_states.iter().map(|state| state[species] as f64));
            (species, summary)
        })
        .sorted_by_key(|(species, summary)| (Reverse(OrderedFloat(summary.mean)), *species))
        .collect()
}

/// How often each reaction fired, averaged over the trajectories in which it fired at least once,
/// sorted by descending mean.
pub fn reaction_tally(histories: &[TrajectoryHistory]) -> Vec<(usize, Summary)> {
    let mut counts: FxHashMap<usize, Vec<f64>> = FxHashMap::default();
    for history in histories {
        for (reaction, fired) in history.reactions.iter().counts() {
            counts.entry(*reaction).or_default().push(fired as f64);
        }
    }
    counts
        .into_iter()
        .map(|(reaction, fired)| (reaction, Summary::of(fired.iter().copied())))
        .sorted_by_key(|(reaction, summary)| (Reverse(OrderedFloat(summary.mean)), *reaction))
        .collect()
}

/// The time evolution of a single trajectory.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeProfile {
    /// For every species, its count after each change, starting at time zero
    /// and ending at the time of the last reaction.
    pub species: Vec<Vec<(f64, i64)>>,
    /// For every fired reaction, the times at which it fired.
    pub reactions: FxHashMap<usize, Vec<f64>>,
    pub final_state: Vec<i64>,
}

/// Replays a history into per-species and per-reaction time series.
pub fn time_profile(
    network: &ReactionNetwork,
    initial_state: &[i64],
    history: &TrajectoryHistory,
) -> Result<TimeProfile> {
    if history.reactions.len() != history.times.len() {
        return Err(Error::InvariantViolation(format!(
            "trajectory {} has {} reactions but {} times",
            history.seed,
            history.reactions.len(),
            history.times.len()
        )));
    }
    let mut state = initial_state.to_owned();
    let mut species: Vec<Vec<(f64, i64)>> = state.iter().map(|&count| vec![(0., count)]).collect();
    let mut reactions: FxHashMap<usize, Vec<f64>> = FxHashMap::default();

    for (&reaction, &time) in history.reactions.iter().zip(&history.times) {
        reactions.entry(reaction).or_default().push(time);
        network.apply(reaction, &mut state);
        for &s in network.reactants(reaction).iter().chain(network.products(reaction)).unique() {
            if state[s] < 0 {
                return Err(Error::InvariantViolation(format!(
                    "species {s} became negative at time {time} in trajectory {}",
                    history.seed
                )));
            }
            species[s].push((time, state[s]));
        }
    }
    if let Some(&end) = history.times.last() {
        for (series, &count) in species.iter_mut().zip(&state) {
            series.push((end, count));
        }
    }
    Ok(TimeProfile {
        species,
        reactions,
        final_state: state,
    })
}
