use std::sync::Arc;

use log::debug;
use rand::Rng;
use rand_distr::{Distribution, Open01};

use crate::{
    choice_tree::ChoiceTree,
    config::{Cutoff, KineticsConfig},
    network::ReactionNetwork,
    Error, Result,
};

/// Whether a trajectory can still fire reactions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Running,
    /// The total propensity dropped below the termination threshold.
    Terminated,
}

/// The fired reactions of a trajectory and the clock after each of them.
#[derive(Clone, Debug, PartialEq)]
pub struct TrajectoryHistory {
    pub seed: u64,
    pub reactions: Vec<usize>,
    pub times: Vec<f64>,
}

impl TrajectoryHistory {
    pub fn len(&self) -> usize {
        self.reactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reactions.is_empty()
    }
}

/// A single trajectory simulated with Gillespie's direct method.
///
/// The network is shared; the state, the propensity tree and the history belong to the trajectory.
pub struct Gillespie<R> {
    network: Arc<ReactionNetwork>,
    /// The current particle count of every species.
    state: Vec<i64>,
    /// A data structure allowing quick sampling of the next reaction to fire.
    tree: ChoiceTree,
    termination_threshold: f64,
    status: Status,
    time: f64,
    history: TrajectoryHistory,
    rng: R,
}

impl<R: Rng> Gillespie<R> {
    /// Initializes a trajectory from the initial state.
    ///
    /// Only reactions consuming an initially present species, and source reactions
    /// without reactants, get a nonzero propensity. Every other reaction lacks a reactant
    /// and starts at zero. A source reaction depends on no species, so its propensity
    /// never changes afterwards.
    pub fn new(
        network: Arc<ReactionNetwork>,
        initial_state: &[i64],
        config: &KineticsConfig,
        seed: u64,
        rng: R,
    ) -> Result<Gillespie<R>> {
        config.validate()?;
        if initial_state.len() != network.number_of_species() {
            return Err(Error::Configuration(format!(
                "the initial state has {} species but the network has {}",
                initial_state.len(),
                network.number_of_species()
            )));
        }
        if let Some(species) = initial_state.iter().position(|&count| count < 0) {
            return Err(Error::Configuration(format!(
                "the initial count of species {species} is negative: {}",
                initial_state[species]
            )));
        }

        let mut propensities = vec![0.; network.number_of_reactions()];
        for (species, _) in initial_state.iter().enumerate().filter(|&(_, &c)| c > 0) {
            for &reaction in network.reactant_to_reactions(species) {
                propensities[reaction] = network.propensity(reaction, initial_state);
            }
        }
        let sources = (0..network.number_of_reactions()).filter(|&r| network.inputs(r).is_empty());
        for reaction in sources {
            propensities[reaction] = network.propensity(reaction, initial_state);
        }
        let tree = ChoiceTree::from_propensities(&propensities)?;

        Ok(Gillespie {
            network,
            state: initial_state.to_owned(),
            tree,
            termination_threshold: config.termination_threshold,
            status: Status::Running,
            time: 0.,
            history: TrajectoryHistory {
                seed,
                reactions: Vec::new(),
                times: Vec::new(),
            },
            rng,
        })
    }

    /// Fires a single reaction, or terminates if the total propensity is negligible.
    pub fn step(&mut self) -> Result<Status> {
        if self.status == Status::Terminated {
            return Ok(Status::Terminated);
        }
        let total = self.tree.total();
        if total < self.termination_threshold {
            debug!(
                "trajectory {} reached a dead end after {} steps",
                self.history.seed,
                self.history.len()
            );
            self.status = Status::Terminated;
            return Ok(Status::Terminated);
        }

        let r1: f64 = Open01.sample(&mut self.rng);
        let r2: f64 = Open01.sample(&mut self.rng);
        self.time += (1. / r1).ln() / total;
        let reaction = self.tree.sample(r2 * total);
        self.history.reactions.push(reaction);
        self.history.times.push(self.time);

        self.network.apply(reaction, &mut self.state);
        for &dependent in self.network.dependents(reaction) {
            let propensity = self.network.propensity(dependent, &self.state);
            self.tree.update(dependent, propensity)?;
        }
        Ok(Status::Running)
    }

    /// Steps until the clock reaches the cutoff time or the trajectory terminates.
    pub fn run_until(&mut self, time_cutoff: f64) -> Result<Status> {
        while self.time < time_cutoff && self.step()? == Status::Running {}
        Ok(self.status)
    }

    /// Fires at most the given number of reactions.
    pub fn run_steps(&mut self, steps: u64) -> Result<Status> {
        for _ in 0..steps {
            if self.step()? == Status::Terminated {
                break;
            }
        }
        Ok(self.status)
    }

    pub fn run(&mut self, cutoff: Cutoff) -> Result<Status> {
        match cutoff {
            Cutoff::Steps(steps) => self.run_steps(steps),
            Cutoff::Time(time) => self.run_until(time),
        }
    }

    pub fn state(&self) -> &[i64] {
        &self.state
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// The total propensity of all the reactions in the current state.
    pub fn total_propensity(&self) -> f64 {
        self.tree.total()
    }

    /// The propensity of a reaction as cached in the sampling tree.
    pub fn propensity(&self, reaction: usize) -> f64 {
        self.tree.get(reaction)
    }

    pub fn history(&self) -> &TrajectoryHistory {
        &self.history
    }

    pub fn into_history(self) -> TrajectoryHistory {
        self.history
    }
}
