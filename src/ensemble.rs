use std::sync::Arc;

use log::{info, warn};
use rand::{rngs::StdRng, SeedableRng};
use rayon::{prelude::*, ThreadPoolBuilder};

use crate::{
    config::{Cutoff, KineticsConfig, SimulationParameters},
    gillespie::{Gillespie, TrajectoryHistory},
    network::ReactionNetwork,
    store::{ObjectId, ObjectStore},
    Error, Result,
};

/// Simulates a single trajectory to the cutoff, with a random stream derived only from its seed.
pub fn run_trajectory(
    network: Arc<ReactionNetwork>,
    initial_state: &[i64],
    config: &KineticsConfig,
    cutoff: Cutoff,
    seed: u64,
) -> Result<TrajectoryHistory> {
    let mut sim = Gillespie::new(
        network,
        initial_state,
        config,
        seed,
        StdRng::seed_from_u64(seed),
    )?;
    sim.run(cutoff)?;
    Ok(sim.into_history())
}

/// The outcome of the trajectory simulated with a seed.
#[derive(Debug)]
pub struct TrajectoryRun {
    pub seed: u64,
    pub outcome: Result<TrajectoryHistory>,
}

/// The runs of an ensemble, aligned with the seed list.
#[derive(Debug)]
pub struct EnsembleOutput {
    pub runs: Vec<TrajectoryRun>,
}

impl EnsembleOutput {
    /// The histories of the trajectories that completed, in seed order.
    pub fn histories(&self) -> impl Iterator<Item = &TrajectoryHistory> {
        self.runs.iter().filter_map(|run| run.outcome.as_ref().ok())
    }

    /// The seeds whose trajectory failed, with the reason.
    pub fn failures(&self) -> impl Iterator<Item = (u64, &Error)> {
        self.runs
            .iter()
            .filter_map(|run| run.outcome.as_ref().err().map(|err| (run.seed, err)))
    }

    pub fn into_histories(self) -> Vec<TrajectoryHistory> {
        self.runs
            .into_iter()
            .filter_map(|run| run.outcome.ok())
            .collect()
    }
}

/// Publishes a network and its initial state to a store, returning their handles.
pub fn publish<S: ObjectStore>(
    store: &S,
    network: ReactionNetwork,
    initial_state: Vec<i64>,
) -> Result<(ObjectId, ObjectId)> {
    let network_id = store.put(network)?;
    let state_id = store.put(initial_state)?;
    info!("published the network as {network_id} and the initial state as {state_id}");
    Ok((network_id, state_id))
}

/// Runs independent trajectories, one per seed, over a shared read-only network.
pub struct EnsembleRunner {
    network: Arc<ReactionNetwork>,
    initial_state: Arc<Vec<i64>>,
    params: SimulationParameters,
}

impl EnsembleRunner {
    pub fn new(
        network: Arc<ReactionNetwork>,
        initial_state: Arc<Vec<i64>>,
        params: SimulationParameters,
    ) -> Result<EnsembleRunner> {
        params.validate()?;
        if initial_state.len() != network.number_of_species() {
            return Err(Error::Configuration(format!(
                "the initial state has {} species but the network has {}",
                initial_state.len(),
                network.number_of_species()
            )));
        }
        if initial_state.iter().any(|&count| count < 0) {
            return Err(Error::Configuration(
                "the initial state has a negative count".to_owned(),
            ));
        }
        Ok(EnsembleRunner {
            network,
            initial_state,
            params,
        })
    }

    /// Builds a runner over a network and initial state previously published to the store.
    pub fn from_store<S: ObjectStore>(
        store: &S,
        network: ObjectId,
        initial_state: ObjectId,
        params: SimulationParameters,
    ) -> Result<EnsembleRunner> {
        EnsembleRunner::new(store.get(network)?, store.get(initial_state)?, params)
    }

    pub fn params(&self) -> &SimulationParameters {
        &self.params
    }

    /// Runs every trajectory to completion and returns the runs in seed order,
    /// regardless of the order in which the workers finished.
    pub fn run(&self) -> Result<EnsembleOutput> {
        let params = &self.params;
        info!(
            "running {} trajectories on {} threads",
            params.seeds.len(),
            params.threads
        );
        let pool = ThreadPoolBuilder::new()
            .num_threads(params.threads)
            .build()
            .map_err(|err| {
                Error::Configuration(format!("failed to build the thread pool: {err}"))
            })?;

        let runs: Vec<TrajectoryRun> = pool.install(|| {
            params
                .seeds
                .par_iter()
                .map(|&seed| TrajectoryRun {
                    seed,
                    outcome: run_trajectory(
                        self.network.clone(),
                        &self.initial_state,
                        &params.kinetics,
                        params.cutoff,
                        seed,
                    ),
                })
                .collect()
        });

        let output = EnsembleOutput { runs };
        for (seed, err) in output.failures() {
            warn!("the trajectory with seed {seed} failed: {err}");
        }
        info!(
            "finished {} trajectories, {} failed",
            output.runs.len(),
            output.failures().count()
        );
        Ok(output)
    }
}
