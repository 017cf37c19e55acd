//! Kinetic Monte Carlo simulation of chemical reaction networks with Gillespie's direct method,
//! ensemble runs over many seeds, and reconstruction of the pathways that led to a species.

pub mod analysis;
pub mod bundle;
mod choice_tree;
pub use choice_tree::ChoiceTree;
pub mod config;
pub use config::{Cutoff, KineticsConfig, Seeds, SimulationParameters};
pub mod ensemble;
pub use ensemble::{EnsembleOutput, EnsembleRunner, TrajectoryRun};
mod error;
pub use error::{Error, Result};
mod gillespie;
pub use gillespie::{Gillespie, Status, TrajectoryHistory};
pub mod network;
pub use network::{ReactionNetwork, SpeciesData, SpeciesResolver};
mod parsers;
pub use parsers::ParseState;
pub mod pathways;
pub use pathways::{Pathway, PathwayAnalyzer, PathwayReport};
pub mod reaction;
pub use reaction::ReactionDescriptor;
mod reaction_graph;
pub use reaction_graph::ReactionGraph;
pub mod store;
pub use store::{ObjectId, ObjectStore, SharedStore};
#[cfg(test)]
mod tests;

/// The seed used by default for reproducible runs.
pub const DEFAULT_SEED: u64 = 0x5eed;
