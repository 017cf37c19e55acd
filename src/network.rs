use std::ops::Range;

use itertools::Itertools;
use log::{debug, info};
use rustc_hash::FxHashMap;

use crate::{
    config::KineticsConfig,
    reaction::{
        apply_delta, falling_factorial, free_energy_from_rate, multiplicities, rate_constant,
        ReactionDescriptor,
    },
    reaction_graph::ReactionGraph,
    Error, Result,
};

/// Maps an external description of a molecule to the key of a species.
///
/// Identity resolution (for instance graph isomorphism against a molecule database)
/// lives outside this crate; the network only needs the resolved key.
pub trait SpeciesResolver {
    type Query: ?Sized;

    fn resolve(&self, query: &Self::Query) -> Option<String>;
}

/// An immutable reaction network: the species registry, the reaction table
/// and the dependency graph.
///
/// The reaction table is stored as a struct of arrays. The reactants of reaction `r` are
/// `reactants[reactant_offsets[r]..reactant_offsets[r + 1]]`, and likewise for products and
/// for the grouped `(species, multiplicity)` inputs used by the rate law.
#[derive(Clone, Debug)]
pub struct ReactionNetwork {
    species_keys: Vec<String>,
    species_index: FxHashMap<String, usize>,
    reactant_offsets: Vec<usize>,
    reactants: Vec<usize>,
    product_offsets: Vec<usize>,
    products: Vec<usize>,
    input_offsets: Vec<usize>,
    inputs: Vec<(usize, u32)>,
    free_energies: Vec<f64>,
    rate_constants: Vec<f64>,
    graph: ReactionGraph,
}

/// Registers species keys, assigning indices in order of first registration.
#[derive(Default)]
struct SpeciesRegistry {
    keys: Vec<String>,
    index: FxHashMap<String, usize>,
}

impl SpeciesRegistry {
    fn register(&mut self, key: &str) -> usize {
        if let Some(&idx) = self.index.get(key) {
            return idx;
        }
        let idx = self.keys.len();
        self.keys.push(key.to_owned());
        self.index.insert(key.to_owned(), idx);
        idx
    }

    fn lookup(&self, key: &str) -> Result<usize> {
        self.index
            .get(key)
            .copied()
            .ok_or_else(|| Error::UnknownSpecies(key.to_owned()))
    }
}

/// Accumulates the flat reaction table before the dependency graph is derived.
#[derive(Default)]
struct TableBuilder {
    reactant_offsets: Vec<usize>,
    reactants: Vec<usize>,
    product_offsets: Vec<usize>,
    products: Vec<usize>,
    free_energies: Vec<f64>,
    rate_constants: Vec<f64>,
}

impl TableBuilder {
    fn new() -> TableBuilder {
        TableBuilder {
            reactant_offsets: vec![0],
            product_offsets: vec![0],
            ..Default::default()
        }
    }

    fn push(&mut self, reactants: &[usize], products: &[usize], free_energy: f64, rate: f64) {
        self.reactants.extend_from_slice(reactants);
        self.reactant_offsets.push(self.reactants.len());
        self.products.extend_from_slice(products);
        self.product_offsets.push(self.products.len());
        self.free_energies.push(free_energy);
        self.rate_constants.push(rate);
    }

    fn finish(self, registry: SpeciesRegistry) -> ReactionNetwork {
        let reaction_count = self.rate_constants.len();
        let mut input_offsets = vec![0];
        let mut inputs = Vec::new();
        for r in 0..reaction_count {
            let reactants = &self.reactants[self.reactant_offsets[r]..self.reactant_offsets[r + 1]];
            inputs.extend(multiplicities(reactants));
            input_offsets.push(inputs.len());
        }

        let graph = ReactionGraph::from_reactions(
            registry.keys.len(),
            (0..reaction_count).map(|r| {
                (
                    &self.reactants[self.reactant_offsets[r]..self.reactant_offsets[r + 1]],
                    &self.products[self.product_offsets[r]..self.product_offsets[r + 1]],
                )
            }),
        );
        debug!("computed the dependency graph of {reaction_count} reactions");

        ReactionNetwork {
            species_keys: registry.keys,
            species_index: registry.index,
            reactant_offsets: self.reactant_offsets,
            reactants: self.reactants,
            product_offsets: self.product_offsets,
            products: self.products,
            input_offsets,
            inputs,
            free_energies: self.free_energies,
            rate_constants: self.rate_constants,
            graph,
        }
    }
}

impl ReactionNetwork {
    /// Builds a network from reversible reaction descriptors, registering species
    /// in order of first appearance (reactants, then products, in listed order).
    ///
    /// Descriptor `k` produces the forward reaction `2k` and the backward reaction `2k + 1`.
    pub fn from_descriptors(
        descriptors: &[ReactionDescriptor],
        config: &KineticsConfig,
    ) -> Result<ReactionNetwork> {
        let mut registry = SpeciesRegistry::default();
        for descriptor in descriptors {
            for key in descriptor.all_species() {
                registry.register(key);
            }
        }
        Self::build(registry, descriptors, config)
    }

    /// Builds a network over an explicit list of species.
    /// Fails if a descriptor references a key outside the list.
    pub fn with_species<S: AsRef<str>>(
        species: impl IntoIterator<Item = S>,
        descriptors: &[ReactionDescriptor],
        config: &KineticsConfig,
    ) -> Result<ReactionNetwork> {
        let mut registry = SpeciesRegistry::default();
        for key in species {
            let key = key.as_ref();
            if registry.index.contains_key(key) {
                return Err(Error::Configuration(format!(
                    "the species {key:?} is declared twice"
                )));
            }
            registry.register(key);
        }
        Self::build(registry, descriptors, config)
    }

    fn build(
        registry: SpeciesRegistry,
        descriptors: &[ReactionDescriptor],
        config: &KineticsConfig,
    ) -> Result<ReactionNetwork> {
        config.validate()?;
        let mut table = TableBuilder::new();
        for descriptor in descriptors {
            let reactants: Vec<usize> = descriptor
                .reactants
                .iter()
                .map(|key| registry.lookup(key))
                .collect::<Result<_>>()?;
            let products: Vec<usize> = descriptor
                .products
                .iter()
                .map(|key| registry.lookup(key))
                .collect::<Result<_>>()?;

            let coef = config.positive_weight_coefficient;
            let forward = descriptor.forward_free_energy;
            let backward = descriptor.backward_free_energy;
            table.push(&reactants, &products, forward, rate_constant(forward, coef));
            table.push(&products, &reactants, backward, rate_constant(backward, coef));
        }
        info!(
            "extracted {} species and {} reactions",
            registry.keys.len(),
            table.rate_constants.len()
        );
        Ok(table.finish(registry))
    }

    /// Builds a network from an already expanded reaction table, as stored in a network bundle.
    ///
    /// Species are keyed by their index. Free energies are recovered from the rate constants.
    pub fn from_table(
        species_count: usize,
        reactions: &[(Vec<usize>, Vec<usize>)],
        rate_constants: &[f64],
        config: &KineticsConfig,
    ) -> Result<ReactionNetwork> {
        config.validate()?;
        if reactions.len() != rate_constants.len() {
            return Err(Error::Configuration(format!(
                "{} reactions were given with {} rate constants",
                reactions.len(),
                rate_constants.len()
            )));
        }
        let mut registry = SpeciesRegistry::default();
        for idx in 0..species_count {
            registry.register(&idx.to_string());
        }

        let mut table = TableBuilder::new();
        let rows = reactions.iter().zip(rate_constants).enumerate();
        for (idx, ((reactants, products), &rate)) in rows {
            let mut listed = reactants.iter().chain(products);
            if let Some(&species) = listed.find(|&&s| s >= species_count) {
                return Err(Error::UnknownSpecies(species.to_string()));
            }
            if !(rate.is_finite() && rate > 0.) {
                return Err(Error::Configuration(format!(
                    "reaction {idx} has an invalid rate constant {rate}"
                )));
            }
            let free_energy = free_energy_from_rate(rate, config.positive_weight_coefficient);
            table.push(reactants, products, free_energy, rate);
        }
        Ok(table.finish(registry))
    }

    pub fn number_of_species(&self) -> usize {
        self.species_keys.len()
    }

    pub fn number_of_reactions(&self) -> usize {
        self.rate_constants.len()
    }

    /// Returns the key of the species with the given index.
    pub fn species_key(&self, species: usize) -> &str {
        &self.species_keys[species]
    }

    /// Returns the index of the species with the given key.
    pub fn species_index(&self, key: &str) -> Option<usize> {
        self.species_index.get(key).copied()
    }

    /// Resolves an external query to the index of a species.
    pub fn find_species<R: SpeciesResolver>(
        &self,
        resolver: &R,
        query: &R::Query,
    ) -> Option<usize> {
        resolver
            .resolve(query)
            .and_then(|key| self.species_index(&key))
    }

    fn span(offsets: &[usize], reaction: usize) -> Range<usize> {
        offsets[reaction]..offsets[reaction + 1]
    }

    /// The reactant species of the reaction, with repeats for multiplicity.
    pub fn reactants(&self, reaction: usize) -> &[usize] {
        &self.reactants[Self::span(&self.reactant_offsets, reaction)]
    }

    /// The product species of the reaction, with repeats for multiplicity.
    pub fn products(&self, reaction: usize) -> &[usize] {
        &self.products[Self::span(&self.product_offsets, reaction)]
    }

    /// The distinct reactant species of the reaction with their multiplicities.
    pub fn inputs(&self, reaction: usize) -> &[(usize, u32)] {
        &self.inputs[Self::span(&self.input_offsets, reaction)]
    }

    pub fn free_energy(&self, reaction: usize) -> f64 {
        self.free_energies[reaction]
    }

    pub fn rate_constant(&self, reaction: usize) -> f64 {
        self.rate_constants[reaction]
    }

    pub fn rate_constants(&self) -> &[f64] {
        &self.rate_constants
    }

    /// Whether the reaction lists the species among its products.
    pub fn produces(&self, reaction: usize, species: usize) -> bool {
        self.products(reaction).contains(&species)
    }

    /// The reactions having the species as a reactant, once per occurrence.
    pub fn reactant_to_reactions(&self, species: usize) -> &[usize] {
        self.graph.reactant_to_reactions(species)
    }

    /// The reactions whose propensity must be recomputed after the reaction fires.
    pub fn dependents(&self, reaction: usize) -> &[usize] {
        self.graph.dependents(reaction)
    }

    /// Computes the propensity of a reaction with combinatorial mass-action kinetics.
    pub fn propensity(&self, reaction: usize, state: &[i64]) -> f64 {
        self.inputs(reaction)
            .iter()
            .map(|&(species, count)| falling_factorial(state[species], count))
            .product::<f64>()
            * self.rate_constants[reaction]
    }

    /// Applies a single firing of the reaction to the state.
    pub fn apply(&self, reaction: usize, state: &mut [i64]) {
        apply_delta(state, self.reactants(reaction), self.products(reaction));
    }

    /// Builds a dense initial state from `(key, count)` pairs. Species not listed start at zero.
    pub fn initial_state<K: AsRef<str>>(
        &self,
        counts: impl IntoIterator<Item = (K, i64)>,
    ) -> Result<Vec<i64>> {
        let mut state = vec![0; self.number_of_species()];
        for (key, count) in counts {
            let key = key.as_ref();
            let species = self
                .species_index(key)
                .ok_or_else(|| Error::UnknownSpecies(key.to_owned()))?;
            if count < 0 {
                return Err(Error::Configuration(format!(
                    "the initial count of {key:?} is negative: {count}"
                )));
            }
            state[species] = count;
        }
        Ok(state)
    }

    /// Formats a reaction as `A + B -> C`, padded to 50 columns and followed by its free energy.
    pub fn describe_reaction(&self, reaction: usize) -> String {
        let side = |species: &[usize]| {
            species
                .iter()
                .map(|&s| self.species_key(s))
                .join(" + ")
        };
        let equation = format!(
            "{} -> {}",
            side(self.reactants(reaction)),
            side(self.products(reaction))
        );
        format!("{equation:<50}{}", self.free_energy(reaction))
    }
}

/// Opaque per-species data attached to a network for lookup only.
#[derive(Clone, Debug)]
pub struct SpeciesData<P> {
    data: FxHashMap<usize, P>,
}

impl<P> SpeciesData<P> {
    /// Keeps the entries whose key is registered in the network.
    pub fn from_entries<K: AsRef<str>>(
        network: &ReactionNetwork,
        entries: impl IntoIterator<Item = (K, P)>,
    ) -> SpeciesData<P> {
        let data = entries
            .into_iter()
            .filter_map(|(key, payload)| {
                network
                    .species_index(key.as_ref())
                    .map(|species| (species, payload))
            })
            .collect();
        SpeciesData { data }
    }

    pub fn get(&self, species: usize) -> Option<&P> {
        self.data.get(&species)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use rustc_hash::FxHashSet;
    use smallvec::smallvec;

    use super::*;

    fn descriptors() -> Vec<ReactionDescriptor> {
        vec![
            ReactionDescriptor::balanced(["A", "B"], ["C"], -0.2),
            ReactionDescriptor::balanced(["C", "C"], ["D"], 0.1),
            ReactionDescriptor::new(
                smallvec!["D".to_owned()],
                smallvec!["E".to_owned(), "A".to_owned()],
                0.3,
                -0.5,
            ),
        ]
    }

    fn network() -> ReactionNetwork {
        ReactionNetwork::from_descriptors(&descriptors(), &KineticsConfig::default()).unwrap()
    }

    #[test]
    fn species_are_indexed_by_first_appearance() {
        let network = network();
        let keys = (0..network.number_of_species())
            .map(|s| network.species_key(s))
            .collect_vec();
        assert_eq!(keys, ["A", "B", "C", "D", "E"]);
        assert_eq!(network.species_index("D"), Some(3));
        assert_eq!(network.species_index("Z"), None);
    }

    #[test]
    fn reactions_come_in_reversible_pairs() {
        let network = network();
        assert_eq!(network.number_of_reactions(), 6);
        assert_eq!(network.reactants(0), &[0, 1]);
        assert_eq!(network.products(0), &[2]);
        assert_eq!(network.reactants(1), &[2]);
        assert_eq!(network.products(1), &[0, 1]);
        assert_eq!(network.free_energy(4), 0.3);
        assert_eq!(network.free_energy(5), -0.5);
        assert!((network.rate_constant(2) - (-3.9f64).exp()).abs() < 1e-12);
        assert!((network.rate_constant(3) - 0.1f64.exp()).abs() < 1e-12);
        assert_eq!(network.inputs(2), &[(2, 2)]);
    }

    #[test]
    fn dependency_graph_covers_exactly_the_touched_reactions() {
        let network = network();
        for reaction in 0..network.number_of_reactions() {
            let mut expected = FxHashSet::default();
            for &species in network.reactants(reaction).iter().chain(network.products(reaction)) {
                for other in 0..network.number_of_reactions() {
                    if network.reactants(other).contains(&species) {
                        expected.insert(other);
                    }
                }
            }
            let actual: FxHashSet<usize> = network.dependents(reaction).iter().copied().collect();
            assert_eq!(actual, expected, "reaction {reaction}");
            assert_eq!(actual.len(), network.dependents(reaction).len());
            assert!(actual.contains(&reaction));
        }
    }

    #[test]
    fn propensity_uses_falling_factorials() {
        let network = network();
        let state = [3, 2, 4, 0, 0];
        assert!((network.propensity(0, &state) - 6. * network.rate_constant(0)).abs() < 1e-12);
        assert!((network.propensity(2, &state) - 12. * network.rate_constant(2)).abs() < 1e-12);
        assert_eq!(network.propensity(4, &state), 0.);
        assert_eq!(network.propensity(2, &[0, 0, 1, 0, 0]), 0.);
    }

    #[test]
    fn unregistered_species_are_rejected() {
        let config = KineticsConfig::default();
        let err = ReactionNetwork::with_species(["A", "B", "C"], &descriptors(), &config)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownSpecies(key) if key == "D"));

        let network = network();
        assert!(matches!(
            network.initial_state([("Q", 3)]),
            Err(Error::UnknownSpecies(_))
        ));
        assert!(matches!(
            network.initial_state([("A", -3)]),
            Err(Error::Configuration(_))
        ));
        assert_eq!(network.initial_state([("C", 7)]).unwrap(), vec![0, 0, 7, 0, 0]);
    }

    #[test]
    fn table_networks_validate_indices() {
        let reactions = vec![(vec![0], vec![1]), (vec![1], vec![2])];
        let err = ReactionNetwork::from_table(2, &reactions, &[1., 1.], &KineticsConfig::default())
            .unwrap_err();
        assert!(matches!(err, Error::UnknownSpecies(key) if key == "2"));

        let network =
            ReactionNetwork::from_table(3, &reactions, &[0.5, 2.], &KineticsConfig::default())
                .unwrap();
        assert_eq!(network.species_key(2), "2");
        assert_eq!(network.dependents(0), &[0, 1]);
        assert!((network.free_energy(1) + 2f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn reactions_are_described_with_keys() {
        let network = network();
        let line = network.describe_reaction(0);
        assert!(line.starts_with("A + B -> C"));
        assert_eq!(line.len(), 50 + "-0.2".len());
        assert!(line.ends_with("-0.2"));
    }

    struct Uppercase;

    impl SpeciesResolver for Uppercase {
        type Query = str;

        fn resolve(&self, query: &str) -> Option<String> {
            Some(query.to_uppercase())
        }
    }

    #[test]
    fn payloads_and_resolvers_map_to_indices() {
        let network = network();
        let data = SpeciesData::from_entries(&network, [("A", 1.5), ("Z", 2.5), ("E", 3.5)]);
        assert_eq!(data.len(), 2);
        assert_eq!(data.get(0), Some(&1.5));
        assert_eq!(data.get(4), Some(&3.5));
        assert_eq!(network.find_species(&Uppercase, "c"), Some(2));
        assert_eq!(network.find_species(&Uppercase, "z"), None);
    }
}
