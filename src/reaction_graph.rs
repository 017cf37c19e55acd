use itertools::chain;

/// The reactions affected by each species and by each reaction firing.
#[derive(Clone, Debug)]
pub struct ReactionGraph {
    /// For every species, the reactions having it as a reactant.
    /// A reaction consuming a species twice is listed twice.
    reactant_to_reactions: Vec<Vec<usize>>,
    /// For every reaction, the deduplicated reactions whose propensity changes when it fires.
    dependents: Vec<Vec<usize>>,
}

impl ReactionGraph {
    /// Builds the graph from the reactant and product lists of every reaction.
    pub fn from_reactions<'t>(
        species_count: usize,
        reactions: impl Iterator<Item = (&'t [usize], &'t [usize])> + Clone,
    ) -> ReactionGraph {
        let mut reactant_to_reactions = vec![Vec::new(); species_count];
        for (idx, (reactants, _)) in reactions.clone().enumerate() {
            for &species in reactants {
                reactant_to_reactions[species].push(idx);
            }
        }

        let dependents = reactions
            .map(|(reactants, products)| {
                let mut affected = Vec::new();
                for &species in chain!(reactants, products) {
                    affected.extend_from_slice(&reactant_to_reactions[species]);
                }
                affected.sort_unstable();
                affected.dedup();
                affected
            })
            .collect();

        ReactionGraph {
            reactant_to_reactions,
            dependents,
        }
    }

    /// Returns the indices of the reactions having the species as a reactant.
    pub fn reactant_to_reactions(&self, species: usize) -> &[usize] {
        &self.reactant_to_reactions[species]
    }

    /// Returns the indices of the reactions whose propensity must be recomputed
    /// after the reaction fires.
    pub fn dependents(&self, reaction: usize) -> &[usize] {
        &self.dependents[reaction]
    }
}
