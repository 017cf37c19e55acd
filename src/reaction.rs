use derive_new::new;
use smallvec::SmallVec;

/// The species lists of a reaction are usually short, so they are stored inline.
pub type SpeciesKeys = SmallVec<[String; 3]>;

/// A reversible elementary reaction, described by the keys of its species.
///
/// Every descriptor expands to two reactions in the network table: the forward
/// reaction `reactants -> products` and the backward reaction `products -> reactants`.
/// Repeated keys describe multiplicity, so `2A -> B` is written with `A` listed twice.
#[derive(Clone, Debug, PartialEq, new)]
pub struct ReactionDescriptor {
    pub reactants: SpeciesKeys,
    pub products: SpeciesKeys,
    /// The free energy change of the forward reaction.
    pub forward_free_energy: f64,
    /// The free energy change of the backward reaction.
    pub backward_free_energy: f64,
}

impl ReactionDescriptor {
    /// A descriptor whose backward free energy is the negation of the forward one.
    pub fn balanced<R, P>(reactants: R, products: P, free_energy: f64) -> ReactionDescriptor
    where
        R: IntoIterator,
        R::Item: Into<String>,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        ReactionDescriptor::new(
            reactants.into_iter().map(Into::into).collect(),
            products.into_iter().map(Into::into).collect(),
            free_energy,
            -free_energy,
        )
    }

    /// Iterates over the reactant keys and then the product keys, in the listed order.
    pub fn all_species(&self) -> impl Iterator<Item = &str> {
        self.reactants
            .iter()
            .chain(self.products.iter())
            .map(String::as_str)
    }
}

/// Computes the rate constant of a reaction from its free energy change.
///
/// Uphill reactions are suppressed by `exp(-coefficient * dG)`, downhill reactions
/// are rated `exp(-dG)`.
pub fn rate_constant(free_energy: f64, positive_weight_coefficient: f64) -> f64 {
    if free_energy > 0. {
        (-positive_weight_coefficient * free_energy).exp()
    } else {
        (-free_energy).exp()
    }
}

/// Inverts [`rate_constant`], recovering the free energy change from a rate constant.
pub fn free_energy_from_rate(rate: f64, positive_weight_coefficient: f64) -> f64 {
    if rate < 1. {
        -rate.ln() / positive_weight_coefficient
    } else {
        -rate.ln()
    }
}

/// Computes the falling factorial `n (n - 1) ... (n - m + 1)`,
/// the number of ordered selections of `m` molecules out of `n`.
/// Zero whenever `n < m`.
pub fn falling_factorial(n: i64, m: u32) -> f64 {
    match m {
        0 => 1.,
        _ if n < m as i64 => 0.,
        1 => n as f64,
        2 => n as f64 * (n - 1) as f64,
        m => (0..m as i64).map(|i| (n - i) as f64).product(),
    }
}

/// Groups a reactant list into distinct species and their multiplicity,
/// in order of first appearance.
pub fn multiplicities(reactants: &[usize]) -> SmallVec<[(usize, u32); 4]> {
    let mut res: SmallVec<[(usize, u32); 4]> = SmallVec::new();
    for &species in reactants {
        match res.iter_mut().find(|(s, _)| *s == species) {
            Some((_, count)) => *count += 1,
            None => res.push((species, 1)),
        }
    }
    res
}

/// Applies the stoichiometric change of one firing to the state:
/// -1 per reactant occurrence and +1 per product occurrence.
pub fn apply_delta(state: &mut [i64], reactants: &[usize], products: &[usize]) {
    for &species in reactants {
        state[species] -= 1;
    }
    for &species in products {
        state[species] += 1;
    }
}
