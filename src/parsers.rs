use crate::{
    config::KineticsConfig,
    network::ReactionNetwork,
    reaction::{ReactionDescriptor, SpeciesKeys},
    Error, Result,
};
use derive_new::new;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{digit0, digit1, multispace0},
    combinator::{all_consuming, map_res, opt},
    multi::separated_list0,
    number::complete::double,
    sequence::{delimited, preceded, terminated},
    IResult, Parser,
};
use rustc_hash::FxHashMap;
use std::{fs, iter, path::Path};

/// The result of parsing a line defining a new reversible reaction.
#[derive(Clone, Debug)]
struct NamedReaction {
    reactants: Vec<(String, u64)>,
    products: Vec<(String, u64)>,
    forward_free_energy: f64,
    backward_free_energy: Option<f64>,
}

/// The result of parsing a line setting the initial value of a species.
#[derive(Clone, Debug, new)]
struct Species {
    name: String,
    amount: u64,
}

/// Accumulates the species and reactions of one or more network description files.
#[derive(Default)]
pub struct ParseState {
    /// The declared species in declaration order, with their initial counts.
    species: Vec<(String, u64)>,
    species_index: FxHashMap<String, usize>,
    reactions: Vec<NamedReaction>,
}

/// An enum storing the result of parsing a line.
enum Line {
    Species(Species),
    Reaction(NamedReaction),
}

/// A parser for a nonnegative decimal number.
pub fn decimal(data: &str) -> IResult<&str, u64> {
    map_res(digit1, |s: &str| s.parse::<u64>()).parse(data)
}

fn species_name(data: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_').parse(data)
}

/// Parses a line of the form:
/// ```ignore
/// A = 5
/// ```
/// that declares the species `A` with an initial count of 5.
fn parse_species(data: &str) -> IResult<&str, Line> {
    let (rem, (name, _, _, _, amount)) =
        (species_name, multispace0, tag("="), multispace0, decimal).parse(data)?;

    Ok((rem, Line::Species(Species::new(name.to_owned(), amount))))
}

/// Parses a term of the form `2A`.
fn parse_reaction_item(data: &str) -> IResult<&str, (String, u64)> {
    let (rem, num): (&str, u64) = map_res(digit0, |s: &str| {
        if s.is_empty() {
            Ok(1)
        } else {
            s.parse::<u64>()
        }
    })
    .parse(data)?;
    let (rem, name) = species_name(rem)?;

    Ok((rem, (name.to_owned(), num)))
}

/// Parses one side of a reaction:
/// ```ignore
/// 2A + B
/// ```
fn parse_reaction_half(data: &str) -> IResult<&str, Vec<(String, u64)>> {
    separated_list0(
        delimited(multispace0, tag("+"), multispace0),
        parse_reaction_item,
    )
    .parse(data)
}

/// A parser for a full reversible reaction, of the form:
/// ```ignore
/// 2A + B <-> 3C, -0.35, 0.35
/// ```
/// The free energy of the backward reaction is optional and defaults to the negated forward one.
fn parse_reaction(reaction: &str) -> IResult<&str, Line> {
    let comma = || delimited(multispace0, tag(","), multispace0);
    let (rem, (reactants, _, products, _, forward_free_energy, backward_free_energy)) = (
        parse_reaction_half,
        delimited(multispace0, tag("<->"), multispace0),
        parse_reaction_half,
        comma(),
        double,
        opt(preceded(comma(), double)),
    )
        .parse(reaction)?;

    let res = NamedReaction {
        reactants,
        products,
        forward_free_energy,
        backward_free_energy,
    };

    Ok((rem, Line::Reaction(res)))
}

fn parse_line(line: &str) -> IResult<&str, Line> {
    all_consuming(terminated(alt((parse_species, parse_reaction)), multispace0)).parse(line)
}

fn expand(terms: &[(String, u64)]) -> SpeciesKeys {
    terms
        .iter()
        .flat_map(|(name, count)| iter::repeat_n(name.clone(), *count as usize))
        .collect()
}

impl ParseState {
    /// Parses a data file.
    /// The data file contains lines, each of which is either a species declaration
    /// with its initial count:
    /// ```ignore
    /// A = 5
    /// B = 0
    /// ```
    /// or a reversible reaction between declared species:
    /// ```ignore
    /// A + A <-> B, -0.2
    /// ```
    pub fn parse_data_file(&mut self, path: &Path) -> Result<&mut Self> {
        let data = fs::read_to_string(path).map_err(|err| Error::io(path, err))?;
        self.parse_str(&data, path)
    }

    /// Parses the contents of a data file. The path is only used to report errors.
    pub fn parse_str(&mut self, data: &str, path: &Path) -> Result<&mut Self> {
        for (number, line) in data.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (_, parsed) = parse_line(line).map_err(|err| {
                Error::parse(path, format!("line {}: {line:?}: {err:?}", number + 1))
            })?;
            match parsed {
                Line::Species(species) => match self.species_index.get(&species.name) {
                    Some(&idx) => self.species[idx].1 = species.amount,
                    None => {
                        self.species_index
                            .insert(species.name.clone(), self.species.len());
                        self.species.push((species.name, species.amount));
                    }
                },
                Line::Reaction(reaction) => self.reactions.push(reaction),
            }
        }
        Ok(self)
    }

    /// Gets the reaction network and the initial state.
    /// Species are indexed in declaration order, and every reaction may only use declared species.
    pub fn get_network(self, config: &KineticsConfig) -> Result<(ReactionNetwork, Vec<i64>)> {
        let descriptors: Vec<ReactionDescriptor> = self
            .reactions
            .iter()
            .map(|reaction| {
                ReactionDescriptor::new(
                    expand(&reaction.reactants),
                    expand(&reaction.products),
                    reaction.forward_free_energy,
                    reaction
                        .backward_free_energy
                        .unwrap_or(-reaction.forward_free_energy),
                )
            })
            .collect();

        let network = ReactionNetwork::with_species(
            self.species.iter().map(|(name, _)| name),
            &descriptors,
            config,
        )?;
        let initial_state = self
            .species
            .iter()
            .map(|&(_, amount)| {
                i64::try_from(amount).map_err(|_| {
                    Error::Configuration(format!("the initial count {amount} is too large"))
                })
            })
            .collect::<Result<_>>()?;
        Ok((network, initial_state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NETWORK: &str = "
        # Lithium ethylene carbonate chemistry, abridged.
        Li = 30
        EC = 30
        LiEC = 0
        LEDC = 0

        Li + EC <-> LiEC, -0.4
        2LiEC <-> LEDC, -1.2, 1.5
    ";

    #[test]
    fn parses_species_and_reversible_reactions() {
        let mut state = ParseState::default();
        state.parse_str(NETWORK, Path::new("inline")).unwrap();
        let (network, initial_state) = state.get_network(&KineticsConfig::default()).unwrap();

        assert_eq!(initial_state, vec![30, 30, 0, 0]);
        assert_eq!(network.number_of_reactions(), 4);
        assert_eq!(network.species_index("LEDC"), Some(3));
        assert_eq!(network.reactants(0), &[0, 1]);
        assert_eq!(network.free_energy(1), 0.4);
        assert_eq!(network.reactants(2), &[2, 2]);
        assert_eq!(network.products(3), &[2, 2]);
        assert_eq!(network.free_energy(3), 1.5);
    }

    #[test]
    fn undeclared_species_are_rejected() {
        let mut state = ParseState::default();
        state
            .parse_str("A = 1\nA + B <-> C, 0.1", Path::new("inline"))
            .unwrap();
        assert!(matches!(
            state.get_network(&KineticsConfig::default()),
            Err(Error::UnknownSpecies(name)) if name == "B"
        ));
    }

    #[test]
    fn malformed_lines_report_their_position() {
        let mut state = ParseState::default();
        let err = state
            .parse_str("A = 1\nA -> B, 0.1", Path::new("inline"))
            .err()
            .unwrap();
        assert!(matches!(&err, Error::Parse { message, .. } if message.starts_with("line 2")));
        assert!(ParseState::default()
            .parse_str("A = 1 trailing", Path::new("inline"))
            .is_err());
    }

    #[test]
    fn redeclaration_updates_the_count() {
        let mut state = ParseState::default();
        state
            .parse_str("A = 1\nB = 2\nA = 5\nA <-> B, 0", Path::new("inline"))
            .unwrap();
        let (network, initial_state) = state.get_network(&KineticsConfig::default()).unwrap();
        assert_eq!(initial_state, vec![5, 2]);
        assert_eq!(network.species_key(0), "A");
    }
}
