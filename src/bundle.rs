//! Plain-text folders holding a serialized network, the parameters of an ensemble
//! and the histories it produced. Every file holds one value, or one list, per line.

use std::{
    collections::BTreeMap,
    fmt::Display,
    fs,
    path::{Path, PathBuf},
};

use itertools::Itertools;
use log::{info, warn};
use nom::{
    character::complete::{digit1, i64 as signed, multispace0, multispace1},
    combinator::{all_consuming, map_res},
    multi::separated_list0,
    number::complete::double,
    sequence::delimited,
    Parser,
};

use crate::{
    config::{Cutoff, KineticsConfig, SimulationParameters},
    gillespie::TrajectoryHistory,
    network::ReactionNetwork,
    parsers::decimal,
    Error, Result,
};

/// The subfolder of a network folder holding the simulation histories.
pub const HISTORIES_FOLDER: &str = "simulation_histories";

const NUMBER_OF_SPECIES: &str = "number_of_species";
const NUMBER_OF_REACTIONS: &str = "number_of_reactions";
const NUMBER_OF_REACTANTS: &str = "number_of_reactants";
const REACTANTS: &str = "reactants";
const NUMBER_OF_PRODUCTS: &str = "number_of_products";
const PRODUCTS: &str = "products";
const FACTOR_ZERO: &str = "factor_zero";
const FACTOR_TWO: &str = "factor_two";
const FACTOR_DUPLICATE: &str = "factor_duplicate";
const RATES: &str = "rates";
const INITIAL_STATE: &str = "initial_state";

const NUMBER_OF_THREADS: &str = "number_of_threads";
const STEP_CUTOFF: &str = "step_cutoff";
const TIME_CUTOFF: &str = "time_cutoff";
const NUMBER_OF_SEEDS: &str = "number_of_seeds";
const SEEDS: &str = "seeds";

const REACTIONS_PREFIX: &str = "reactions_";
const TIMES_PREFIX: &str = "times_";

/// Formats a float the way C's `%e` does, as in `1.500000e-03`.
pub fn format_exponential(value: f64) -> String {
    let formatted = format!("{value:.6e}");
    match formatted.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => formatted,
    }
}

fn index(data: &str) -> nom::IResult<&str, usize> {
    map_res(digit1, |s: &str| s.parse::<usize>()).parse(data)
}

/// Parses whitespace separated values, rejecting anything else.
fn parse_values<'a, P>(path: &Path, data: &'a str, parser: P) -> Result<Vec<P::Output>>
where
    P: Parser<&'a str, Error = nom::error::Error<&'a str>>,
{
    all_consuming(delimited(
        multispace0,
        separated_list0(multispace1, parser),
        multispace0,
    ))
    .parse(data)
    .map(|(_, values)| values)
    .map_err(|err| Error::parse(path, format!("{err:?}")))
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|err| Error::io(path, err))
}

fn read_values<'a, P>(
    path: &Path,
    data: &'a str,
    parser: P,
    expected: usize,
) -> Result<Vec<P::Output>>
where
    P: Parser<&'a str, Error = nom::error::Error<&'a str>>,
{
    let values = parse_values(path, data, parser)?;
    if values.len() != expected {
        return Err(Error::parse(
            path,
            format!("expected {expected} values, found {}", values.len()),
        ));
    }
    Ok(values)
}

fn read_count(path: &Path) -> Result<u64> {
    let data = read(path)?;
    Ok(read_values(path, &data, decimal, 1)?[0])
}

/// Reads one index list per reaction.
/// Lines may be empty, for a reaction without reactants or products.
fn read_index_lists(path: &Path, lengths: &[usize]) -> Result<Vec<Vec<usize>>> {
    let data = read(path)?;
    let mut lines = data.lines().collect_vec();
    while lines.len() > lengths.len() && lines.last().is_some_and(|line| line.trim().is_empty()) {
        lines.pop();
    }
    if lines.len() != lengths.len() {
        return Err(Error::parse(
            path,
            format!("expected {} lines, found {}", lengths.len(), lines.len()),
        ));
    }
    lines
        .into_iter()
        .zip(lengths)
        .map(|(line, &length)| read_values(path, line, index, length))
        .collect()
}

fn write_lines<T: Display>(path: &Path, values: impl IntoIterator<Item = T>) -> Result<()> {
    let mut contents = values.into_iter().join("\n");
    contents.push('\n');
    fs::write(path, contents).map_err(|err| Error::io(path, err))
}

fn create_folder(folder: &Path) -> Result<()> {
    fs::create_dir_all(folder).map_err(|err| Error::io(folder, err))
}

/// Writes a network and its initial state to a folder.
pub fn write_network(
    folder: &Path,
    network: &ReactionNetwork,
    initial_state: &[i64],
) -> Result<()> {
    if initial_state.len() != network.number_of_species() {
        return Err(Error::Configuration(format!(
            "the initial state has {} species but the network has {}",
            initial_state.len(),
            network.number_of_species()
        )));
    }
    create_folder(folder)?;
    let reactions = 0..network.number_of_reactions();

    write_lines(&folder.join(NUMBER_OF_SPECIES), [network.number_of_species()])?;
    write_lines(&folder.join(NUMBER_OF_REACTIONS), [network.number_of_reactions()])?;
    write_lines(
        &folder.join(NUMBER_OF_REACTANTS),
        reactions.clone().map(|r| network.reactants(r).len()),
    )?;
    write_lines(
        &folder.join(REACTANTS),
        reactions.clone().map(|r| network.reactants(r).iter().join(" ")),
    )?;
    write_lines(
        &folder.join(NUMBER_OF_PRODUCTS),
        reactions.clone().map(|r| network.products(r).len()),
    )?;
    write_lines(
        &folder.join(PRODUCTS),
        reactions.map(|r| network.products(r).iter().join(" ")),
    )?;
    for factor in [FACTOR_ZERO, FACTOR_TWO, FACTOR_DUPLICATE] {
        write_lines(&folder.join(factor), [format_exponential(1.)])?;
    }
    write_lines(
        &folder.join(RATES),
        network.rate_constants().iter().map(|&rate| format_exponential(rate)),
    )?;
    write_lines(&folder.join(INITIAL_STATE), initial_state)?;

    info!(
        "wrote {} species and {} reactions to {folder:?}",
        network.number_of_species(),
        network.number_of_reactions()
    );
    Ok(())
}

/// Reads a network and its initial state from a folder.
///
/// Species are keyed by their index, and free energies are recovered from the rate constants.
pub fn read_network(folder: &Path, config: &KineticsConfig) -> Result<(ReactionNetwork, Vec<i64>)> {
    let species_count = read_count(&folder.join(NUMBER_OF_SPECIES))? as usize;
    let reaction_count = read_count(&folder.join(NUMBER_OF_REACTIONS))? as usize;

    let path = folder.join(NUMBER_OF_REACTANTS);
    let reactant_counts = read_values(&path, &read(&path)?, index, reaction_count)?;
    let reactants = read_index_lists(&folder.join(REACTANTS), &reactant_counts)?;
    let path = folder.join(NUMBER_OF_PRODUCTS);
    let product_counts = read_values(&path, &read(&path)?, index, reaction_count)?;
    let products = read_index_lists(&folder.join(PRODUCTS), &product_counts)?;

    for factor in [FACTOR_ZERO, FACTOR_TWO, FACTOR_DUPLICATE] {
        let path = folder.join(factor);
        let value = read_values(&path, &read(&path)?, double, 1)?[0];
        if value != 1. {
            warn!("ignoring the legacy scaling factor {factor} = {value}");
        }
    }

    let path = folder.join(RATES);
    let rates = read_values(&path, &read(&path)?, double, reaction_count)?;
    let path = folder.join(INITIAL_STATE);
    let initial_state = read_values(&path, &read(&path)?, signed, species_count)?;
    if let Some(species) = initial_state.iter().position(|&count| count < 0) {
        return Err(Error::parse(
            path,
            format!("species {species} has a negative count"),
        ));
    }

    let table = reactants.into_iter().zip(products).collect_vec();
    let network = ReactionNetwork::from_table(species_count, &table, &rates, config)?;
    info!(
        "read {species_count} species and {reaction_count} reactions from {folder:?}"
    );
    Ok((network, initial_state))
}

/// Writes the parameters of an ensemble to a folder.
pub fn write_params(folder: &Path, params: &SimulationParameters) -> Result<()> {
    params.validate()?;
    create_folder(folder)?;
    // A stale cutoff of the other kind would make the folder ambiguous.
    let (cutoff, stale) = match params.cutoff {
        Cutoff::Steps(steps) => {
            write_lines(&folder.join(STEP_CUTOFF), [steps])?;
            (STEP_CUTOFF, TIME_CUTOFF)
        }
        Cutoff::Time(time) => {
            write_lines(&folder.join(TIME_CUTOFF), [time])?;
            (TIME_CUTOFF, STEP_CUTOFF)
        }
    };
    let stale = folder.join(stale);
    if stale.exists() {
        fs::remove_file(&stale).map_err(|err| Error::io(&stale, err))?;
    }
    write_lines(&folder.join(NUMBER_OF_THREADS), [params.threads])?;
    write_lines(&folder.join(NUMBER_OF_SEEDS), [params.seeds.len()])?;
    write_lines(&folder.join(SEEDS), &params.seeds)?;
    info!(
        "wrote {} seeds with a {cutoff} to {folder:?}",
        params.seeds.len()
    );
    Ok(())
}

/// Reads the parameters of an ensemble from a folder.
pub fn read_params(folder: &Path, kinetics: KineticsConfig) -> Result<SimulationParameters> {
    let threads = read_count(&folder.join(NUMBER_OF_THREADS))? as usize;

    let step_path = folder.join(STEP_CUTOFF);
    let time_path = folder.join(TIME_CUTOFF);
    let cutoff = match (step_path.exists(), time_path.exists()) {
        (true, false) => Cutoff::Steps(read_count(&step_path)?),
        (false, true) => {
            let data = read(&time_path)?;
            Cutoff::Time(read_values(&time_path, &data, double, 1)?[0])
        }
        (true, true) => {
            return Err(Error::Configuration(format!(
                "{folder:?} sets both a step cutoff and a time cutoff"
            )))
        }
        (false, false) => {
            return Err(Error::Configuration(format!(
                "{folder:?} sets neither a step cutoff nor a time cutoff"
            )))
        }
    };

    let number_of_seeds = read_count(&folder.join(NUMBER_OF_SEEDS))? as usize;
    let path = folder.join(SEEDS);
    let seeds = parse_values(&path, &read(&path)?, decimal)?;
    if seeds.len() != number_of_seeds {
        return Err(Error::Configuration(format!(
            "{folder:?} announces {number_of_seeds} seeds but lists {}",
            seeds.len()
        )));
    }

    let params = SimulationParameters::builder()
        .threads(threads)
        .cutoff(cutoff)
        .seeds(seeds)
        .kinetics(kinetics)
        .build();
    params.validate()?;
    Ok(params)
}

/// Writes the history of a trajectory as `reactions_<seed>` and `times_<seed>`.
pub fn write_history(folder: &Path, history: &TrajectoryHistory) -> Result<()> {
    create_folder(folder)?;
    let seed = history.seed;
    write_lines(&folder.join(format!("{REACTIONS_PREFIX}{seed}")), &history.reactions)?;
    write_lines(&folder.join(format!("{TIMES_PREFIX}{seed}")), &history.times)
}

/// Writes histories to the histories subfolder of a network folder, returning the subfolder.
pub fn write_histories<'t>(
    network_folder: &Path,
    histories: impl IntoIterator<Item = &'t TrajectoryHistory>,
) -> Result<PathBuf> {
    let folder = network_folder.join(HISTORIES_FOLDER);
    let mut written = 0;
    for history in histories {
        write_history(&folder, history)?;
        written += 1;
    }
    info!("wrote {written} histories to {folder:?}");
    Ok(folder)
}

fn history_files(folder: &Path) -> Result<(BTreeMap<u64, PathBuf>, BTreeMap<u64, PathBuf>)> {
    let mut reactions = BTreeMap::new();
    let mut times = BTreeMap::new();
    let entries = fs::read_dir(folder).map_err(|err| Error::io(folder, err))?;
    for entry in entries {
        let path = entry.map_err(|err| Error::io(folder, err))?.path();
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let (files, seed) = if let Some(seed) = name.strip_prefix(REACTIONS_PREFIX) {
            (&mut reactions, seed)
        } else if let Some(seed) = name.strip_prefix(TIMES_PREFIX) {
            (&mut times, seed)
        } else {
            continue;
        };
        let seed = seed
            .parse::<u64>()
            .map_err(|_| Error::parse(&path, format!("{seed:?} is not a seed")))?;
        files.insert(seed, path);
    }
    Ok((reactions, times))
}

/// Reads the history of a trajectory.
pub fn read_history(folder: &Path, seed: u64) -> Result<TrajectoryHistory> {
    let reactions_path = folder.join(format!("{REACTIONS_PREFIX}{seed}"));
    let reactions = parse_values(&reactions_path, &read(&reactions_path)?, index)?;
    let times_path = folder.join(format!("{TIMES_PREFIX}{seed}"));
    let times = parse_values(&times_path, &read(&times_path)?, double)?;
    if reactions.len() != times.len() {
        return Err(Error::parse(
            times_path,
            format!("{} times for {} reactions", times.len(), reactions.len()),
        ));
    }
    Ok(TrajectoryHistory {
        seed,
        reactions,
        times,
    })
}

/// Lists the seeds of the histories in a folder, in increasing order.
///
/// Fails unless every reaction history has a time history with the same seed, and conversely.
pub fn history_seeds(folder: &Path) -> Result<Vec<u64>> {
    let (reactions, times) = history_files(folder)?;
    if !reactions.keys().eq(times.keys()) {
        let unpaired = reactions
            .keys()
            .filter(|seed| !times.contains_key(seed))
            .chain(times.keys().filter(|seed| !reactions.contains_key(seed)))
            .join(", ");
        return Err(Error::parse(
            folder,
            format!("the reaction and time histories do not share their seeds: {unpaired}"),
        ));
    }
    Ok(reactions.into_keys().collect())
}

/// Reads every history of the histories subfolder of a network folder, in seed order.
pub fn read_histories(network_folder: &Path) -> Result<Vec<TrajectoryHistory>> {
    let folder = network_folder.join(HISTORIES_FOLDER);
    history_seeds(&folder)?
        .into_iter()
        .map(|seed| read_history(&folder, seed))
        .collect()
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::reaction::ReactionDescriptor;

    fn network() -> (ReactionNetwork, Vec<i64>) {
        let descriptors = vec![
            ReactionDescriptor::balanced(["A", "B"], ["C"], -0.25),
            ReactionDescriptor::balanced(["C", "C"], ["D"], 0.1),
            ReactionDescriptor::balanced(["D"], Vec::<&str>::new(), 0.5),
        ];
        let network =
            ReactionNetwork::from_descriptors(&descriptors, &KineticsConfig::default()).unwrap();
        let state = network.initial_state([("A", 40), ("B", 25), ("D", 1)]).unwrap();
        (network, state)
    }

    #[test]
    fn exponential_notation_matches_c() {
        assert_eq!(format_exponential(1.), "1.000000e+00");
        assert_eq!(format_exponential(0.0015), "1.500000e-03");
        assert_eq!(format_exponential(123456789.), "1.234568e+08");
        assert_eq!(format_exponential(2e-120), "2.000000e-120");
    }

    #[test]
    fn networks_survive_a_round_trip() {
        let dir = tempdir().unwrap();
        let (network, state) = network();
        write_network(dir.path(), &network, &state).unwrap();

        assert_eq!(fs::read_to_string(dir.path().join(FACTOR_TWO)).unwrap(), "1.000000e+00\n");
        let reactants = fs::read_to_string(dir.path().join(REACTANTS)).unwrap();
        assert_eq!(reactants.lines().nth(2), Some("2 2"));

        let (read, read_state) = read_network(dir.path(), &KineticsConfig::default()).unwrap();
        assert_eq!(read_state, state);
        assert_eq!(read.number_of_species(), network.number_of_species());
        assert_eq!(read.number_of_reactions(), network.number_of_reactions());
        assert_eq!(read.species_key(2), "2");
        for reaction in 0..network.number_of_reactions() {
            assert_eq!(read.reactants(reaction), network.reactants(reaction));
            assert_eq!(read.products(reaction), network.products(reaction));
            let rate = network.rate_constant(reaction);
            assert!((read.rate_constant(reaction) - rate).abs() <= 1e-6 * rate);
            assert!((read.free_energy(reaction) - network.free_energy(reaction)).abs() < 1e-5);
        }
        assert_eq!(read.dependents(0), network.dependents(0));
    }

    #[test]
    fn count_mismatches_are_parse_errors() {
        let dir = tempdir().unwrap();
        let (network, state) = network();
        write_network(dir.path(), &network, &state).unwrap();
        fs::write(dir.path().join(RATES), "1.000000e+00\n").unwrap();
        assert!(matches!(
            read_network(dir.path(), &KineticsConfig::default()),
            Err(Error::Parse { .. })
        ));

        write_network(dir.path(), &network, &state).unwrap();
        fs::write(dir.path().join(NUMBER_OF_REACTANTS), "2\n2\n2\n1\n1\n0\n").unwrap();
        assert!(matches!(
            read_network(dir.path(), &KineticsConfig::default()),
            Err(Error::Parse { .. })
        ));

        write_network(dir.path(), &network, &state).unwrap();
        fs::remove_file(dir.path().join(PRODUCTS)).unwrap();
        assert!(matches!(
            read_network(dir.path(), &KineticsConfig::default()),
            Err(Error::Io { .. })
        ));
    }

    #[test]
    fn params_survive_a_round_trip() {
        let dir = tempdir().unwrap();
        let params = SimulationParameters::builder()
            .threads(3)
            .cutoff(Cutoff::Time(2.5))
            .seeds(vec![11, 7, 1 << 40])
            .build();
        write_params(dir.path(), &params).unwrap();
        assert_eq!(read_params(dir.path(), KineticsConfig::default()).unwrap(), params);

        let params = SimulationParameters { cutoff: Cutoff::Steps(200), ..params };
        write_params(dir.path(), &params).unwrap();
        assert!(!dir.path().join(TIME_CUTOFF).exists());
        assert_eq!(read_params(dir.path(), KineticsConfig::default()).unwrap(), params);
    }

    #[test]
    fn conflicting_params_are_rejected() {
        let dir = tempdir().unwrap();
        let params = SimulationParameters::builder()
            .cutoff(Cutoff::Steps(10))
            .seeds(vec![1, 2])
            .build();
        write_params(dir.path(), &params).unwrap();

        fs::write(dir.path().join(TIME_CUTOFF), "1.0\n").unwrap();
        assert!(matches!(
            read_params(dir.path(), KineticsConfig::default()),
            Err(Error::Configuration(_))
        ));

        fs::remove_file(dir.path().join(TIME_CUTOFF)).unwrap();
        fs::remove_file(dir.path().join(STEP_CUTOFF)).unwrap();
        assert!(matches!(
            read_params(dir.path(), KineticsConfig::default()),
            Err(Error::Configuration(_))
        ));

        fs::write(dir.path().join(STEP_CUTOFF), "10\n").unwrap();
        fs::write(dir.path().join(NUMBER_OF_SEEDS), "3\n").unwrap();
        assert!(matches!(
            read_params(dir.path(), KineticsConfig::default()),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn histories_are_paired_by_seed() {
        let dir = tempdir().unwrap();
        let histories = vec![
            TrajectoryHistory {
                seed: 42,
                reactions: vec![0, 3, 1],
                times: vec![0.125, 1.0 / 3.0, 2e-7 + 1.],
            },
            TrajectoryHistory { seed: 7, reactions: vec![], times: vec![] },
        ];
        let folder = write_histories(dir.path(), &histories).unwrap();
        assert_eq!(folder, dir.path().join(HISTORIES_FOLDER));

        let read = read_histories(dir.path()).unwrap();
        assert_eq!(read, vec![histories[1].clone(), histories[0].clone()]);

        fs::remove_file(folder.join("times_7")).unwrap();
        assert!(matches!(read_histories(dir.path()), Err(Error::Parse { .. })));

        fs::write(folder.join("times_7"), "0.5\n").unwrap();
        assert!(matches!(read_history(&folder, 7), Err(Error::Parse { .. })));
    }
}
