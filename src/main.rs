use std::{path::PathBuf, process::ExitCode, time::Instant};

use clap::{command, Args, Parser, Subcommand};
use itertools::Itertools;
use kdam::tqdm;
use log::{error, info, warn};
use rnmc::{
    analysis, bundle,
    config::{DEFAULT_POSITIVE_WEIGHT_COEFFICIENT, DEFAULT_TERMINATION_THRESHOLD},
    ensemble, Cutoff, EnsembleRunner, KineticsConfig, ObjectStore, ParseState, PathwayAnalyzer,
    ReactionNetwork, Seeds, SharedStore, SimulationParameters,
};

// See also `clap_cargo::style::CLAP_STYLING`
pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);

#[derive(Debug, Parser)]
#[command(
    name = "rnmc",
    about = "Kinetic Monte Carlo simulation of chemical reaction networks.",
    long_about = "A program for the simulation of chemical reaction networks with Gillespie's
direct method, and for the analysis of the pathways leading to a species.
Networks are described by text files in the format:

Li = 30
EC = 30
LiEC = 0
Li + EC <-> LiEC, -0.4

The system above has three species. Li and EC can react to form LiEC, and the reaction
has a free energy change of -0.4 eV. The backward reaction has the opposite free energy
change unless a second value is given.",
    styles = CLAP_STYLING,
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Converts text network descriptions to a network folder,
    /// and writes the simulation parameters.
    Serialize(SerializeArgs),
    /// Simulates an ensemble of trajectories and writes their histories to the network folder.
    Run(RunArgs),
    /// Summarizes the histories of a network folder and extracts the pathways to target species.
    Analyze(AnalyzeArgs),
}

#[derive(Debug, Args)]
struct KineticsArgs {
    /// Scales the free energy of uphill reactions when deriving their rate constant.
    #[arg(long, default_value_t = DEFAULT_POSITIVE_WEIGHT_COEFFICIENT)]
    positive_weight_coefficient: f64,

    /// Trajectories terminate once their total propensity drops below this value.
    #[arg(long, default_value_t = DEFAULT_TERMINATION_THRESHOLD)]
    termination_threshold: f64,
}

impl From<&KineticsArgs> for KineticsConfig {
    fn from(args: &KineticsArgs) -> Self {
        KineticsConfig {
            positive_weight_coefficient: args.positive_weight_coefficient,
            termination_threshold: args.termination_threshold,
        }
    }
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
struct CutoffArgs {
    /// The number of reactions to simulate in each trajectory.
    #[arg(long)]
    step_cutoff: Option<u64>,

    /// The amount of time to simulate in each trajectory.
    #[arg(long)]
    time_cutoff: Option<f64>,
}

#[derive(Debug, Args)]
#[group(required = false, multiple = false)]
struct SeedArgs {
    /// The seeds of the trajectories.
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    seeds: Option<Vec<u64>>,

    /// The number of trajectories, each with a freshly drawn seed.
    #[arg(long)]
    simulations: Option<usize>,
}

#[derive(Debug, Args)]
struct SerializeArgs {
    /// The paths to the files specifying the chemical reaction network.
    #[arg(num_args = 1.., required = true)]
    data: Vec<PathBuf>,

    /// The folder to write the network to.
    #[arg(long)]
    network_folder: PathBuf,

    /// The folder to write the simulation parameters to.
    #[arg(long)]
    params_folder: PathBuf,

    /// The number of worker threads.
    #[arg(long, default_value_t = 1)]
    threads: usize,

    #[command(flatten)]
    cutoff: CutoffArgs,

    #[command(flatten)]
    seeds: SeedArgs,

    #[command(flatten)]
    kinetics: KineticsArgs,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// The folder holding the network.
    #[arg(long)]
    network_folder: PathBuf,

    /// The folder holding the simulation parameters.
    #[arg(long)]
    params_folder: PathBuf,

    #[command(flatten)]
    kinetics: KineticsArgs,
}

#[derive(Debug, Args)]
struct AnalyzeArgs {
    /// The folder holding the network and its simulation histories.
    #[arg(long)]
    network_folder: PathBuf,

    /// The indices of the species to extract pathways to.
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    targets: Vec<usize>,

    /// How many entries of each ranking to print.
    #[arg(long, default_value_t = 10)]
    top: usize,

    #[command(flatten)]
    kinetics: KineticsArgs,
}

/// The number of trajectories when neither seeds nor a number of simulations are given.
const DEFAULT_SIMULATIONS: usize = 100;

fn serialize(args: SerializeArgs) -> rnmc::Result<()> {
    let kinetics = KineticsConfig::from(&args.kinetics);
    let mut parse_state = ParseState::default();
    for path in &args.data {
        parse_state.parse_data_file(path)?;
    }
    let (network, initial_state) = parse_state.get_network(&kinetics)?;
    bundle::write_network(&args.network_folder, &network, &initial_state)?;

    let cutoff = match (args.cutoff.step_cutoff, args.cutoff.time_cutoff) {
        (Some(steps), _) => Cutoff::Steps(steps),
        (None, Some(time)) => Cutoff::Time(time),
        (None, None) => {
            return Err(rnmc::Error::Configuration(
                "either a step cutoff or a time cutoff is required".to_owned(),
            ))
        }
    };
    let seeds = match args.seeds {
        SeedArgs {
            seeds: Some(seeds), ..
        } => Seeds::Explicit(seeds),
        SeedArgs {
            simulations: count, ..
        } => Seeds::Random {
            count: count.unwrap_or(DEFAULT_SIMULATIONS),
        },
    };
    let params = SimulationParameters::builder()
        .threads(args.threads)
        .cutoff(cutoff)
        .seeds(seeds.resolve())
        .kinetics(kinetics)
        .build();
    bundle::write_params(&args.params_folder, &params)
}

fn run(args: RunArgs) -> rnmc::Result<()> {
    let kinetics = KineticsConfig::from(&args.kinetics);
    let (network, initial_state) = bundle::read_network(&args.network_folder, &kinetics)?;
    let params = bundle::read_params(&args.params_folder, kinetics)?;

    let store = SharedStore::connect("rnmc")?;
    let (network_id, state_id) = ensemble::publish(&store, network, initial_state)?;
    let runner = EnsembleRunner::from_store(&store, network_id, state_id, params)?;

    let start_time = Instant::now();
    let output = runner.run()?;
    info!("simulated the ensemble in {:.3}s", start_time.elapsed().as_secs_f64());

    bundle::write_histories(&args.network_folder, output.histories())?;
    let failed = output.failures().map(|(seed, _)| seed).collect_vec();
    if !failed.is_empty() {
        warn!("no history was written for the seeds {}", failed.iter().join(", "));
    }
    Ok(())
}

fn print_pathways(
    network: &ReactionNetwork,
    analyzer: &PathwayAnalyzer,
    target: usize,
    top: usize,
) {
    let Some(report) = analyzer.report(target) else {
        return;
    };
    println!("pathways to species {}:", network.species_key(target));
    for pathway in report.pathways.iter().take(top) {
        println!("  frequency {}", pathway.frequency);
        for &reaction in &pathway.reactions {
            println!("    {}", network.describe_reaction(reaction));
        }
    }
    for (seed, err) in &report.failures {
        println!("  trajectory {seed} failed: {err}");
    }
}

fn analyze(args: AnalyzeArgs) -> rnmc::Result<()> {
    let kinetics = KineticsConfig::from(&args.kinetics);
    let (network, initial_state) = bundle::read_network(&args.network_folder, &kinetics)?;

    let folder = args.network_folder.join(bundle::HISTORIES_FOLDER);
    let seeds = bundle::history_seeds(&folder)?;
    let mut histories = Vec::with_capacity(seeds.len());
    for seed in tqdm!(seeds.into_iter(), desc = "Loading histories") {
        histories.push(bundle::read_history(&folder, seed)?);
    }

    let final_states: Vec<Vec<i64>> = histories
        .iter()
        .map(|history| analysis::final_state(&network, &initial_state, &history.reactions))
        .collect::<rnmc::Result<_>>()?;
    println!("final counts over {} trajectories:", final_states.len());
    let statistics = analysis::final_state_statistics(&final_states);
    for (species, summary) in statistics.iter().take(args.top) {
        println!(
            "  {:<10}{:>12.3} ± {:.3}",
            network.species_key(*species),
            summary.mean,
            summary.std_dev
        );
    }

    println!("most frequent reactions:");
    for (reaction, summary) in analysis::reaction_tally(&histories).iter().take(args.top) {
        println!(
            "  {}{:>12.3} ± {:.3}",
            network.describe_reaction(*reaction),
            summary.mean,
            summary.std_dev
        );
    }

    let mut analyzer = PathwayAnalyzer::new(&network, &initial_state, &histories);
    for (target, result) in analyzer.analyze_targets(&args.targets) {
        match result {
            Ok(()) => print_pathways(&network, &analyzer, target, args.top),
            Err(err) => error!("failed to analyze species {target}: {err}"),
        }
    }
    Ok(())
}

fn run_cli(cli: Cli) -> rnmc::Result<()> {
    match cli.command {
        Command::Serialize(args) => serialize(args),
        Command::Run(args) => run(args),
        Command::Analyze(args) => analyze(args),
    }
}

pub fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match run_cli(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
