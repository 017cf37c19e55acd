use std::{path::Path, sync::Arc};

use kdam::tqdm;
use rand::{rngs::StdRng, SeedableRng};

use crate::{
    config::KineticsConfig, gillespie::Gillespie, parsers::ParseState, reaction::rate_constant,
};

/// The system:
///
/// A <-> B
///
/// with a downhill forward reaction, starting from A only.
const ISOMERIZATION: &str = "
    A = 10
    B = 0
    A <-> B, -0.05
";

/// Tests that replicate trajectories of the system:
///
/// A <-> B
///
/// relax towards detailed balance, `k_f A = k_b B` in expectation,
/// with the total propensity declining from its initial value.
#[test]
pub fn test_isomerization_detailed_balance() {
    let config = KineticsConfig::default();
    let mut parse_state = ParseState::default();
    parse_state
        .parse_str(ISOMERIZATION, Path::new("isomerization"))
        .unwrap();
    let (network, initial_state) = parse_state.get_network(&config).unwrap();
    let network = Arc::new(network);

    let k_f = rate_constant(-0.05, config.positive_weight_coefficient);
    let k_b = rate_constant(0.05, config.positive_weight_coefficient);
    let total = initial_state.iter().sum::<i64>() as f64;
    // At equilibrium, the count of A is binomial with this success probability.
    let p = k_b / (k_f + k_b);

    let n = 2000;
    let mut final_a = 0.;
    let mut final_propensity = 0.;
    let mut initial_propensity = 0.;
    for seed in tqdm!(0..n, desc = "A <-> B") {
        let mut sim = Gillespie::new(
            network.clone(),
            &initial_state,
            &config,
            seed,
            StdRng::seed_from_u64(seed),
        )
        .unwrap();
        initial_propensity += sim.total_propensity();
        sim.run_until(20.).unwrap();
        final_a += sim.state()[0] as f64;
        final_propensity += sim.total_propensity();
    }
    let n = n as f64;
    let mean_a = final_a / n;
    let mean_b = total - mean_a;

    let tolerance = 5. * (total * p * (1. - p) / n).sqrt();
    assert!(
        (mean_a - total * p).abs() < tolerance,
        "mean A = {mean_a}, expected {}",
        total * p
    );
    assert!((k_f * mean_a - k_b * mean_b).abs() < 5. * k_f * tolerance);
    assert!((initial_propensity / n - k_f * total).abs() < 1e-9);
    assert!(final_propensity / n < 0.5 * initial_propensity / n);
}
