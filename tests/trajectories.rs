use multistate::hazard::{Family, Integration, SplineScale};
use multistate::occupancy::state_probabilities;
use multistate::params::HazardSpec;
use multistate::population::{Population, PopulationRow};
use multistate::sampler::SamplingMethod;
use multistate::simulator::{ClockPolicy, Outcome, SimulationConfig, Simulator, Trajectory};
use multistate::transition::{EdgeHazard, TransitionMatrix, TransitionModel};

const HEALTHY: usize = 0;
const SICK: usize = 1;
const DEAD: usize = 2;

fn illness_death_matrix() -> TransitionMatrix {
    // 1: healthy -> sick, 2: healthy -> dead, 3: sick -> healthy, 4: sick -> dead
    TransitionMatrix::from_ids(&[vec![0, 1, 2], vec![3, 0, 4], vec![0, 0, 0]]).unwrap()
}

fn exponential_illness_death(n_rows: usize) -> TransitionModel {
    let hazards = [0.1, 0.05, 0.2, 0.3]
        .iter()
        .enumerate()
        .map(|(index, &rate)| {
            let spec = HazardSpec::constant(Family::Exponential, &[rate]).unwrap();
            (index + 1, EdgeHazard::intercept(spec, n_rows))
        })
        .collect();
    TransitionModel::new(illness_death_matrix(), hazards).unwrap()
}

/// Illness-death model mixing closed-form, semi-analytic and flexible
/// families with three parameter samples.
fn mixed_illness_death(n_rows: usize) -> TransitionModel {
    let spline = Family::Spline {
        knots: vec![-1.0, 1.0, 3.0],
        scale: SplineScale::LogCumHazard,
        integration: Integration::quadrature(),
    };
    let fracpoly = Family::FractionalPolynomial {
        powers: vec![0.0, 1.0],
        integration: Integration::Riemann { step: 0.05 },
    };
    let edges = vec![
        (
            1,
            HazardSpec::from_samples(
                Family::Weibull,
                &[vec![1.3, 9.0], vec![1.2, 10.0], vec![1.4, 8.0]],
                SamplingMethod::default(),
            ),
        ),
        (
            2,
            HazardSpec::from_samples(
                Family::Gamma,
                &[vec![1.5, 0.05], vec![1.4, 0.06], vec![1.6, 0.04]],
                SamplingMethod::default(),
            ),
        ),
        (
            3,
            HazardSpec::from_samples(
                spline,
                &[vec![-1.5, 1.2, 0.01], vec![-1.4, 1.1, 0.02], vec![-1.6, 1.3, 0.0]],
                SamplingMethod::ContinuousInverseCdf,
            ),
        ),
        (
            4,
            HazardSpec::from_samples(
                fracpoly,
                &[vec![-1.5, 0.2, 0.01], vec![-1.4, 0.1, 0.02], vec![-1.6, 0.3, 0.0]],
                SamplingMethod::DiscreteInversion { step: 0.05 },
            ),
        ),
    ];
    let hazards = edges
        .into_iter()
        .map(|(id, spec)| (id, EdgeHazard::intercept(spec.unwrap(), n_rows)))
        .collect();
    TransitionModel::new(illness_death_matrix(), hazards).unwrap()
}

fn assert_trajectory_invariants(trajectory: &Trajectory, horizon: f64, absorbing: usize) {
    let records = &trajectory.records;
    let Some(last) = records.last() else {
        assert_eq!(trajectory.initial_state, absorbing);
        return;
    };
    assert_eq!(records[0].from, trajectory.initial_state);
    assert_eq!(records[0].time_start, 0.0);
    for record in records {
        assert!(
            record.time_start < record.time_stop,
            "empty interval in {record:?}"
        );
        assert!(record.time_stop <= horizon, "record beyond horizon: {record:?}");
    }
    for pair in records.windows(2) {
        assert_eq!(pair[0].to, pair[1].from);
        assert_eq!(pair[0].time_stop, pair[1].time_start);
        assert!(!pair[0].censored && !pair[0].is_final);
    }
    assert!(last.is_final);
    match trajectory.outcome {
        Outcome::Absorbed => {
            assert_eq!(last.to, absorbing);
            assert!(!last.censored);
        }
        Outcome::Censored => {
            assert!(last.censored);
            assert_eq!(last.from, last.to);
            assert_eq!(last.time_stop, horizon);
        }
    }
}

#[test]
fn illness_death_first_sojourn_matches_competing_exponentials() {
    let n = 100_000;
    let model = exponential_illness_death(n);
    let population = Population::uniform(&[1], n as u64, HEALTHY).unwrap();
    let config = SimulationConfig {
        seed: 20_240_601,
        ..SimulationConfig::default()
    };
    let trajectories = Simulator::new(&model, &population, config)
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(trajectories.len(), n);

    let mut total_first_sojourn = 0.0;
    let mut first_to_dead = 0usize;
    for trajectory in &trajectories {
        assert_eq!(trajectory.outcome, Outcome::Absorbed);
        let first = &trajectory.records[0];
        total_first_sojourn += first.time_stop - first.time_start;
        if first.to == DEAD {
            first_to_dead += 1;
        }
    }
    let mean_sojourn = total_first_sojourn / n as f64;
    let expected_sojourn = 1.0 / (0.1 + 0.05);
    // Standard error of the mean of an exponential is its mean over sqrt(n).
    let se = expected_sojourn / (n as f64).sqrt();
    assert!(
        (mean_sojourn - expected_sojourn).abs() < 5.0 * se,
        "mean first sojourn {mean_sojourn}, expected {expected_sojourn}"
    );

    let fraction_dead = first_to_dead as f64 / n as f64;
    let p = 0.05 / 0.15;
    let se = (p * (1.0 - p) / n as f64).sqrt();
    assert!(
        (fraction_dead - p).abs() < 5.0 * se,
        "fraction dying first {fraction_dead}, expected {p}"
    );
}

#[test]
fn reset_and_forward_clocks_agree_for_constant_hazards() {
    let n = 20_000;
    let model = exponential_illness_death(n);
    let population = Population::uniform(&[1], n as u64, HEALTHY).unwrap();
    let times = [1.0, 3.0, 6.0, 9.0];

    let occupancy = |clock: ClockPolicy, seed: u64| {
        let config = SimulationConfig {
            clock,
            max_time: Some(10.0),
            seed,
            ..SimulationConfig::default()
        };
        let trajectories = Simulator::new(&model, &population, config)
            .unwrap()
            .run()
            .unwrap();
        for trajectory in &trajectories {
            assert_trajectory_invariants(trajectory, 10.0, DEAD);
        }
        state_probabilities(&trajectories, 3, &times).unwrap()
    };
    let reset = occupancy(ClockPolicy::Reset, 1);
    let forward = occupancy(ClockPolicy::Forward, 2);
    assert_eq!(reset.len(), forward.len());
    for (r, f) in reset.iter().zip(&forward) {
        assert_eq!((r.time, r.state), (f.time, f.state));
        let p = 0.5 * (r.probability + f.probability);
        let se = (2.0 * p * (1.0 - p) / n as f64).sqrt();
        assert!(
            (r.probability - f.probability).abs() <= 5.0 * se + 1e-3,
            "state {} at t = {}: reset {} vs forward {}",
            r.state,
            r.time,
            r.probability,
            f.probability
        );
    }
}

#[test]
fn mixed_family_trajectories_respect_invariants_under_every_clock() {
    let n = 200;
    let model = mixed_illness_death(n);
    let mut rows = Vec::new();
    for patient in 0..n as u64 {
        let mut row = PopulationRow::new(1 + patient % 2, patient, if patient % 3 == 0 { SICK } else { HEALTHY });
        row.start_age = 50.0 + (patient % 30) as f64;
        rows.push(row);
    }
    let population = Population::new(rows).unwrap();

    for clock in [
        ClockPolicy::Reset,
        ClockPolicy::Forward,
        ClockPolicy::Mixed {
            reset_states: vec![SICK],
        },
    ] {
        let config = SimulationConfig {
            clock,
            max_time: Some(40.0),
            max_age: Some(100.0),
            seed: 99,
            ..SimulationConfig::default()
        };
        let simulator = Simulator::new(&model, &population, config).unwrap();
        let trajectories = simulator.run().unwrap();
        assert_eq!(trajectories.len(), n * 3);
        for (index, trajectory) in trajectories.iter().enumerate() {
            let row = index / 3;
            assert_eq!(trajectory.unit.sample, index % 3);
            assert_eq!(trajectory.unit.patient_id, row as u64);
            let horizon = simulator.horizon(row).unwrap();
            assert_trajectory_invariants(trajectory, horizon, DEAD);
        }
    }
}

#[test]
fn results_do_not_depend_on_thread_count() {
    let n = 150;
    let model = mixed_illness_death(n);
    let population = Population::uniform(&[1, 2, 3], 50, HEALTHY).unwrap();
    let config = SimulationConfig {
        clock: ClockPolicy::Forward,
        max_time: Some(30.0),
        seed: 4242,
        ..SimulationConfig::default()
    };
    let simulator = Simulator::new(&model, &population, config).unwrap();
    let run_with = |threads: usize| {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .unwrap()
            .install(|| simulator.run().unwrap())
    };
    let single = run_with(1);
    let parallel = run_with(4);
    assert_eq!(single, parallel);

    // A different seed gives different trajectories.
    let reseeded = Simulator::new(
        &model,
        &population,
        SimulationConfig {
            clock: ClockPolicy::Forward,
            max_time: Some(30.0),
            seed: 4243,
            ..SimulationConfig::default()
        },
    )
    .unwrap()
    .run()
    .unwrap();
    assert_ne!(single, reseeded);
}
