use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use multistate::hazard::{Family, Integration, SplineScale};
use multistate::params::HazardSpec;
use multistate::population::Population;
use multistate::sampler::{SamplingMethod, SurvivalSampler};
use multistate::simulator::{ClockPolicy, SimulationConfig, Simulator};
use multistate::transition::{EdgeHazard, TransitionMatrix, TransitionModel};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

fn illness_death(n_rows: usize, healthy_to_sick: Family, params: &[f64]) -> TransitionModel {
    let matrix =
        TransitionMatrix::from_ids(&[vec![0, 1, 2], vec![3, 0, 4], vec![0, 0, 0]]).unwrap();
    let mut specs = vec![(1, HazardSpec::constant(healthy_to_sick, params).unwrap())];
    for (id, rate) in [(2, 0.05), (3, 0.2), (4, 0.3)] {
        specs.push((id, HazardSpec::constant(Family::Exponential, &[rate]).unwrap()));
    }
    let hazards = specs
        .into_iter()
        .map(|(id, spec)| (id, EdgeHazard::intercept(spec, n_rows)))
        .collect();
    TransitionModel::new(matrix, hazards).unwrap()
}

fn spline() -> Family {
    Family::Spline {
        knots: vec![-1.0, 1.0, 3.0],
        scale: SplineScale::LogCumHazard,
        integration: Integration::quadrature(),
    }
}

fn benchmark_sampler(c: &mut Criterion) {
    let sampler = SurvivalSampler::default();
    let cases = [
        ("weibull_closed_form", Family::Weibull, vec![1.3, 8.0], SamplingMethod::default()),
        ("gamma_continuous", Family::Gamma, vec![1.5, 0.1], SamplingMethod::ContinuousInverseCdf),
        ("spline_continuous", spline(), vec![-1.5, 1.2, 0.01], SamplingMethod::ContinuousInverseCdf),
        (
            "spline_discrete",
            spline(),
            vec![-1.5, 1.2, 0.01],
            SamplingMethod::DiscreteInversion { step: 0.05 },
        ),
    ];

    let mut group = c.benchmark_group("survival_sampler");
    for (name, family, params, method) in cases {
        let model = family.build(&params).unwrap();
        group.bench_function(name, |b| {
            let mut rng = ChaCha20Rng::seed_from_u64(0x5EED);
            b.iter(|| {
                let draw = sampler
                    .sample(black_box(&model), method, 2.0, 100.0, &mut rng)
                    .unwrap();
                black_box(draw);
            });
        });
    }
    group.finish();
}

fn benchmark_trajectories(c: &mut Criterion) {
    let sizes = [1_000_usize, 10_000];
    let mut group = c.benchmark_group("trajectories");
    group.sample_size(10);
    for &size in &sizes {
        let population = Population::uniform(&[1], size as u64, 0).unwrap();
        let models = [
            ("exponential", illness_death(size, Family::Exponential, &[0.1])),
            ("spline", illness_death(size, spline(), &[-1.5, 1.2, 0.01])),
        ];
        group.throughput(Throughput::Elements(size as u64));
        for (name, model) in &models {
            let config = SimulationConfig {
                clock: ClockPolicy::Forward,
                max_time: Some(50.0),
                seed: 1,
                ..SimulationConfig::default()
            };
            let simulator = Simulator::new(model, &population, config).unwrap();
            group.bench_with_input(BenchmarkId::new(*name, size), &simulator, |b, simulator| {
                b.iter(|| {
                    let trajectories = simulator.run().unwrap();
                    black_box(trajectories);
                });
            });
        }
    }
    group.finish();
}

criterion_group!(trajectory_benchmark, benchmark_sampler, benchmark_trajectories);
criterion_main!(trajectory_benchmark);
