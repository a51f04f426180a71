use multistate::hazard::{Family, HazardModel, Integration};
use multistate::sampler::{Draw, SamplingMethod, SurvivalSampler};
use rand::SeedableRng;
use rand::distributions::Open01;
use rand::Rng;
use rand_chacha::ChaCha20Rng;

const DRAWS: usize = 20_000;

/// Empirical survival `P(T > t)` of the draws; non-events count as surviving.
fn empirical_survival(draws: &[Draw], t: f64) -> f64 {
    let surviving = draws
        .iter()
        .filter(|d| match d {
            Draw::Event(time) => *time > t,
            Draw::NoEvent => true,
        })
        .count();
    surviving as f64 / draws.len() as f64
}

/// Asserts the empirical survival lies within five binomial standard errors.
fn assert_survival_close(draws: &[Draw], t: f64, expected: f64, label: &str) {
    let observed = empirical_survival(draws, t);
    let se = (expected * (1.0 - expected) / draws.len() as f64).sqrt();
    assert!(
        (observed - expected).abs() <= 5.0 * se + 1e-3,
        "{label}: S({t}) = {observed}, expected {expected} (se {se})"
    );
}

fn targets(seed: u64, n: usize) -> Vec<f64> {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let u: f64 = rng.sample(Open01);
            -u.ln()
        })
        .collect()
}

#[test]
fn exponential_draws_match_survival_function_on_both_numerical_paths() {
    let rate = 0.5;
    let model = Family::Exponential.build(&[rate]).unwrap();
    let sampler = SurvivalSampler::default();
    let targets = targets(17, DRAWS);

    for method in [
        SamplingMethod::DiscreteInversion { step: 0.01 },
        SamplingMethod::ContinuousInverseCdf,
    ] {
        let draws: Vec<Draw> = targets
            .iter()
            .map(|&target| {
                sampler
                    .invert(&model, method, 0.0, f64::INFINITY, target)
                    .unwrap()
            })
            .collect();
        for t in [0.25, 0.5, 1.0, 2.0, 4.0, 8.0] {
            assert_survival_close(&draws, t, (-rate * t).exp(), &format!("{method:?}"));
        }
    }
}

#[test]
fn closed_form_path_matches_survival_function() {
    let model = Family::Weibull.build(&[1.5, 4.0]).unwrap();
    let sampler = SurvivalSampler::default();
    let mut rng = ChaCha20Rng::seed_from_u64(3);
    let draws: Vec<Draw> = (0..DRAWS)
        .map(|_| {
            sampler
                .sample(&model, SamplingMethod::default(), 0.0, f64::INFINITY, &mut rng)
                .unwrap()
        })
        .collect();
    for t in [1.0, 3.0, 6.0] {
        let expected = model.survival(t).unwrap();
        assert_survival_close(&draws, t, expected, "weibull");
    }
}

#[test]
fn left_truncated_piecewise_exponential_matches_analytic_distribution() {
    let model = Family::PiecewiseExponential {
        breaks: vec![0.0, 5.0, 10.0, 15.0],
    }
    .build(&[0.5, 0.8, 1.2, 1.5])
    .unwrap();
    let sampler = SurvivalSampler::default();
    let lower = 8.0;
    let conditional = |t: f64| (-model.cumulative_hazard(lower, t).unwrap()).exp();

    // Closed-form quantile path through the generator.
    let mut rng = ChaCha20Rng::seed_from_u64(5);
    let draws: Vec<Draw> = (0..DRAWS)
        .map(|_| {
            sampler
                .sample(&model, SamplingMethod::default(), lower, f64::INFINITY, &mut rng)
                .unwrap()
        })
        .collect();
    assert!(draws.iter().all(|d| matches!(d, Draw::Event(t) if *t >= lower)));
    for t in [8.5, 9.0, 10.0, 10.5, 11.0, 12.0] {
        assert_survival_close(&draws, t, conditional(t), "closed form");
    }

    // The numerical strategies must agree with the same truncated law.
    let targets = targets(23, DRAWS);
    for method in [
        SamplingMethod::DiscreteInversion { step: 0.01 },
        SamplingMethod::ContinuousInverseCdf,
    ] {
        let draws: Vec<Draw> = targets
            .iter()
            .map(|&target| sampler.invert(&model, method, lower, 40.0, target).unwrap())
            .collect();
        assert!(draws.iter().all(|d| matches!(d, Draw::Event(t) if *t >= lower)));
        for t in [9.0, 10.0, 11.0] {
            assert_survival_close(&draws, t, conditional(t), &format!("{method:?}"));
        }
    }
}

#[test]
fn flexible_family_with_constant_hazard_samples_an_exponential() {
    // Single power with a zero coefficient: log h(t) = ln 0.4.
    let rate: f64 = 0.4;
    let families = [
        (
            Family::FractionalPolynomial {
                powers: vec![0.5],
                integration: Integration::quadrature(),
            },
            SamplingMethod::ContinuousInverseCdf,
        ),
        (
            Family::FractionalPolynomial {
                powers: vec![0.5],
                integration: Integration::Riemann { step: 0.01 },
            },
            SamplingMethod::DiscreteInversion { step: 0.01 },
        ),
    ];
    let sampler = SurvivalSampler::default();
    for (family, method) in families {
        let model: HazardModel = family.build(&[rate.ln(), 0.0]).unwrap();
        assert!(!model.has_closed_form_inverse());
        let mut rng = ChaCha20Rng::seed_from_u64(29);
        let draws: Vec<Draw> = (0..5_000)
            .map(|_| {
                sampler
                    .sample(&model, method, 0.0, f64::INFINITY, &mut rng)
                    .unwrap()
            })
            .collect();
        for t in [0.5, 2.0, 5.0] {
            assert_survival_close(&draws, t, (-rate * t).exp(), &format!("{method:?}"));
        }
    }
}

#[test]
fn upper_bound_censors_draws() {
    let model = Family::Exponential.build(&[1.0]).unwrap();
    let sampler = SurvivalSampler::default();
    let mut rng = ChaCha20Rng::seed_from_u64(31);
    let draws: Vec<Draw> = (0..DRAWS)
        .map(|_| {
            sampler
                .sample(&model, SamplingMethod::default(), 0.0, 1.0, &mut rng)
                .unwrap()
        })
        .collect();
    assert!(draws.iter().all(|d| match d {
        Draw::Event(t) => *t < 1.0,
        Draw::NoEvent => true,
    }));
    let censored = draws.iter().filter(|d| **d == Draw::NoEvent).count() as f64 / DRAWS as f64;
    let expected = (-1.0f64).exp();
    let se = (expected * (1.0 - expected) / DRAWS as f64).sqrt();
    assert!((censored - expected).abs() < 5.0 * se);
}
