/// Tests for the Gaussian outcome family and its sampler.
use approx::assert_relative_eq;
use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use mh_bart::data::SufficientStatistics;
use mh_bart::gaussian::{GaussianBartSampler, GaussianData, GaussianOutcome, GaussianSuf};
use mh_bart::sampler::{BartSettings, LeafPrior};
use mh_bart::splits::CutpointStrategy;

fn suf_of(residuals: &[f64]) -> GaussianSuf {
    let mut suf = GaussianSuf::default();
    for &residual in residuals {
        suf.update(&GaussianData::new(residual, 0.0));
    }
    suf
}

#[test]
fn test_suf_accumulates() {
    let suf = suf_of(&[1.0, 2.0, 3.0]);
    assert_eq!(suf.n(), 3.0);
    assert_eq!(suf.sum(), 6.0);
    assert_relative_eq!(suf.ybar(), 2.0);
    assert_relative_eq!(suf.sample_var(), 1.0);
}

#[test]
fn test_residual_tracks_mean_shifts() {
    use mh_bart::data::ResidualData;
    let mut row = GaussianData::new(3.0, 1.0);
    assert_eq!(row.residual(), 2.0);
    row.add_to_residual(0.5);
    assert_eq!(row.residual(), 2.5);
    row.add_to_residual(-0.5);
    assert_eq!(row.residual(), 2.0);
    assert_eq!(row.y(), 3.0);
}

#[test]
fn test_posterior_moments() {
    let outcome = GaussianOutcome::new(2.0, 3.0);
    assert_eq!(outcome.sigsq(), 4.0);
    let prior = LeafPrior {
        mean: 0.0,
        sd: 10.0,
    };
    let suf = suf_of(&[5.0; 10]);

    // ivar = 10 / 4 + 1 / 100 = 2.51, mean = (50 / 4) / 2.51.
    let (mean, variance) = outcome.posterior_moments(&suf, &prior);
    assert_relative_eq!(variance, 1.0 / 2.51);
    assert_relative_eq!(mean, 12.5 / 2.51);
}

#[test]
fn test_small_nodes_have_no_likelihood() {
    use mh_bart::sampler::Outcome;
    let outcome = GaussianOutcome::new(1.0, 3.0);
    let prior = LeafPrior { mean: 0.0, sd: 1.0 };
    assert_eq!(
        outcome.log_integrated_likelihood(&suf_of(&[1.0; 4]), &prior),
        f64::NEG_INFINITY
    );
    assert!(outcome
        .log_integrated_likelihood(&suf_of(&[1.0; 5]), &prior)
        .is_finite());
}

#[test]
fn test_separating_clusters_raises_likelihood() {
    use mh_bart::sampler::Outcome;
    let outcome = GaussianOutcome::new(1.0, 3.0);
    let prior = LeafPrior { mean: 0.0, sd: 1.0 };

    let left = suf_of(&[-2.0; 5]);
    let right = suf_of(&[2.0; 5]);
    let parent = suf_of(&[-2.0, -2.0, -2.0, -2.0, -2.0, 2.0, 2.0, 2.0, 2.0, 2.0]);

    let split = outcome.log_integrated_likelihood(&left, &prior)
        + outcome.log_integrated_likelihood(&right, &prior);
    let pooled = outcome.log_integrated_likelihood(&parent, &prior);
    assert!(split > pooled);
}

fn synthetic(n: usize, p: usize, seed: u64) -> (Array2<f64>, Array1<f64>) {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut predictors = Array2::zeros((n, p));
    let mut response = Array1::zeros(n);
    for i in 0..n {
        for j in 0..p {
            predictors[[i, j]] = rng.gen::<f64>();
        }
        response[i] =
            3.0 * predictors[[i, 0]] + (rng.gen::<f64>() - 0.5) * 0.2;
    }
    (predictors, response)
}

fn settings(n_trees: usize) -> BartSettings {
    BartSettings::new(
        n_trees,
        0.95,
        2.0,
        LeafPrior {
            mean: 0.0,
            sd: 1.0 / (n_trees as f64).sqrt(),
        },
        20,
        CutpointStrategy::UniformContinuous,
    )
}

#[test]
fn test_sweeps_preserve_residual_decomposition() {
    let (predictors, response) = synthetic(80, 3, 11);
    let rng = Xoshiro256PlusPlus::seed_from_u64(99);
    let mut sampler = GaussianBartSampler::from_data(
        predictors,
        response.clone(),
        settings(10),
        1.0,
        3.0,
        rng,
    )
    .unwrap();

    for _ in 0..10 {
        sampler.step();
    }
    assert_eq!(sampler.sweeps(), 10);

    // Every row's residual must equal its response minus the full
    // ensemble prediction, whatever moves were accepted.
    let predictions = sampler.predictions();
    for (i, row) in sampler.residuals().iter().enumerate() {
        assert_relative_eq!(
            row.residual(),
            response[i] - predictions[i],
            epsilon = 1e-8
        );
    }
}

#[test]
fn test_sigma_draw_is_positive_and_finite() {
    let (predictors, response) = synthetic(60, 2, 5);
    let rng = Xoshiro256PlusPlus::seed_from_u64(1);
    let mut sampler =
        GaussianBartSampler::from_data(predictors, response, settings(5), 1.0, 3.0, rng)
            .unwrap();
    for _ in 0..20 {
        sampler.step();
        let sigsq = sampler.outcome().sigsq();
        assert!(sigsq.is_finite() && sigsq > 0.0);
    }
}

#[test]
fn test_variable_inclusion_counts_splits() {
    let (predictors, response) = synthetic(80, 3, 2);
    let rng = Xoshiro256PlusPlus::seed_from_u64(3);
    let mut sampler =
        GaussianBartSampler::from_data(predictors, response, settings(10), 1.0, 3.0, rng)
            .unwrap();
    for _ in 0..30 {
        sampler.step();
    }

    let counts = sampler.variable_inclusion();
    assert_eq!(counts.len(), 3);
    let total: u32 = counts.iter().sum();
    let splits: usize = (0..sampler.model().number_of_trees())
        .map(|t| sampler.model().tree(t).splits().len())
        .sum();
    assert_eq!(total as usize, splits);
}

#[test]
fn test_mismatched_response_length_fails() {
    let (predictors, _) = synthetic(40, 2, 5);
    let response = Array1::zeros(39);
    let rng = Xoshiro256PlusPlus::seed_from_u64(1);
    let result =
        GaussianBartSampler::from_data(predictors, response, settings(5), 1.0, 3.0, rng);
    assert!(result.is_err());
}
