/// Tests for the binomial logit outcome family and its sampler.
use approx::assert_relative_eq;
use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use mh_bart::data::{ResidualData, SufficientStatistics};
use mh_bart::logit::{LogitBartSampler, LogitData, LogitOutcome, LogitSuf};
use mh_bart::math::sigmoid;
use mh_bart::sampler::{BartSettings, LeafPrior, Outcome};
use mh_bart::splits::CutpointStrategy;

#[test]
fn test_latent_residual_reacts_to_prediction() {
    let mut row = LogitData::new(3, 10);
    row.set_latent_data(4.0, 2.0);
    assert_eq!(row.prediction(), 0.0);
    assert_eq!(row.information_weighted_residual_sum(), 2.0);

    // Removing a tree that contributed 0.5 lowers the stored prediction
    // and grows the residual by information * 0.5.
    row.add_to_residual(0.5);
    assert_relative_eq!(row.prediction(), -0.5);
    assert_relative_eq!(row.information_weighted_residual_sum(), 4.0);

    row.add_to_residual(-0.5);
    assert_relative_eq!(row.prediction(), 0.0);
    assert_relative_eq!(row.information_weighted_residual_sum(), 2.0);
}

#[test]
fn test_suf_accumulates_weighted_residuals() {
    let mut first = LogitData::new(1, 4);
    first.set_latent_data(2.0, 1.0);
    let mut second = LogitData::new(0, 3);
    second.set_latent_data(1.5, -0.5);
    second.add_to_residual(-1.0);

    let mut suf = LogitSuf::default();
    suf.update(&first);
    suf.update(&second);

    assert_eq!(suf.trials(), 7.0);
    assert_relative_eq!(suf.sum_of_information(), 3.5);
    assert_relative_eq!(
        suf.information_weighted_residual_sum(),
        1.0 + (-0.5 - 1.0 * 1.5)
    );
}

#[test]
fn test_posterior_moments() {
    let outcome = LogitOutcome::new();
    let prior = LeafPrior { mean: 0.0, sd: 2.0 };
    let mut row = LogitData::new(5, 10);
    row.set_latent_data(4.0, 3.0);
    let mut suf = LogitSuf::default();
    suf.update(&row);

    // ivar = 4 + 1/4 = 4.25, mean = 3 / 4.25.
    let (mean, variance) = outcome.posterior_moments(&suf, &prior);
    assert_relative_eq!(variance, 1.0 / 4.25);
    assert_relative_eq!(mean, 3.0 / 4.25);
}

#[test]
fn test_small_nodes_have_no_likelihood() {
    let outcome = LogitOutcome::new();
    let prior = LeafPrior { mean: 0.0, sd: 1.0 };

    let mut row = LogitData::new(2, 4);
    row.set_latent_data(2.0, 1.0);
    let mut suf = LogitSuf::default();
    suf.update(&row);
    assert_eq!(
        outcome.log_integrated_likelihood(&suf, &prior),
        f64::NEG_INFINITY
    );

    let mut row = LogitData::new(2, 5);
    row.set_latent_data(2.0, 1.0);
    let mut suf = LogitSuf::default();
    suf.update(&row);
    assert!(outcome.log_integrated_likelihood(&suf, &prior).is_finite());

    // Enough trials but no imputed information yet.
    let suf = {
        let row = LogitData::new(2, 5);
        let mut suf = LogitSuf::default();
        suf.update(&row);
        suf
    };
    assert_eq!(
        outcome.log_integrated_likelihood(&suf, &prior),
        f64::NEG_INFINITY
    );
}

#[test]
fn test_imputation_summaries_are_positive() {
    let mut outcome = LogitOutcome::new();
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
    let mut rows = vec![
        LogitData::new(0, 6),
        LogitData::new(3, 6),
        LogitData::new(6, 6),
    ];
    outcome.draw_global(&mut rng, &mut rows);

    for row in &rows {
        assert!(row.sum_of_information() > 0.0);
        assert!(row.sum_of_information().is_finite());
        assert!(row.information_weighted_residual_sum().is_finite());
    }
}

fn separable(n: usize, seed: u64) -> (Array2<f64>, Array1<u32>, Array1<u32>) {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut predictors = Array2::zeros((n, 2));
    let mut successes = Array1::zeros(n);
    let trials = Array1::from_elem(n, 1u32);
    for i in 0..n {
        predictors[[i, 0]] = rng.gen::<f64>();
        predictors[[i, 1]] = rng.gen::<f64>();
        let probability = sigmoid(6.0 * (predictors[[i, 0]] - 0.5));
        successes[i] = u32::from(rng.gen::<f64>() < probability);
    }
    (predictors, successes, trials)
}

fn settings(n_trees: usize) -> BartSettings {
    BartSettings::new(
        n_trees,
        0.95,
        2.0,
        LeafPrior {
            mean: 0.0,
            sd: 3.0 / (n_trees as f64).sqrt(),
        },
        20,
        CutpointStrategy::UniformContinuous,
    )
}

#[test]
fn test_sweeps_preserve_prediction_decomposition() {
    let (predictors, successes, trials) = separable(100, 17);
    let rng = Xoshiro256PlusPlus::seed_from_u64(23);
    let mut sampler =
        LogitBartSampler::from_data(predictors, successes, trials, settings(10), rng)
            .unwrap();

    for _ in 0..10 {
        sampler.step();
    }

    // Each row's stored prediction must track the full sum of trees.
    let predictions = sampler.predictions();
    for (i, row) in sampler.residuals().iter().enumerate() {
        assert_relative_eq!(row.prediction(), predictions[i], epsilon = 1e-8);
        let probability = sigmoid(row.prediction());
        assert!(probability > 0.0 && probability < 1.0);
    }
}

#[test]
fn test_mismatched_outcome_length_fails() {
    let (predictors, successes, _) = separable(40, 5);
    let trials = Array1::from_elem(39, 1u32);
    let rng = Xoshiro256PlusPlus::seed_from_u64(1);
    let result = LogitBartSampler::from_data(predictors, successes, trials, settings(5), rng);
    assert!(result.is_err());
}
