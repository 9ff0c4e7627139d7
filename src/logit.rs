//! The binomial logit outcome family.
//!
//! Each row contributes `y` successes out of `trials` Bernoulli draws with
//! success probability `sigmoid(eta)`, where `eta` is the sum-of-trees
//! value at the row's predictors.  The logistic likelihood is made
//! conditionally Gaussian by data augmentation: every Bernoulli draw gets
//! a latent utility `z = eta + logistic noise`, and the logistic noise is
//! approximated by a two component zero mean normal scale mixture matched
//! to the logistic distribution's variance (`pi^2 / 3`) and kurtosis.
//! Given the imputed component variances the leaf means see a weighted
//! Gaussian likelihood, so the same conjugate updates as the Gaussian
//! family apply with per-row precisions.

use ndarray::{Array1, Array2};
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::data::{ResidualData, SufficientStatistics};
use crate::math::{logit, sigmoid, square};
use crate::model::{BartModel, ModelError};
use crate::sampler::{
    BartPosteriorSampler, BartSettings, LeafPrior, Outcome, RowOf, MIN_LEAF_SAMPLES,
};

/// `(weight, variance)` pairs of the normal scale mixture standing in for
/// the standard logistic distribution.
const MIXTURE: [(f64, f64); 2] = [(0.5, 5.370563), (0.5, 1.209173)];

/// One training row: the binomial outcome, the current sum-of-trees value
/// at the row, and the latent-data summaries the imputation step refreshes.
#[derive(Debug, Clone, PartialEq)]
pub struct LogitData {
    y: u32,
    trials: u32,
    prediction: f64,
    sum_of_information: f64,
    information_weighted_sum: f64,
}

impl LogitData {
    /// Creates a row with `y` successes in `trials` trials.  The latent
    /// summaries start at zero and are set by the first imputation.
    pub fn new(y: u32, trials: u32) -> Self {
        Self {
            y,
            trials,
            prediction: 0.0,
            sum_of_information: 0.0,
            information_weighted_sum: 0.0,
        }
    }

    /// Number of successes.
    pub fn y(&self) -> u32 {
        self.y
    }

    /// Number of Bernoulli trials.
    pub fn trials(&self) -> u32 {
        self.trials
    }

    /// The ensemble's current value at this row.
    pub fn prediction(&self) -> f64 {
        self.prediction
    }

    /// Sum over the row's latent draws of `1 / variance`.
    pub fn sum_of_information(&self) -> f64 {
        self.sum_of_information
    }

    /// Sum over the row's latent draws of `(z - prediction) / variance`.
    /// This is what a leaf containing the row adds to its weighted
    /// residual sum.
    pub fn information_weighted_residual_sum(&self) -> f64 {
        self.information_weighted_sum - self.prediction * self.sum_of_information
    }

    /// Overwrites the latent summaries, where `information_weighted_sum`
    /// is the sum of `z / variance` over the row's latent draws.
    pub fn set_latent_data(&mut self, sum_of_information: f64, information_weighted_sum: f64) {
        self.sum_of_information = sum_of_information;
        self.information_weighted_sum = information_weighted_sum;
    }
}

impl ResidualData for LogitData {
    // Removing a tree's mean adds it here, so the stored value tracks the
    // sum over the *other* trees, and the residual z - prediction grows.
    fn add_to_residual(&mut self, value: f64) {
        self.prediction -= value;
    }
}

/// Weighted Gaussian sufficient statistics of the latent utilities at one
/// node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogitSuf {
    trials: f64,
    sum_of_information: f64,
    information_weighted_residual_sum: f64,
}

impl LogitSuf {
    /// Total Bernoulli trials absorbed.
    pub fn trials(&self) -> f64 {
        self.trials
    }

    /// Total precision of the absorbed latent draws.
    pub fn sum_of_information(&self) -> f64 {
        self.sum_of_information
    }

    /// Precision-weighted sum of the latent residuals.
    pub fn information_weighted_residual_sum(&self) -> f64 {
        self.information_weighted_residual_sum
    }
}

impl SufficientStatistics for LogitSuf {
    type Data = LogitData;

    fn clear(&mut self) {
        *self = Self::default();
    }

    fn update(&mut self, row: &LogitData) {
        self.trials += f64::from(row.trials);
        self.sum_of_information += row.sum_of_information;
        self.information_weighted_residual_sum += row.information_weighted_residual_sum();
    }
}

/// The binomial logit error model.  Carries no global parameters of its
/// own; its end-of-sweep draw re-imputes the latent utilities.
#[derive(Debug, Clone, Default)]
pub struct LogitOutcome;

impl LogitOutcome {
    /// Creates the family.
    pub fn new() -> Self {
        Self
    }

    /// Posterior `(mean, variance)` of a leaf's mean parameter given the
    /// weighted latent statistics in `suf`.
    pub fn posterior_moments(&self, suf: &LogitSuf, prior: &LeafPrior) -> (f64, f64) {
        let tau_sq = square(prior.sd);
        let ivar = suf.sum_of_information() + 1.0 / tau_sq;
        let mean = (suf.information_weighted_residual_sum() + prior.mean / tau_sq) / ivar;
        (mean, 1.0 / ivar)
    }
}

/// Draws one latent logistic utility `z = eta + e`, with `e` standard
/// logistic truncated to be positive (success) or negative (failure), via
/// inversion of the logistic CDF.
fn draw_truncated_logistic<R: Rng>(rng: &mut R, eta: f64, success: bool) -> f64 {
    let f0 = sigmoid(-eta);
    let u: f64 = rng.gen();
    let v = if success { f0 + u * (1.0 - f0) } else { u * f0 };
    eta + logit(v.clamp(1e-12, 1.0 - 1e-12))
}

/// Picks a mixture component for the logistic residual `e = z - eta`,
/// with posterior weight proportional to `w_j * N(e; 0, v_j)`.
fn draw_component<R: Rng>(rng: &mut R, e: f64) -> f64 {
    let weights: Vec<f64> = MIXTURE
        .iter()
        .map(|&(w, v)| w * (-0.5 * square(e) / v).exp() / v.sqrt())
        .collect();
    let total: f64 = weights.iter().sum();
    let mut u = rng.gen::<f64>() * total;
    for (&(_, v), &weight) in MIXTURE.iter().zip(&weights) {
        if u < weight {
            return v;
        }
        u -= weight;
    }
    MIXTURE[MIXTURE.len() - 1].1
}

impl Outcome for LogitOutcome {
    type Suf = LogitSuf;

    // Only the terms that differ across tree structures are kept.  The
    // Gaussian kernels of the individual latent draws are shared by the
    // numerator and denominator of every acceptance ratio, so they cancel.
    fn log_integrated_likelihood(&self, suf: &LogitSuf, prior: &LeafPrior) -> f64 {
        if suf.trials() < MIN_LEAF_SAMPLES || suf.sum_of_information() <= 0.0 {
            return f64::NEG_INFINITY;
        }
        let tau_sq = square(prior.sd);
        let (posterior_mean, posterior_variance) = self.posterior_moments(suf, prior);
        0.5 * ((posterior_variance / tau_sq).ln() - square(prior.mean) / tau_sq
            + square(posterior_mean) / posterior_variance)
    }

    fn draw_leaf_mean<R: Rng>(&self, rng: &mut R, suf: &LogitSuf, prior: &LeafPrior) -> f64 {
        let (mean, variance) = self.posterior_moments(suf, prior);
        Normal::new(mean, variance.sqrt()).unwrap().sample(rng)
    }

    // Re-imputes every row's latent utilities given the current ensemble
    // value: one truncated logistic draw per Bernoulli trial, each
    // assigned a mixture component, accumulated into the row's precision
    // summaries.
    fn draw_global<R: Rng>(&mut self, rng: &mut R, rows: &mut [LogitData]) {
        for row in rows {
            let eta = row.prediction();
            let mut sum_of_information = 0.0;
            let mut information_weighted_sum = 0.0;
            for trial in 0..row.trials() {
                let success = trial < row.y();
                let z = draw_truncated_logistic(rng, eta, success);
                let variance = draw_component(rng, z - eta);
                sum_of_information += 1.0 / variance;
                information_weighted_sum += z / variance;
            }
            row.set_latent_data(sum_of_information, information_weighted_sum);
        }
    }
}

/// A sampler for the binomial logit family.
pub type LogitBartSampler<R> = BartPosteriorSampler<LogitOutcome, R>;

impl<R: Rng> LogitBartSampler<R> {
    /// Builds a ready-to-run logit sampler from per-row success and trial
    /// counts.  Leaves start at zero, so the initial success probability
    /// is one half everywhere.
    pub fn from_data(
        predictors: Array2<f64>,
        successes: Array1<u32>,
        trials: Array1<u32>,
        settings: BartSettings,
        rng: R,
    ) -> Result<Self, ModelError> {
        if successes.len() != predictors.nrows() || trials.len() != predictors.nrows() {
            return Err(ModelError::DimensionMismatch {
                expected: predictors.nrows(),
                got: successes.len().min(trials.len()),
            });
        }
        let mut model = BartModel::new(settings.n_trees, 0.0, predictors.ncols());
        for x in predictors.rows() {
            model.observe(&x)?;
        }
        model.finalize_data(settings.distinct_value_cutoff, settings.strategy)?;
        let residuals: Vec<RowOf<LogitOutcome>> = successes
            .iter()
            .zip(trials.iter())
            .map(|(&y, &n)| LogitData::new(y, n))
            .collect();
        BartPosteriorSampler::new(model, LogitOutcome::new(), settings, predictors, residuals, rng)
    }
}
