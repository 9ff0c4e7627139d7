//! The Gaussian outcome family: `y = sum_of_trees(x) + N(0, sigsq)`.
//!
//! Residual rows keep a plain numeric residual, leaf means get a
//! Normal-Normal conjugate update, and the residual variance is redrawn at
//! the end of every sweep from its inverse-gamma conditional.

use ndarray::{Array1, Array2};
use rand::Rng;
use rand_distr::{Distribution, Gamma, Normal};

use crate::data::{ResidualData, SufficientStatistics};
use crate::math::{square, LOG_2_PI};
use crate::model::{BartModel, ModelError};
use crate::sampler::{
    BartPosteriorSampler, BartSettings, LeafPrior, Outcome, MIN_LEAF_SAMPLES,
};

/// One training row: the observed response and the part of it not
/// explained by the rest of the ensemble.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianData {
    y: f64,
    residual: f64,
}

impl GaussianData {
    /// Creates a row whose residual starts at `y - original_prediction`.
    pub fn new(y: f64, original_prediction: f64) -> Self {
        Self {
            y,
            residual: y - original_prediction,
        }
    }

    /// The observed response.
    pub fn y(&self) -> f64 {
        self.y
    }

    /// The response minus every other tree's current contribution.
    pub fn residual(&self) -> f64 {
        self.residual
    }
}

impl ResidualData for GaussianData {
    fn add_to_residual(&mut self, value: f64) {
        self.residual += value;
    }
}

/// Count, sum and sum of squares of the residuals at one node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GaussianSuf {
    n: f64,
    sum: f64,
    sumsq: f64,
}

impl GaussianSuf {
    /// Number of rows absorbed.
    pub fn n(&self) -> f64 {
        self.n
    }

    /// Sum of the residuals.
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Mean residual, or zero for an empty node.
    pub fn ybar(&self) -> f64 {
        if self.n > 0.0 {
            self.sum / self.n
        } else {
            0.0
        }
    }

    /// Sample variance of the residuals, or zero with fewer than two rows.
    pub fn sample_var(&self) -> f64 {
        if self.n > 1.0 {
            (self.sumsq - self.n * square(self.ybar())) / (self.n - 1.0)
        } else {
            0.0
        }
    }
}

impl SufficientStatistics for GaussianSuf {
    type Data = GaussianData;

    fn clear(&mut self) {
        *self = Self::default();
    }

    fn update(&mut self, row: &GaussianData) {
        self.n += 1.0;
        self.sum += row.residual;
        self.sumsq += square(row.residual);
    }
}

/// The Gaussian error model and its residual-variance prior,
/// `1/sigsq ~ Gamma(weight / 2, weight * guess^2 / 2)`.
#[derive(Debug, Clone)]
pub struct GaussianOutcome {
    sigsq: f64,
    sigma_prior_guess: f64,
    sigma_prior_weight: f64,
}

impl GaussianOutcome {
    /// Creates the family with `sigma_guess` as a prior guess at the
    /// residual standard deviation and `sigma_weight` prior observations
    /// worth of confidence in it.  The current variance starts at the
    /// guess.
    pub fn new(sigma_guess: f64, sigma_weight: f64) -> Self {
        Self {
            sigsq: square(sigma_guess),
            sigma_prior_guess: sigma_guess,
            sigma_prior_weight: sigma_weight,
        }
    }

    /// Current residual variance.
    pub fn sigsq(&self) -> f64 {
        self.sigsq
    }

    /// Overrides the current residual variance.
    pub fn set_sigsq(&mut self, sigsq: f64) {
        self.sigsq = sigsq;
    }

    /// Posterior `(mean, variance)` of a leaf's mean parameter from the
    /// Normal-Normal conjugate update of `suf` against `prior`.
    pub fn posterior_moments(&self, suf: &GaussianSuf, prior: &LeafPrior) -> (f64, f64) {
        let tau_sq = square(prior.sd);
        let ivar = suf.n() / self.sigsq + 1.0 / tau_sq;
        let mean = (suf.sum() / self.sigsq + prior.mean / tau_sq) / ivar;
        (mean, 1.0 / ivar)
    }
}

impl Outcome for GaussianOutcome {
    type Suf = GaussianSuf;

    // Exact, including normalizing constants that cancel in the MH ratio:
    //
    //   p(y | sigma) = (2 pi sigsq)^(-n/2) * sqrt(v / tau^2)
    //     * exp(-[(n-1) s^2 / sigsq + n ybar^2 / sigsq
    //             + mu0^2 / tau^2 - m^2 / v] / 2)
    //
    // with (m, v) the posterior moments of the leaf mean.
    fn log_integrated_likelihood(&self, suf: &GaussianSuf, prior: &LeafPrior) -> f64 {
        let n = suf.n();
        if n < MIN_LEAF_SAMPLES {
            return f64::NEG_INFINITY;
        }
        let tau_sq = square(prior.sd);
        let (posterior_mean, posterior_variance) = self.posterior_moments(suf, prior);
        0.5 * (-n * (LOG_2_PI + self.sigsq.ln())
            + (posterior_variance / tau_sq).ln()
            - (n - 1.0) * suf.sample_var() / self.sigsq
            - n * square(suf.ybar()) / self.sigsq
            - square(prior.mean) / tau_sq
            + square(posterior_mean) / posterior_variance)
    }

    fn draw_leaf_mean<R: Rng>(
        &self,
        rng: &mut R,
        suf: &GaussianSuf,
        prior: &LeafPrior,
    ) -> f64 {
        let (mean, variance) = self.posterior_moments(suf, prior);
        Normal::new(mean, variance.sqrt()).unwrap().sample(rng)
    }

    // Conjugate inverse-gamma update from the sum of squared residuals.
    fn draw_global<R: Rng>(&mut self, rng: &mut R, rows: &mut [GaussianData]) {
        let n = rows.len() as f64;
        let ss: f64 = rows.iter().map(|row| square(row.residual())).sum();
        let shape = (self.sigma_prior_weight + n) / 2.0;
        let rate = (self.sigma_prior_weight * square(self.sigma_prior_guess) + ss) / 2.0;
        let precision = Gamma::new(shape, 1.0 / rate).unwrap().sample(rng);
        self.sigsq = 1.0 / precision;
    }
}

/// A sampler for the Gaussian family.
pub type GaussianBartSampler<R> = BartPosteriorSampler<GaussianOutcome, R>;

impl<R: Rng> GaussianBartSampler<R> {
    /// Builds a ready-to-run Gaussian sampler: sizes the ensemble at the
    /// response mean, observes and finalizes every predictor, and seeds
    /// the residual rows with `y - ybar`.
    pub fn from_data(
        predictors: Array2<f64>,
        response: Array1<f64>,
        settings: BartSettings,
        sigma_guess: f64,
        sigma_weight: f64,
        rng: R,
    ) -> Result<Self, ModelError> {
        if response.len() != predictors.nrows() {
            return Err(ModelError::DimensionMismatch {
                expected: predictors.nrows(),
                got: response.len(),
            });
        }
        let mean = response.mean().unwrap_or(0.0);
        let mut model = BartModel::new(settings.n_trees, mean, predictors.ncols());
        for x in predictors.rows() {
            model.observe(&x)?;
        }
        model.finalize_data(settings.distinct_value_cutoff, settings.strategy)?;
        let residuals = response
            .iter()
            .map(|&y| GaussianData::new(y, mean))
            .collect();
        BartPosteriorSampler::new(
            model,
            GaussianOutcome::new(sigma_guess, sigma_weight),
            settings,
            predictors,
            residuals,
            rng,
        )
    }
}
