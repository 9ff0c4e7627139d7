//! The Metropolis-Hastings backfitting sampler shared by every outcome
//! family.
//!
//! One sweep visits the trees sequentially.  For each tree the sampler
//! removes the tree's contribution from the shared residual, proposes one
//! structural move, redraws every leaf mean from its conjugate conditional
//! posterior, and restores the contribution before moving on.  The order
//! is load-bearing: every tree reads a residual defined as "observed minus
//! every *other* tree's current contribution", so skipping a remove or a
//! replace silently corrupts the decomposition.
//!
//! Structural moves are grow (split a random leaf), prune (collapse a
//! random interior node whose children are both leaves) and change (redraw
//! the cutpoint at a random interior node).  The prior probability that a
//! node at depth `d` splits is `alpha / (1 + d)^beta`; given a split, the
//! variable and cutpoint are uniform over whatever is available at the
//! node.  Because the proposal draws the variable and cutpoint from the
//! same uniform distributions the prior assumes, those factors cancel and
//! the grow acceptance ratio reduces to
//!
//! ```text
//! log a = log(p_prune / p_grow) + log #leaves - log #prune_candidates'
//!       + log p_split(d) + 2 log(1 - p_split(d+1)) - log(1 - p_split(d))
//!       + log L(left) + log L(right) - log L(parent)
//! ```
//!
//! with `L` the integrated likelihood from the node's sufficient
//! statistics, and the prune ratio is its reciprocal.  The change move is
//! symmetric (the admissible cutpoint range depends only on the node's
//! ancestors, never on its own current cutpoint), so it accepts on the
//! likelihood ratio alone.

use ndarray::{Array1, Array2};
use rand::Rng;

use crate::data::SufficientStatistics;
use crate::model::{BartModel, ModelError};
use crate::splits::{CutpointStrategy, VariableSummary};
use crate::tree::Tree;

/// Nodes with fewer residual rows than this have integrated likelihood
/// negative infinity, so no accepted move can create them.
pub const MIN_LEAF_SAMPLES: f64 = 5.0;

/// Probability of proposing a grow move (prune is symmetric; the
/// remainder proposes a cutpoint change).  A single-node tree always
/// proposes a grow.
const P_GROW: f64 = 0.25;
const P_PRUNE: f64 = 0.25;

/// The conditional prior on each leaf's mean parameter, `N(mean, sd^2)`.
#[derive(Debug, Clone, Copy)]
pub struct LeafPrior {
    /// Prior mean of a leaf's mean parameter.
    pub mean: f64,
    /// Prior standard deviation of a leaf's mean parameter.
    pub sd: f64,
}

/// Settings shared by every BART posterior sampler.
#[derive(Debug, Clone)]
pub struct BartSettings {
    /// Number of trees in the ensemble.
    pub n_trees: usize,
    /// `alpha` in the depth prior `P(split at depth d) = alpha / (1+d)^beta`.
    /// Must lie in (0, 1).
    pub depth_alpha: f64,
    /// `beta` in the depth prior; larger values favor shallower trees.
    pub depth_beta: f64,
    /// Conditional prior on the leaf means.
    pub leaf_prior: LeafPrior,
    /// Number of distinct values a predictor must exceed before it is
    /// treated as continuous.
    pub distinct_value_cutoff: usize,
    /// Cutpoint generation strategy for continuous predictors.
    pub strategy: CutpointStrategy,
}

impl BartSettings {
    /// Creates settings with the given tree count and depth prior, a
    /// `N(mean, sd^2)` leaf prior, and the given cutpoint configuration.
    pub fn new(
        n_trees: usize,
        depth_alpha: f64,
        depth_beta: f64,
        leaf_prior: LeafPrior,
        distinct_value_cutoff: usize,
        strategy: CutpointStrategy,
    ) -> Self {
        Self {
            n_trees,
            depth_alpha,
            depth_beta,
            leaf_prior,
            distinct_value_cutoff,
            strategy,
        }
    }

    /// Prior probability that a node at `depth` splits.
    pub fn p_split(&self, depth: usize) -> f64 {
        self.depth_alpha * (1.0 + depth as f64).powf(-self.depth_beta)
    }
}

/// The residual row type of an outcome family.
pub type RowOf<O> = <<O as Outcome>::Suf as SufficientStatistics>::Data;

/// One outcome likelihood, pluggable into the shared tree machinery.
///
/// Implementations supply the node-level integrated likelihood, the
/// conjugate leaf-mean draw, and the end-of-sweep redraw of global
/// nuisance quantities (the residual variance for the Gaussian family,
/// the latent logits for the Bernoulli family).
pub trait Outcome {
    /// Per-node sufficient statistics for this family.
    type Suf: SufficientStatistics;

    /// Log likelihood of the rows summarized by `suf` with the leaf mean
    /// integrated out under `prior`.  Returns negative infinity for
    /// degenerate nodes (fewer than [`MIN_LEAF_SAMPLES`] rows).
    fn log_integrated_likelihood(&self, suf: &Self::Suf, prior: &LeafPrior) -> f64;

    /// Draws a leaf mean from its conditional posterior.
    fn draw_leaf_mean<R: Rng>(&self, rng: &mut R, suf: &Self::Suf, prior: &LeafPrior)
        -> f64;

    /// Redraws global nuisance parameters given the final residuals of a
    /// sweep.
    fn draw_global<R: Rng>(&mut self, rng: &mut R, rows: &mut [RowOf<Self>]);
}

/// Drives MCMC sweeps over a [`BartModel`] for one outcome family.
///
/// The sampler owns the model, the training predictors, one residual row
/// per training observation, and the random number generator.  Separate
/// chains get separate samplers with independently seeded generators;
/// nothing here is shared across threads.
pub struct BartPosteriorSampler<O: Outcome, R: Rng> {
    model: BartModel<O::Suf>,
    outcome: O,
    settings: BartSettings,
    predictors: Array2<f64>,
    residuals: Vec<RowOf<O>>,
    rng: R,
    sweeps: usize,
}

impl<O: Outcome, R: Rng> BartPosteriorSampler<O, R> {
    /// Assembles a sampler from a finalized model and one residual row per
    /// training observation, then routes every row through every tree and
    /// performs the initial global draw (for the logit family this is the
    /// first latent-data imputation).
    pub fn new(
        mut model: BartModel<O::Suf>,
        mut outcome: O,
        settings: BartSettings,
        predictors: Array2<f64>,
        mut residuals: Vec<RowOf<O>>,
        mut rng: R,
    ) -> Result<Self, ModelError> {
        if !model.is_finalized() {
            return Err(ModelError::DataNotFinalized);
        }
        if model.number_of_variables() != predictors.ncols() {
            return Err(ModelError::DimensionMismatch {
                expected: model.number_of_variables(),
                got: predictors.ncols(),
            });
        }
        if residuals.len() != predictors.nrows() {
            return Err(ModelError::DimensionMismatch {
                expected: predictors.nrows(),
                got: residuals.len(),
            });
        }
        for which_tree in 0..model.number_of_trees() {
            model.tree_mut(which_tree).populate_data(&predictors.view());
        }
        outcome.draw_global(&mut rng, &mut residuals);
        Ok(Self {
            model,
            outcome,
            settings,
            predictors,
            residuals,
            rng,
            sweeps: 0,
        })
    }

    /// The managed model.
    pub fn model(&self) -> &BartModel<O::Suf> {
        &self.model
    }

    /// The outcome family object (residual variance, imputation state).
    pub fn outcome(&self) -> &O {
        &self.outcome
    }

    /// The per-row residual records.
    pub fn residuals(&self) -> &[RowOf<O>] {
        &self.residuals
    }

    /// Number of completed sweeps.
    pub fn sweeps(&self) -> usize {
        self.sweeps
    }

    /// In-sample sum-of-trees prediction for every training row.
    pub fn predictions(&self) -> Array1<f64> {
        let mut predictions = Array1::zeros(self.predictors.nrows());
        for (row, x) in self.predictors.rows().into_iter().enumerate() {
            for which_tree in 0..self.model.number_of_trees() {
                predictions[row] += self.model.tree(which_tree).predict(&x);
            }
        }
        predictions
    }

    /// How many interior nodes across the ensemble split on each variable.
    pub fn variable_inclusion(&self) -> Vec<u32> {
        let mut counts = vec![0u32; self.model.number_of_variables()];
        for which_tree in 0..self.model.number_of_trees() {
            for (variable, _) in self.model.tree(which_tree).splits() {
                counts[variable] += 1;
            }
        }
        counts
    }

    /// Runs one MCMC sweep: every tree in turn, then the global draw.
    pub fn step(&mut self) {
        for which_tree in 0..self.model.number_of_trees() {
            self.sample_tree(which_tree);
        }
        self.outcome
            .draw_global(&mut self.rng, &mut self.residuals);
        self.sweeps += 1;
    }

    fn sample_tree(&mut self, which_tree: usize) {
        let Self {
            model,
            outcome,
            settings,
            predictors,
            residuals,
            rng,
            ..
        } = self;
        let (tree, summaries) = model.tree_and_summaries_mut(which_tree);

        // The residual must exclude this tree before any sufficient
        // statistic below is read.
        tree.remove_mean_effect(residuals);

        let forced_grow = tree.is_leaf(tree.root());
        let u: f64 = rng.gen();
        if forced_grow || u < P_GROW {
            grow_move(
                tree, summaries, outcome, settings, predictors, residuals, rng, forced_grow,
            );
        } else if u < P_GROW + P_PRUNE {
            prune_move(tree, outcome, settings, residuals, rng);
        } else {
            change_move(tree, summaries, outcome, settings, predictors, residuals, rng);
        }

        for leaf in tree.leaves().to_vec() {
            let mean = {
                let suf = tree.compute_suf(leaf, residuals);
                outcome.draw_leaf_mean(rng, suf, &settings.leaf_prior)
            };
            tree.set_mean(leaf, mean);
        }

        tree.replace_mean_effect(residuals);
    }
}

/// Log of the depth-prior factor a split at `depth` contributes:
/// `p_split(depth) * (1 - p_split(depth+1))^2 / (1 - p_split(depth))`.
fn log_split_prior_ratio(settings: &BartSettings, depth: usize) -> f64 {
    let p_here = settings.p_split(depth);
    let p_child = settings.p_split(depth + 1);
    p_here.ln() + 2.0 * (1.0 - p_child).ln() - (1.0 - p_here).ln()
}

#[allow(clippy::too_many_arguments)]
fn grow_move<O: Outcome, R: Rng>(
    tree: &mut Tree<O::Suf>,
    summaries: &[VariableSummary],
    outcome: &O,
    settings: &BartSettings,
    predictors: &Array2<f64>,
    residuals: &[RowOf<O>],
    rng: &mut R,
    forced: bool,
) {
    let leaf = tree.random_leaf(rng);
    let variable = rng.gen_range(0..summaries.len());
    let cutpoint = match summaries[variable]
        .random_cutpoint(rng, tree, leaf)
        .expect("variable summaries are finalized before sampling")
    {
        Some(cutpoint) => cutpoint,
        // No legal cutpoint at this leaf; the proposal is abandoned.
        None => return,
    };

    let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = tree
        .rows(leaf)
        .iter()
        .copied()
        .partition(|&row| predictors[[row, variable]] <= cutpoint);

    let prior = &settings.leaf_prior;
    let mut left_suf = O::Suf::default();
    for &row in &left_rows {
        left_suf.update(&residuals[row]);
    }
    let mut right_suf = O::Suf::default();
    for &row in &right_rows {
        right_suf.update(&residuals[row]);
    }
    let ll_left = outcome.log_integrated_likelihood(&left_suf, prior);
    let ll_right = outcome.log_integrated_likelihood(&right_suf, prior);
    if ll_left == f64::NEG_INFINITY || ll_right == f64::NEG_INFINITY {
        // A degenerate child can never be accepted.
        return;
    }
    let ll_parent = {
        let suf = tree.compute_suf(leaf, residuals);
        outcome.log_integrated_likelihood(suf, prior)
    };

    let n_leaves = tree.number_of_leaves() as f64;
    let parent_is_candidate = tree
        .parent(leaf)
        .map_or(false, |p| tree.parents_of_leaves().contains(&p));
    let n_candidates_after = tree.number_of_parents_of_leaves() as f64 + 1.0
        - if parent_is_candidate { 1.0 } else { 0.0 };
    let p_grow = if forced { 1.0 } else { P_GROW };

    let log_ratio = (P_PRUNE / p_grow).ln() + n_leaves.ln() - n_candidates_after.ln()
        + log_split_prior_ratio(settings, tree.depth(leaf))
        + ll_left
        + ll_right
        - ll_parent;

    if rng.gen::<f64>().ln() < log_ratio {
        tree.set_split(leaf, variable, cutpoint);
        let (left, right) = tree
            .grow(leaf, 0.0, 0.0)
            .expect("grow target is a leaf with its split set");
        tree.set_rows(left, left_rows);
        tree.set_rows(right, right_rows);
    }
}

fn prune_move<O: Outcome, R: Rng>(
    tree: &mut Tree<O::Suf>,
    outcome: &O,
    settings: &BartSettings,
    residuals: &[RowOf<O>],
    rng: &mut R,
) {
    let node = match tree.random_parent_of_leaves(rng) {
        Some(node) => node,
        None => return,
    };
    let (left, right) = tree
        .children(node)
        .expect("prune candidates have two children");

    let prior = &settings.leaf_prior;
    let ll_left = {
        let suf = tree.compute_suf(left, residuals);
        outcome.log_integrated_likelihood(suf, prior)
    };
    let ll_right = {
        let suf = tree.compute_suf(right, residuals);
        outcome.log_integrated_likelihood(suf, prior)
    };
    let ll_parent = {
        let suf = tree.compute_suf(node, residuals);
        outcome.log_integrated_likelihood(suf, prior)
    };

    let log_ratio = if ll_left + ll_right == f64::NEG_INFINITY {
        // Degenerate children only arise from deserialized trees; pruning
        // them back is always accepted.
        f64::INFINITY
    } else {
        // Reverse move: grow this node back.  A grow from a single-node
        // tree is forced, so its kernel probability is 1.
        let p_grow = if node == tree.root() { 1.0 } else { P_GROW };
        let n_candidates = tree.number_of_parents_of_leaves() as f64;
        let n_leaves_after = tree.number_of_leaves() as f64 - 1.0;
        (p_grow / P_PRUNE).ln() + n_candidates.ln() - n_leaves_after.ln()
            - log_split_prior_ratio(settings, tree.depth(node))
            + ll_parent
            - ll_left
            - ll_right
    };

    if rng.gen::<f64>().ln() < log_ratio {
        tree.prune_descendants(node);
    }
}

fn change_move<O: Outcome, R: Rng>(
    tree: &mut Tree<O::Suf>,
    summaries: &[VariableSummary],
    outcome: &O,
    settings: &BartSettings,
    predictors: &Array2<f64>,
    residuals: &[RowOf<O>],
    rng: &mut R,
) {
    let node = match tree.random_interior(rng) {
        Some(node) => node,
        None => return,
    };
    let (variable, old_cutpoint) = tree.split(node).expect("interior nodes carry a split");
    let new_cutpoint = match summaries[variable]
        .random_cutpoint(rng, tree, node)
        .expect("variable summaries are finalized before sampling")
    {
        Some(cutpoint) => cutpoint,
        None => return,
    };

    let before = subtree_log_likelihood(tree, node, outcome, settings, residuals);
    tree.set_split(node, variable, new_cutpoint);
    tree.reroute_subtree(node, &predictors.view());
    let after = subtree_log_likelihood(tree, node, outcome, settings, residuals);

    if !(rng.gen::<f64>().ln() < after - before) {
        tree.set_split(node, variable, old_cutpoint);
        tree.reroute_subtree(node, &predictors.view());
    }
}

/// Sum of the integrated log likelihoods of every leaf below `node`
/// (inclusive, if `node` is itself a leaf).
fn subtree_log_likelihood<O: Outcome>(
    tree: &mut Tree<O::Suf>,
    node: usize,
    outcome: &O,
    settings: &BartSettings,
    residuals: &[RowOf<O>],
) -> f64 {
    let mut total = 0.0;
    let mut stack = vec![node];
    while let Some(id) = stack.pop() {
        match tree.children(id) {
            Some((left, right)) => {
                stack.push(left);
                stack.push(right);
            }
            None => {
                let suf = tree.compute_suf(id, residuals);
                total += outcome.log_integrated_likelihood(suf, &settings.leaf_prior);
            }
        }
    }
    total
}
