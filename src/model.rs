//! The sum-of-trees model.
//!
//! A [`BartModel`] owns the ensemble of trees plus one [`VariableSummary`]
//! per predictor, and computes predictions as the sum of each tree's
//! contribution.  Predictions are on the model's own sum-of-trees scale;
//! outcome families with a non-identity link (such as the logit model)
//! feed the value through their link function separately.

use ndarray::{ArrayView1, ArrayView2};

use crate::data::SufficientStatistics;
use crate::splits::{
    CutpointStrategy, SerializedVariableSummary, SplitError, VariableSummary,
};
use crate::tree::{Tree, TreeError};

use thiserror::Error;

/// Errors raised by model configuration and (de)serialization.
#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    /// A predictor vector had the wrong number of variables.
    #[error("expected {expected} predictor variables, got {got}")]
    DimensionMismatch {
        /// Number of variables the model was built with.
        expected: usize,
        /// Number of variables actually supplied.
        got: usize,
    },
    /// Prediction or sampling was attempted before `finalize_data()`.
    #[error("finalize_data() has not been called")]
    DataNotFinalized,
    /// `finalize_data()` was called twice.
    #[error("finalize_data() called twice")]
    DataAlreadyFinalized,
    /// A tree index was out of range.
    #[error("no tree with index {0}")]
    NoSuchTree(usize),
    /// A tree failed to deserialize.
    #[error(transparent)]
    Tree(#[from] TreeError),
    /// A variable summary operation failed.
    #[error(transparent)]
    Split(#[from] SplitError),
}

/// A BART model: an ensemble of regression trees and the per-variable
/// cutpoint catalogs that govern how the trees may split.
#[derive(Debug, Clone)]
pub struct BartModel<S: SufficientStatistics> {
    trees: Vec<Tree<S>>,
    summaries: Vec<VariableSummary>,
    finalized: bool,
}

impl<S: SufficientStatistics> BartModel<S> {
    /// Creates a model of `number_of_trees` single-leaf trees over
    /// `number_of_variables` predictors.  The model starts as a constant:
    /// each tree contributes `mean / number_of_trees`, so the ensemble
    /// predicts `mean` everywhere.
    pub fn new(number_of_trees: usize, mean: f64, number_of_variables: usize) -> Self {
        let leaf_value = if number_of_trees > 0 {
            mean / number_of_trees as f64
        } else {
            0.0
        };
        Self {
            trees: (0..number_of_trees).map(|_| Tree::new(leaf_value)).collect(),
            summaries: (0..number_of_variables).map(VariableSummary::new).collect(),
            finalized: false,
        }
    }

    /// Number of predictor variables, the dimension of `x`.
    pub fn number_of_variables(&self) -> usize {
        self.summaries.len()
    }

    /// Number of trees in the ensemble.
    pub fn number_of_trees(&self) -> usize {
        self.trees.len()
    }

    /// Whether `finalize_data()` has been called.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Lets every variable summary observe one training row's predictors.
    pub fn observe(&mut self, x: &ArrayView1<f64>) -> Result<(), ModelError> {
        if x.len() != self.summaries.len() {
            return Err(ModelError::DimensionMismatch {
                expected: self.summaries.len(),
                got: x.len(),
            });
        }
        for (summary, &value) in self.summaries.iter_mut().zip(x.iter()) {
            summary.observe(value)?;
        }
        Ok(())
    }

    /// Finalizes every variable summary once all training rows have been
    /// observed.  Calling this twice is an error.
    pub fn finalize_data(
        &mut self,
        distinct_value_cutoff: usize,
        strategy: CutpointStrategy,
    ) -> Result<(), ModelError> {
        if self.finalized {
            return Err(ModelError::DataAlreadyFinalized);
        }
        for summary in &mut self.summaries {
            summary.finalize(distinct_value_cutoff, strategy)?;
        }
        self.finalized = true;
        Ok(())
    }

    /// The ensemble prediction at `x`: the sum of every tree's
    /// contribution, on the sum-of-trees scale.
    pub fn predict(&self, x: &ArrayView1<f64>) -> Result<f64, ModelError> {
        if !self.finalized {
            return Err(ModelError::DataNotFinalized);
        }
        if x.len() != self.summaries.len() {
            return Err(ModelError::DimensionMismatch {
                expected: self.summaries.len(),
                got: x.len(),
            });
        }
        Ok(self.trees.iter().map(|tree| tree.predict(x)).sum())
    }

    /// Grows or shrinks the ensemble.  Extra trees are appended as
    /// single-leaf zero-mean trees, so the aggregate prediction at
    /// existing points is unchanged; shrinking drops trees from the end.
    pub fn set_number_of_trees(&mut self, number_of_trees: usize) {
        if number_of_trees > self.trees.len() {
            self.trees
                .resize_with(number_of_trees, || Tree::new(0.0));
        } else {
            self.trees.truncate(number_of_trees);
        }
    }

    /// Rebuilds one tree from its matrix representation.
    pub fn rebuild_tree(
        &mut self,
        which_tree: usize,
        tree_matrix: &ArrayView2<f64>,
    ) -> Result<(), ModelError> {
        if which_tree >= self.trees.len() {
            return Err(ModelError::NoSuchTree(which_tree));
        }
        self.trees[which_tree] = Tree::from_matrix(tree_matrix)?;
        Ok(())
    }

    /// Rebuilds every variable summary from its serialized value.  The
    /// model counts as finalized once all rebuilt summaries are.
    pub fn set_variable_summaries(
        &mut self,
        serialized: &[SerializedVariableSummary],
    ) -> Result<(), ModelError> {
        if serialized.len() != self.summaries.len() {
            return Err(ModelError::DimensionMismatch {
                expected: self.summaries.len(),
                got: serialized.len(),
            });
        }
        let summaries = serialized
            .iter()
            .map(VariableSummary::from_serialized)
            .collect::<Result<Vec<_>, _>>()?;
        self.finalized = summaries.iter().all(VariableSummary::is_finalized);
        self.summaries = summaries;
        Ok(())
    }

    /// The variable summary at `which_variable`.
    pub fn variable_summary(&self, which_variable: usize) -> &VariableSummary {
        &self.summaries[which_variable]
    }

    /// All variable summaries.
    pub fn variable_summaries(&self) -> &[VariableSummary] {
        &self.summaries
    }

    /// The tree at `which_tree`.
    pub fn tree(&self, which_tree: usize) -> &Tree<S> {
        &self.trees[which_tree]
    }

    /// Mutable access to the tree at `which_tree`.
    pub fn tree_mut(&mut self, which_tree: usize) -> &mut Tree<S> {
        &mut self.trees[which_tree]
    }

    /// Splits the borrow so a sampler can mutate one tree while drawing
    /// cutpoints from the shared summaries.
    pub fn tree_and_summaries_mut(
        &mut self,
        which_tree: usize,
    ) -> (&mut Tree<S>, &[VariableSummary]) {
        (&mut self.trees[which_tree], &self.summaries)
    }
}
