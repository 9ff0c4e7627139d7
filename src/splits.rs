//! Per-predictor catalogs of legal cutpoints.
//!
//! A [`VariableSummary`] watches the values of one predictor while training
//! data is observed, then `finalize()` decides whether the variable should
//! be treated as continuous or discrete and materializes a concrete
//! cutpoint generator.  Random cutpoints drawn afterwards always respect
//! the range of values still logically reachable at a node given the
//! splits made by its ancestors on the same variable, so an ancestor of a
//! node can make every cutpoint for that variable infeasible (a binary
//! dummy can only be split on once along any root-to-leaf path).

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::SufficientStatistics;
use crate::tree::Tree;

/// How cutpoints are generated for a variable treated as continuous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CutpointStrategy {
    /// Uniform draws from the interval between the lowest and highest
    /// observed values.
    UniformContinuous,
    /// Uniform draws from an even discretization of that interval.
    UniformDiscrete,
    /// Uniform draws from a discretization of the empirical CDF, placing
    /// more cutpoints where there is more data.
    DiscreteQuantiles,
}

/// A value-preserving snapshot of a [`VariableSummary`].
///
/// `data` holds the interval bounds `[lo, hi]` for a continuous summary
/// and the explicit cutpoint list for a discrete one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedVariableSummary {
    /// Whether the summary had been finalized when serialized.
    pub finalized: bool,
    /// Index of the predictor being summarized.
    pub variable_number: usize,
    /// Whether the variable is treated as continuous.
    pub is_continuous: bool,
    /// The strategy the summary was finalized with.
    pub strategy: CutpointStrategy,
    /// Interval bounds or cutpoint values, per `is_continuous`.
    pub data: Vec<f64>,
}

/// Errors raised by cutpoint bookkeeping.
#[derive(Debug, Error, PartialEq)]
pub enum SplitError {
    /// A cutpoint was requested before `finalize()` was called.
    #[error("variable {0}: cutpoints requested before finalize()")]
    NotFinalized(usize),
    /// `finalize()` was called twice.
    #[error("variable {0}: finalize() called twice")]
    AlreadyFinalized(usize),
    /// A value was observed after finalization.
    #[error("variable {0}: observed a value after finalize()")]
    ObservedAfterFinalize(usize),
    /// A serialized summary did not match its declared shape.
    #[error("variable {0}: malformed serialized summary")]
    InvalidSerialized(usize),
}

/// The concrete cutpoint generator materialized by `finalize()`.
#[derive(Debug, Clone)]
enum Cutpoints {
    /// Cutpoints drawn uniformly from `(lo, hi)`.
    Continuous { lo: f64, hi: f64 },
    /// Cutpoints drawn uniformly from an explicit candidate list.
    Discrete { values: Vec<f64> },
}

/// Catalog of legal cutpoints for one predictor.
#[derive(Debug, Clone)]
pub struct VariableSummary {
    variable_index: usize,
    observed: Vec<f64>,
    is_continuous: bool,
    strategy: CutpointStrategy,
    cutpoints: Option<Cutpoints>,
}

impl VariableSummary {
    /// An empty summary for the predictor at `variable_index`.
    pub fn new(variable_index: usize) -> Self {
        Self {
            variable_index,
            observed: Vec::new(),
            is_continuous: false,
            strategy: CutpointStrategy::UniformContinuous,
            cutpoints: None,
        }
    }

    /// Index of the predictor being summarized.
    pub fn variable_index(&self) -> usize {
        self.variable_index
    }

    /// Whether `finalize()` has been called.
    pub fn is_finalized(&self) -> bool {
        self.cutpoints.is_some()
    }

    /// Records one observed training value.  Non-finite values are
    /// ignored.  It is an error to observe after finalization.
    pub fn observe(&mut self, value: f64) -> Result<(), SplitError> {
        if self.is_finalized() {
            return Err(SplitError::ObservedAfterFinalize(self.variable_index));
        }
        if value.is_finite() {
            self.observed.push(value);
        }
        Ok(())
    }

    /// Decides continuous vs. discrete treatment and materializes the
    /// cutpoint generator.  A variable is continuous when it has more than
    /// `distinct_value_cutoff` distinct observed values; `cutoff` also
    /// sizes the candidate grid for the two discretized strategies.
    pub fn finalize(
        &mut self,
        distinct_value_cutoff: usize,
        strategy: CutpointStrategy,
    ) -> Result<(), SplitError> {
        if self.is_finalized() {
            return Err(SplitError::AlreadyFinalized(self.variable_index));
        }

        let mut sorted = self.observed.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).expect("observed values are finite"));
        let mut distinct = sorted.clone();
        distinct.dedup();

        self.is_continuous = distinct.len() > distinct_value_cutoff;
        self.strategy = strategy;
        self.cutpoints = Some(if !self.is_continuous {
            // Splitting at the largest value sends everything left, so it
            // is never a candidate.
            distinct.pop();
            Cutpoints::Discrete { values: distinct }
        } else {
            let lo = sorted[0];
            let hi = sorted[sorted.len() - 1];
            match strategy {
                CutpointStrategy::UniformContinuous => Cutpoints::Continuous { lo, hi },
                CutpointStrategy::UniformDiscrete => {
                    let k = distinct_value_cutoff.max(1);
                    let values = (1..=k)
                        .map(|i| lo + (hi - lo) * i as f64 / (k + 1) as f64)
                        .collect();
                    Cutpoints::Discrete { values }
                }
                CutpointStrategy::DiscreteQuantiles => {
                    let k = distinct_value_cutoff.max(1);
                    let n = sorted.len();
                    let mut values: Vec<f64> = (1..=k)
                        .map(|i| {
                            let p = i as f64 / (k + 1) as f64;
                            sorted[(p * (n - 1) as f64).round() as usize]
                        })
                        .collect();
                    values.dedup();
                    Cutpoints::Discrete { values }
                }
            }
        });
        self.observed.clear();
        Ok(())
    }

    /// Returns the summary to its empty, observing state.
    pub fn reset(&mut self) {
        self.observed.clear();
        self.cutpoints = None;
        self.is_continuous = false;
    }

    /// Draws a cutpoint that is logically possible at `node` given the
    /// splits made by its ancestors on this variable.
    ///
    /// Returns `Ok(None)` when no legal cutpoint exists, and an error if
    /// the summary has not been finalized.
    pub fn random_cutpoint<S: SufficientStatistics, R: Rng>(
        &self,
        rng: &mut R,
        tree: &Tree<S>,
        node: usize,
    ) -> Result<Option<f64>, SplitError> {
        let cutpoints = self
            .cutpoints
            .as_ref()
            .ok_or(SplitError::NotFinalized(self.variable_index))?;

        Ok(match cutpoints {
            Cutpoints::Continuous { lo, hi } => {
                let (lo, hi) = tree.cutpoint_range(node, self.variable_index, *lo, *hi);
                if lo < hi {
                    Some(rng.gen_range(lo..hi))
                } else {
                    None
                }
            }
            Cutpoints::Discrete { values } => {
                let (lo, hi) = tree.cutpoint_range(
                    node,
                    self.variable_index,
                    f64::NEG_INFINITY,
                    f64::INFINITY,
                );
                let admissible: Vec<f64> = values
                    .iter()
                    .copied()
                    .filter(|&value| lo < value && value < hi)
                    .collect();
                if admissible.is_empty() {
                    None
                } else {
                    Some(admissible[rng.gen_range(0..admissible.len())])
                }
            }
        })
    }

    /// Produces a value-preserving snapshot for long-term storage.
    pub fn serialize(&self) -> SerializedVariableSummary {
        let data = match &self.cutpoints {
            Some(Cutpoints::Continuous { lo, hi }) => vec![*lo, *hi],
            Some(Cutpoints::Discrete { values }) => values.clone(),
            None => Vec::new(),
        };
        SerializedVariableSummary {
            finalized: self.is_finalized(),
            variable_number: self.variable_index,
            is_continuous: self.is_continuous,
            strategy: self.strategy,
            data,
        }
    }

    /// Rebuilds a summary from a snapshot.  A finalized snapshot yields an
    /// already finalized summary.
    pub fn from_serialized(
        serialized: &SerializedVariableSummary,
    ) -> Result<Self, SplitError> {
        let cutpoints = if !serialized.finalized {
            None
        } else if serialized.is_continuous
            && serialized.strategy == CutpointStrategy::UniformContinuous
        {
            if serialized.data.len() != 2 {
                return Err(SplitError::InvalidSerialized(serialized.variable_number));
            }
            Some(Cutpoints::Continuous {
                lo: serialized.data[0],
                hi: serialized.data[1],
            })
        } else {
            Some(Cutpoints::Discrete {
                values: serialized.data.clone(),
            })
        };
        Ok(Self {
            variable_index: serialized.variable_number,
            observed: Vec::new(),
            is_continuous: serialized.is_continuous,
            strategy: serialized.strategy,
            cutpoints,
        })
    }
}
