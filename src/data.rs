//! Abstractions over per-row residual records and per-node aggregates.
//!
//! Each tree samples a model for its data conditional on all the other
//! trees, so every training row carries a record of the variation left
//! unexplained by the rest of the ensemble.  What "residual" means depends
//! on the outcome distribution: the Gaussian model keeps a plain numeric
//! residual, while the logit model keeps latent-variable bookkeeping.  The
//! pairing between a row type and the statistic that can absorb it is fixed
//! at compile time through the associated `Data` type, so feeding a row to
//! an incompatible statistic is not representable.

/// One training row's residual record.
pub trait ResidualData {
    /// Shift this row's residual by `value`.
    ///
    /// Removing a tree's contribution from the shared residual calls this
    /// with the leaf mean; restoring it calls this with the negated mean.
    fn add_to_residual(&mut self, value: f64);
}

/// Fixed-size aggregate of the residual rows routed to one tree node.
///
/// A node's statistic is cleared and recomputed whenever the node's data
/// membership changes, and is the sole input to the node's integrated
/// likelihood and conjugate leaf-mean draw.
pub trait SufficientStatistics: Clone + Default {
    /// The concrete residual row type this statistic accumulates.
    type Data: ResidualData;

    /// Reset the aggregate to its empty state.
    fn clear(&mut self);

    /// Absorb one row into the aggregate.
    fn update(&mut self, row: &Self::Data);
}
