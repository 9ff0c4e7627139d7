//   Copyright 2024 The PyMC Developers
//
//   Licensed under the Apache License, Version 2.0 (the "License");
//   you may not use this file except in compliance with the License.
//   You may obtain a copy of the License at
//
//       http://www.apache.org/licenses/LICENSE-2.0
//
//   Unless required by applicable law or agreed to in writing, software
//   distributed under the License is distributed on an "AS IS" BASIS,
//   WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//   See the License for the specific language governing permissions and
//   limitations under the License.
#![warn(missing_docs, clippy::needless_borrow)]

//! mh_bart provides an extensible implementation of Bayesian Additive
//! Regression Trees (BART). BART approximates a regression function by
//! the sum of many shallow trees, with a depth prior restricting each
//! tree's learning capacity so that no individual tree explains the
//! data on its own. Inference is performed by Metropolis-Hastings
//! backfitting: each sweep visits every tree, proposes a single
//! structural move (grow, prune, or change a cutpoint) against the
//! residuals of all the other trees, and redraws leaf means from their
//! conjugate conditionals. Gaussian and binomial logit outcome families
//! are provided; new families plug in through the
//! [`sampler::Outcome`] trait.

pub mod data;
pub mod gaussian;
pub mod logit;
pub mod math;
pub mod model;
pub mod sampler;
pub mod splits;
pub mod tree;
