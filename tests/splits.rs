/// Tests for variable summaries and cutpoint generation.
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use mh_bart::gaussian::GaussianSuf;
use mh_bart::splits::{CutpointStrategy, SplitError, VariableSummary};
use mh_bart::tree::Tree;

fn rng() -> Xoshiro256PlusPlus {
    Xoshiro256PlusPlus::seed_from_u64(7)
}

#[test]
fn test_cutpoint_before_finalize_fails() {
    let summary = VariableSummary::new(3);
    let tree: Tree<GaussianSuf> = Tree::new(0.0);
    let result = summary.random_cutpoint(&mut rng(), &tree, tree.root());
    assert_eq!(result.unwrap_err(), SplitError::NotFinalized(3));
}

#[test]
fn test_continuous_cutpoints_stay_in_range() {
    let mut summary = VariableSummary::new(0);
    for i in 0..100 {
        summary.observe(i as f64 / 10.0).unwrap();
    }
    summary
        .finalize(20, CutpointStrategy::UniformContinuous)
        .unwrap();
    assert!(summary.is_finalized());

    let tree: Tree<GaussianSuf> = Tree::new(0.0);
    let mut rng = rng();
    for _ in 0..50 {
        let cutpoint = summary
            .random_cutpoint(&mut rng, &tree, tree.root())
            .unwrap()
            .unwrap();
        assert!((0.0..9.9).contains(&cutpoint));
    }
}

#[test]
fn test_few_distinct_values_are_discrete() {
    let mut summary = VariableSummary::new(0);
    for value in [3.0, 1.0, 2.0, 1.0, 3.0, 2.0, 1.0] {
        summary.observe(value).unwrap();
    }
    summary
        .finalize(20, CutpointStrategy::UniformContinuous)
        .unwrap();

    // Only 1.0 and 2.0 remain; splitting at the maximum sends every
    // observation left.
    let tree: Tree<GaussianSuf> = Tree::new(0.0);
    let mut rng = rng();
    for _ in 0..50 {
        let cutpoint = summary
            .random_cutpoint(&mut rng, &tree, tree.root())
            .unwrap()
            .unwrap();
        assert!(cutpoint == 1.0 || cutpoint == 2.0);
    }
}

#[test]
fn test_binary_dummy_cannot_be_resplit() {
    let mut summary = VariableSummary::new(0);
    for value in [0.0, 1.0, 0.0, 1.0, 1.0] {
        summary.observe(value).unwrap();
    }
    summary
        .finalize(20, CutpointStrategy::UniformContinuous)
        .unwrap();

    let mut tree: Tree<GaussianSuf> = Tree::new(0.0);
    let mut rng = rng();
    let cutpoint = summary
        .random_cutpoint(&mut rng, &tree, tree.root())
        .unwrap()
        .unwrap();
    assert_eq!(cutpoint, 0.0);

    tree.set_split(tree.root(), 0, cutpoint);
    let (left, right) = tree.grow(tree.root(), 0.0, 0.0).unwrap();

    // Below either child the dummy offers no further cutpoint.
    assert_eq!(
        summary.random_cutpoint(&mut rng, &tree, left).unwrap(),
        None
    );
    assert_eq!(
        summary.random_cutpoint(&mut rng, &tree, right).unwrap(),
        None
    );
}

#[test]
fn test_observe_after_finalize_fails() {
    let mut summary = VariableSummary::new(2);
    summary.observe(1.0).unwrap();
    summary
        .finalize(20, CutpointStrategy::UniformContinuous)
        .unwrap();
    assert_eq!(
        summary.observe(2.0).unwrap_err(),
        SplitError::ObservedAfterFinalize(2)
    );
}

#[test]
fn test_finalize_twice_fails() {
    let mut summary = VariableSummary::new(2);
    summary.observe(1.0).unwrap();
    summary
        .finalize(20, CutpointStrategy::UniformContinuous)
        .unwrap();
    assert_eq!(
        summary
            .finalize(20, CutpointStrategy::UniformContinuous)
            .unwrap_err(),
        SplitError::AlreadyFinalized(2)
    );
}

#[test]
fn test_non_finite_values_are_ignored() {
    let mut summary = VariableSummary::new(0);
    summary.observe(f64::NAN).unwrap();
    summary.observe(f64::INFINITY).unwrap();
    summary.observe(1.0).unwrap();
    summary.observe(2.0).unwrap();
    summary
        .finalize(0, CutpointStrategy::UniformContinuous)
        .unwrap();

    let tree: Tree<GaussianSuf> = Tree::new(0.0);
    let cutpoint = summary
        .random_cutpoint(&mut rng(), &tree, tree.root())
        .unwrap()
        .unwrap();
    assert!(cutpoint > 0.0 && cutpoint < 2.0);
}

#[test]
fn test_uniform_discrete_grid() {
    let mut summary = VariableSummary::new(0);
    for i in 0..100 {
        summary.observe(i as f64).unwrap();
    }
    summary
        .finalize(9, CutpointStrategy::UniformDiscrete)
        .unwrap();

    // 9 evenly spaced cutpoints strictly inside [0, 99].
    let tree: Tree<GaussianSuf> = Tree::new(0.0);
    let mut rng = rng();
    for _ in 0..50 {
        let cutpoint = summary
            .random_cutpoint(&mut rng, &tree, tree.root())
            .unwrap()
            .unwrap();
        assert!(cutpoint > 0.0 && cutpoint < 99.0);
        let tenth = cutpoint / 9.9;
        assert!((tenth - tenth.round()).abs() < 1e-9);
    }
}

#[test]
fn test_quantile_cutpoints_are_observed_values() {
    let mut summary = VariableSummary::new(0);
    let values: Vec<f64> = (0..200).map(|i| (i as f64 / 10.0).exp()).collect();
    for &value in &values {
        summary.observe(value).unwrap();
    }
    summary
        .finalize(15, CutpointStrategy::DiscreteQuantiles)
        .unwrap();

    let tree: Tree<GaussianSuf> = Tree::new(0.0);
    let mut rng = rng();
    for _ in 0..50 {
        let cutpoint = summary
            .random_cutpoint(&mut rng, &tree, tree.root())
            .unwrap()
            .unwrap();
        assert!(values.contains(&cutpoint));
    }
}

#[test]
fn test_serialize_round_trip() {
    let mut summary = VariableSummary::new(4);
    for value in [0.0, 1.0, 2.0, 3.0, 2.0] {
        summary.observe(value).unwrap();
    }
    summary
        .finalize(20, CutpointStrategy::UniformContinuous)
        .unwrap();

    let serialized = summary.serialize();
    let rebuilt = VariableSummary::from_serialized(&serialized).unwrap();
    assert!(rebuilt.is_finalized());
    assert_eq!(rebuilt.variable_index(), 4);
    assert_eq!(rebuilt.serialize(), serialized);
}

#[test]
fn test_serialize_unfinalized_round_trip() {
    let mut summary = VariableSummary::new(0);
    summary.observe(1.0).unwrap();

    let serialized = summary.serialize();
    assert!(!serialized.finalized);
    let rebuilt = VariableSummary::from_serialized(&serialized).unwrap();
    assert!(!rebuilt.is_finalized());
}

#[test]
fn test_reset_allows_refinalize() {
    let mut summary = VariableSummary::new(0);
    summary.observe(1.0).unwrap();
    summary
        .finalize(20, CutpointStrategy::UniformContinuous)
        .unwrap();
    summary.reset();
    assert!(!summary.is_finalized());
    summary.observe(5.0).unwrap();
    summary
        .finalize(20, CutpointStrategy::UniformContinuous)
        .unwrap();
}
