//! A binary regression tree subject to randomized structural moves.
//!
//! The tree is implemented as an arena of nodes indexed by `usize`.  Parent
//! and child links are indices into the arena, the tree owns the arena, and
//! pruned slots are recycled through a free list.  Index-based links avoid
//! the borrow checker issues of pointer-based binary trees and keep node
//! ids stable across grow/prune moves.
//!
//! Alongside the arena the tree maintains two index sets: the current
//! leaves, and the interior nodes whose children are both leaves (the only
//! legal prune targets).  Both sets are updated incrementally on every
//! grow/prune and must always match what a full traversal would produce.

use core::fmt;

use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::Rng;
use thiserror::Error;

use crate::data::{ResidualData, SufficientStatistics};

/// Errors related to tree mutation and (de)serialization.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    /// `grow` was called on an interior node.
    #[error("cannot grow a non-leaf node")]
    NonLeafGrow,
    /// `grow` was called before the node's split variable and cutpoint
    /// were set.
    #[error("cannot grow a leaf before its variable and cutpoint are set")]
    SplitNotSet,
    /// The node index does not refer to a live node.
    #[error("node index {0} does not exist")]
    InvalidNodeIndex(usize),
    /// A serialized tree matrix violates the expected format.
    #[error("malformed tree matrix: {0}")]
    BadMatrix(String),
}

/// One node of a [`Tree`]: either a leaf or an interior node.
///
/// Every node carries a mean parameter, but only leaves use it for
/// prediction.  The split `(variable, cutpoint)` is meaningful for interior
/// nodes; it may also be set on a leaf while a grow proposal is being
/// evaluated.  Leaves additionally hold the ids of the training rows
/// currently routed to them and one owned sufficient-statistics value.
#[derive(Debug, Clone)]
pub struct TreeNode<S> {
    parent: Option<usize>,
    left: Option<usize>,
    right: Option<usize>,
    depth: usize,
    mean: f64,
    split: Option<(usize, f64)>,
    rows: Vec<usize>,
    suf: S,
}

impl<S: SufficientStatistics> TreeNode<S> {
    fn leaf(mean: f64, parent: Option<usize>, depth: usize) -> Self {
        Self {
            parent,
            left: None,
            right: None,
            depth,
            mean,
            split: None,
            rows: Vec::new(),
            suf: S::default(),
        }
    }
}

/// A regression tree owning an arena of [`TreeNode`]s.
#[derive(Debug, Clone)]
pub struct Tree<S> {
    slots: Vec<Option<TreeNode<S>>>,
    free: Vec<usize>,
    leaves: Vec<usize>,
    parents_of_leaves: Vec<usize>,
}

impl<S: SufficientStatistics> Tree<S> {
    /// Creates a single-node tree whose root carries `mean`.
    pub fn new(mean: f64) -> Self {
        Self {
            slots: vec![Some(TreeNode::leaf(mean, None, 0))],
            free: Vec::new(),
            leaves: vec![0],
            parents_of_leaves: Vec::new(),
        }
    }

    /// The id of the root node.  The root is never pruned away.
    pub fn root(&self) -> usize {
        0
    }

    fn node(&self, id: usize) -> &TreeNode<S> {
        self.slots[id].as_ref().expect("node id refers to a live node")
    }

    fn node_mut(&mut self, id: usize) -> &mut TreeNode<S> {
        self.slots[id].as_mut().expect("node id refers to a live node")
    }

    fn is_live(&self, id: usize) -> bool {
        matches!(self.slots.get(id), Some(Some(_)))
    }

    /// Whether the node has no children.
    pub fn is_leaf(&self, id: usize) -> bool {
        self.node(id).left.is_none()
    }

    /// The node's parent, or `None` at the root.
    pub fn parent(&self, id: usize) -> Option<usize> {
        self.node(id).parent
    }

    /// The node's `(left, right)` children, or `None` at a leaf.
    pub fn children(&self, id: usize) -> Option<(usize, usize)> {
        match (self.node(id).left, self.node(id).right) {
            (Some(l), Some(r)) => Some((l, r)),
            _ => None,
        }
    }

    /// Whether the node is the left child of its parent.
    pub fn is_left_child(&self, id: usize) -> bool {
        self.node(id)
            .parent
            .map_or(false, |p| self.node(p).left == Some(id))
    }

    /// Distance from the root.
    pub fn depth(&self, id: usize) -> usize {
        self.node(id).depth
    }

    /// The node's mean parameter.
    pub fn mean(&self, id: usize) -> f64 {
        self.node(id).mean
    }

    /// Sets the node's mean parameter.
    pub fn set_mean(&mut self, id: usize, mean: f64) {
        self.node_mut(id).mean = mean;
    }

    /// The node's `(variable, cutpoint)` split, if one has been set.
    pub fn split(&self, id: usize) -> Option<(usize, f64)> {
        self.node(id).split
    }

    /// Sets the variable and cutpoint the node splits on.  Observations
    /// with `x[variable] <= cutpoint` fall to the left child.
    pub fn set_split(&mut self, id: usize, variable: usize, cutpoint: f64) {
        self.node_mut(id).split = Some((variable, cutpoint));
    }

    /// Ids of the training rows currently routed to the node.
    pub fn rows(&self, id: usize) -> &[usize] {
        &self.node(id).rows
    }

    /// Replaces the node's routed row ids.
    pub fn set_rows(&mut self, id: usize, rows: Vec<usize>) {
        self.node_mut(id).rows = rows;
    }

    /// Total number of live nodes.
    pub fn number_of_nodes(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Number of leaves.
    pub fn number_of_leaves(&self) -> usize {
        self.leaves.len()
    }

    /// Number of interior nodes whose children are both leaves.
    pub fn number_of_parents_of_leaves(&self) -> usize {
        self.parents_of_leaves.len()
    }

    /// Ids of the current leaves, in no particular order.
    pub fn leaves(&self) -> &[usize] {
        &self.leaves
    }

    /// Ids of the interior nodes whose children are both leaves.
    pub fn parents_of_leaves(&self) -> &[usize] {
        &self.parents_of_leaves
    }

    /// `(variable, cutpoint)` of every interior node.
    pub fn splits(&self) -> Vec<(usize, f64)> {
        self.slots
            .iter()
            .flatten()
            .filter(|node| node.left.is_some())
            .map(|node| node.split.expect("interior node has a split"))
            .collect()
    }

    /// A uniformly random leaf.
    pub fn random_leaf<R: Rng>(&self, rng: &mut R) -> usize {
        self.leaves[rng.gen_range(0..self.leaves.len())]
    }

    /// A uniformly random interior node whose children are both leaves, or
    /// `None` if the tree is a single node.
    pub fn random_parent_of_leaves<R: Rng>(&self, rng: &mut R) -> Option<usize> {
        if self.parents_of_leaves.is_empty() {
            None
        } else {
            Some(self.parents_of_leaves[rng.gen_range(0..self.parents_of_leaves.len())])
        }
    }

    /// A uniformly random interior node, or `None` if the tree is a single
    /// node.
    pub fn random_interior<R: Rng>(&self, rng: &mut R) -> Option<usize> {
        let interior: Vec<usize> = (0..self.slots.len())
            .filter(|&id| self.is_live(id) && !self.is_leaf(id))
            .collect();
        if interior.is_empty() {
            None
        } else {
            Some(interior[rng.gen_range(0..interior.len())])
        }
    }

    /// Walks from the root to a leaf and returns the leaf's mean.
    pub fn predict(&self, x: &ArrayView1<f64>) -> f64 {
        let mut id = self.root();
        loop {
            let node = self.node(id);
            match (node.left, node.right) {
                (Some(left), Some(right)) => {
                    let (variable, cutpoint) =
                        node.split.expect("interior node has a split");
                    id = if x[variable] <= cutpoint { left } else { right };
                }
                _ => return node.mean,
            }
        }
    }

    fn alloc(&mut self, node: TreeNode<S>) -> usize {
        if let Some(id) = self.free.pop() {
            self.slots[id] = Some(node);
            id
        } else {
            self.slots.push(Some(node));
            self.slots.len() - 1
        }
    }

    fn remove_from(set: &mut Vec<usize>, id: usize) {
        if let Some(pos) = set.iter().position(|&entry| entry == id) {
            set.swap_remove(pos);
        }
    }

    /// Converts a leaf into an interior node with two new leaf children and
    /// returns their `(left, right)` ids.
    ///
    /// The leaf's split must be set beforehand with [`set_split`].  The
    /// leaf's routed rows are not partitioned here; route them afterwards
    /// with [`set_rows`] or [`reroute_subtree`].
    ///
    /// [`set_split`]: Tree::set_split
    /// [`set_rows`]: Tree::set_rows
    /// [`reroute_subtree`]: Tree::reroute_subtree
    pub fn grow(
        &mut self,
        leaf: usize,
        left_mean: f64,
        right_mean: f64,
    ) -> Result<(usize, usize), TreeError> {
        if !self.is_live(leaf) {
            return Err(TreeError::InvalidNodeIndex(leaf));
        }
        if !self.is_leaf(leaf) {
            return Err(TreeError::NonLeafGrow);
        }
        if self.node(leaf).split.is_none() {
            return Err(TreeError::SplitNotSet);
        }

        let depth = self.node(leaf).depth + 1;
        let left = self.alloc(TreeNode::leaf(left_mean, Some(leaf), depth));
        let right = self.alloc(TreeNode::leaf(right_mean, Some(leaf), depth));
        self.node_mut(leaf).left = Some(left);
        self.node_mut(leaf).right = Some(right);

        Self::remove_from(&mut self.leaves, leaf);
        self.leaves.push(left);
        self.leaves.push(right);

        // The grown node's children are both leaves; its parent no longer
        // qualifies as a prune candidate.
        self.parents_of_leaves.push(leaf);
        if let Some(parent) = self.node(leaf).parent {
            Self::remove_from(&mut self.parents_of_leaves, parent);
        }

        Ok((left, right))
    }

    /// Deletes the entire subtree below `node`, making it a leaf again, and
    /// returns the number of nodes removed.
    ///
    /// The node's mean is left untouched; a caller undoing a rejected grow
    /// or accepting a prune is expected to reset it separately.
    pub fn prune_descendants(&mut self, node: usize) -> usize {
        let mut stack: Vec<usize> = match self.children(node) {
            Some((left, right)) => vec![left, right],
            None => return 0,
        };
        self.node_mut(node).left = None;
        self.node_mut(node).right = None;

        let mut removed = 0;
        while let Some(id) = stack.pop() {
            if let Some((left, right)) = self.children(id) {
                stack.push(left);
                stack.push(right);
            }
            Self::remove_from(&mut self.leaves, id);
            Self::remove_from(&mut self.parents_of_leaves, id);
            self.slots[id] = None;
            self.free.push(id);
            removed += 1;
        }

        self.leaves.push(node);
        Self::remove_from(&mut self.parents_of_leaves, node);
        if let Some(parent) = self.node(node).parent {
            let (left, right) = self
                .children(parent)
                .expect("parent of a live node has two children");
            if self.is_leaf(left) && self.is_leaf(right) {
                self.parents_of_leaves.push(parent);
            }
        }
        removed
    }

    /// Tightens `[lo, hi]` with the cutpoints of every ancestor of `node`
    /// that splits on `variable`.
    ///
    /// An ancestor from which `node` descends to the left routes only
    /// observations `<=` its cutpoint down here, so it lowers the upper
    /// bound; a right-hand ancestor raises the lower bound.
    pub fn cutpoint_range(
        &self,
        node: usize,
        variable: usize,
        mut lo: f64,
        mut hi: f64,
    ) -> (f64, f64) {
        let mut child = node;
        while let Some(parent) = self.node(child).parent {
            if let Some((split_variable, cutpoint)) = self.node(parent).split {
                if split_variable == variable {
                    if self.node(parent).left == Some(child) {
                        hi = hi.min(cutpoint);
                    } else {
                        lo = lo.max(cutpoint);
                    }
                }
            }
            child = parent;
        }
        (lo, hi)
    }

    /// Routes every training row from the root down through the tree.
    ///
    /// Each node keeps the rows that pass through it, so interior nodes
    /// hold the union of their children's rows.
    pub fn populate_data(&mut self, predictors: &ArrayView2<f64>) {
        self.node_mut(0).rows = (0..predictors.nrows()).collect();
        self.reroute_subtree(0, predictors);
    }

    /// Re-partitions the rows held at `node` down through its descendants
    /// according to the current splits.  The node's own row set is left
    /// unchanged.
    pub fn reroute_subtree(&mut self, node: usize, predictors: &ArrayView2<f64>) {
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            let (left, right) = match self.children(id) {
                Some(pair) => pair,
                None => continue,
            };
            let (variable, cutpoint) =
                self.node(id).split.expect("interior node has a split");
            let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = self
                .node(id)
                .rows
                .iter()
                .copied()
                .partition(|&row| predictors[[row, variable]] <= cutpoint);
            self.node_mut(left).rows = left_rows;
            self.node_mut(right).rows = right_rows;
            stack.push(left);
            stack.push(right);
        }
    }

    /// Clears routed rows and sufficient statistics on every node.
    pub fn clear_data(&mut self) {
        for slot in self.slots.iter_mut().flatten() {
            slot.rows.clear();
            slot.suf.clear();
        }
    }

    /// Recomputes the node's sufficient statistics from its currently
    /// routed rows and returns the cached aggregate.
    pub fn compute_suf(&mut self, id: usize, data: &[S::Data]) -> &S {
        let node = self.node_mut(id);
        node.suf.clear();
        let TreeNode { rows, suf, .. } = node;
        for &row in rows.iter() {
            suf.update(&data[row]);
        }
        &self.node(id).suf
    }

    /// Subtracts this tree's contribution from the shared residual: every
    /// leaf adds its mean back into the residual of each row it holds.
    pub fn remove_mean_effect(&self, data: &mut [S::Data]) {
        for &leaf in &self.leaves {
            let node = self.node(leaf);
            for &row in &node.rows {
                data[row].add_to_residual(node.mean);
            }
        }
    }

    /// Inverse of [`remove_mean_effect`]: restores this tree's contribution
    /// into the shared residual.
    ///
    /// [`remove_mean_effect`]: Tree::remove_mean_effect
    pub fn replace_mean_effect(&self, data: &mut [S::Data]) {
        for &leaf in &self.leaves {
            let node = self.node(leaf);
            for &row in &node.rows {
                data[row].add_to_residual(-node.mean);
            }
        }
    }

    /// Serializes the tree as an `N x 4` matrix.
    ///
    /// Rows are nodes in preorder, so the row index is the node id, parent
    /// ids are always smaller than child ids, and a left child occupies the
    /// row directly after its parent with the right subtree following the
    /// left one.  Columns are: parent id (-1 at the root), mean, split
    /// variable (-1 at a leaf), cutpoint (+infinity at a leaf).
    pub fn to_matrix(&self) -> Array2<f64> {
        let mut matrix = Array2::zeros((self.number_of_nodes(), 4));
        let mut stack = vec![(self.root(), -1.0_f64)];
        let mut next = 0;
        while let Some((id, parent_row)) = stack.pop() {
            let row = next;
            next += 1;
            let node = self.node(id);
            matrix[[row, 0]] = parent_row;
            matrix[[row, 1]] = node.mean;
            match (node.left, node.right) {
                (Some(left), Some(right)) => {
                    let (variable, cutpoint) =
                        node.split.expect("interior node has a split");
                    matrix[[row, 2]] = variable as f64;
                    matrix[[row, 3]] = cutpoint;
                    stack.push((right, row as f64));
                    stack.push((left, row as f64));
                }
                _ => {
                    matrix[[row, 2]] = -1.0;
                    matrix[[row, 3]] = f64::INFINITY;
                }
            }
        }
        matrix
    }

    /// Rebuilds a tree from the matrix format produced by [`to_matrix`].
    ///
    /// No data or sufficient statistics are associated with the rebuilt
    /// tree; route rows with [`populate_data`] before sampling.
    ///
    /// [`to_matrix`]: Tree::to_matrix
    /// [`populate_data`]: Tree::populate_data
    pub fn from_matrix(matrix: &ArrayView2<f64>) -> Result<Self, TreeError> {
        if matrix.ncols() != 4 {
            return Err(TreeError::BadMatrix(format!(
                "expected 4 columns, got {}",
                matrix.ncols()
            )));
        }
        if matrix.nrows() == 0 {
            return Err(TreeError::BadMatrix("no rows".to_string()));
        }
        if matrix[[0, 0]] != -1.0 {
            return Err(TreeError::BadMatrix(
                "row 0 must be the root with parent id -1".to_string(),
            ));
        }

        let parse_split = |row: usize| -> Option<(usize, f64)> {
            let variable = matrix[[row, 2]];
            if variable >= 0.0 {
                Some((variable as usize, matrix[[row, 3]]))
            } else {
                None
            }
        };

        let mut slots: Vec<Option<TreeNode<S>>> = Vec::with_capacity(matrix.nrows());
        let mut root = TreeNode::leaf(matrix[[0, 1]], None, 0);
        root.split = parse_split(0);
        slots.push(Some(root));

        for id in 1..matrix.nrows() {
            let parent = matrix[[id, 0]];
            if parent < 0.0 || parent >= id as f64 || parent.fract() != 0.0 {
                return Err(TreeError::BadMatrix(format!(
                    "row {} has invalid parent id {}",
                    id, parent
                )));
            }
            let parent = parent as usize;
            let depth = slots[parent].as_ref().map(|p| p.depth).unwrap_or(0) + 1;
            let mut node = TreeNode::leaf(matrix[[id, 1]], Some(parent), depth);
            node.split = parse_split(id);
            slots.push(Some(node));

            let slot = slots[parent].as_mut().expect("parent slot is live");
            if slot.left.is_none() {
                slot.left = Some(id);
            } else if slot.right.is_none() {
                slot.right = Some(id);
            } else {
                return Err(TreeError::BadMatrix(format!(
                    "node {} has more than two children",
                    parent
                )));
            }
        }

        let mut leaves = Vec::new();
        let mut parents_of_leaves = Vec::new();
        for id in 0..slots.len() {
            let node = slots[id].as_ref().expect("all slots are live");
            match (node.left, node.right) {
                (None, None) => leaves.push(id),
                (Some(left), Some(right)) => {
                    if node.split.is_none() {
                        return Err(TreeError::BadMatrix(format!(
                            "interior node {} has no split variable",
                            id
                        )));
                    }
                    let left_is_leaf = slots[left].as_ref().is_some_and(|n| n.left.is_none());
                    let right_is_leaf = slots[right].as_ref().is_some_and(|n| n.left.is_none());
                    if left_is_leaf && right_is_leaf {
                        parents_of_leaves.push(id);
                    }
                }
                _ => {
                    return Err(TreeError::BadMatrix(format!(
                        "node {} has exactly one child",
                        id
                    )));
                }
            }
        }

        Ok(Self {
            slots,
            free: Vec::new(),
            leaves,
            parents_of_leaves,
        })
    }
}

/// Compares topology and numeric node values, ignoring routed data and
/// sufficient statistics.
impl<S: SufficientStatistics> PartialEq for Tree<S> {
    fn eq(&self, other: &Self) -> bool {
        self.to_matrix() == other.to_matrix()
    }
}

impl<S: SufficientStatistics> fmt::Display for Tree<S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "tree with {} nodes, {} leaves",
            self.number_of_nodes(),
            self.number_of_leaves()
        )?;
        write!(f, "{}", self.to_matrix())
    }
}
