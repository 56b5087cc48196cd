/*!
This crate implements the forest classifiers that a deep forest is built from. There are two kinds. A random forest grows each tree on a bootstrap sample and splits each node on the best Gini split among a random subset of the features. A completely random forest splits each node on a randomly chosen feature at a random threshold. Mixing the two kinds in one ensemble gives the diversity a cascade relies on.

Labels are zero-based class indexes. Predictions are class probabilities averaged over the trees.
*/

#![allow(clippy::tabs_in_doc_comments)]

use deepforest_util::progress_counter::ProgressCounter;
use itertools::izip;
use ndarray::prelude::*;
use num_traits::ToPrimitive;
use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use rayon::prelude::*;

mod train;

/// Selects how each node of each tree is split.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ForestKind {
	/// Choose the best Gini split among `max_features` randomly chosen features.
	Random,
	/// Choose a random non-constant feature and a uniformly random threshold within its range.
	CompletelyRandom,
}

/// These are the options passed to `Forest::train`.
#[derive(Clone, Debug)]
pub struct TrainOptions {
	pub kind: ForestKind,
	/// The number of trees to grow.
	pub n_trees: usize,
	/// The depth of a tree will never exceed this value. If it is `None`, trees are grown until their leaves are pure.
	pub max_depth: Option<usize>,
	/// A node is only split if at least this many training examples reach it.
	pub min_examples_split: usize,
	/// The number of features considered at each split by a random forest. If it is `None`, the square root of the number of features is used. Completely random forests ignore this value.
	pub max_features: Option<usize>,
	/// If true, each tree is grown on a bootstrap sample of the training examples.
	pub bootstrap: bool,
	/// The seed from which every tree's random number generator is derived.
	pub seed: u64,
}

impl TrainOptions {
	pub fn random_forest() -> Self {
		Self {
			kind: ForestKind::Random,
			n_trees: 100,
			max_depth: None,
			min_examples_split: 2,
			max_features: None,
			bootstrap: true,
			seed: 42,
		}
	}

	pub fn completely_random_forest() -> Self {
		Self {
			kind: ForestKind::CompletelyRandom,
			bootstrap: false,
			..Self::random_forest()
		}
	}
}

impl Default for TrainOptions {
	fn default() -> Self {
		Self::random_forest()
	}
}

/// This enum reports the training progress.
#[derive(Clone, Debug)]
pub enum TrainProgress {
	/// The counter is incremented once for each tree that finishes training.
	Training(ProgressCounter),
}

/// A trained forest.
#[derive(Clone, Debug)]
pub struct Forest {
	pub trees: Vec<Tree>,
	/// The number of classes, which is the length of each leaf's distribution.
	pub n_classes: usize,
	/// The number of features the forest was trained on.
	pub n_features: usize,
}

impl Forest {
	/// Train a forest. `features` has shape (n_examples, n_features) and `labels` has shape (n_examples) with every label less than `n_classes`.
	pub fn train(
		features: ArrayView2<f32>,
		labels: ArrayView1<usize>,
		n_classes: usize,
		options: &TrainOptions,
		update_progress: &mut dyn FnMut(TrainProgress),
	) -> Self {
		let progress_counter = ProgressCounter::new(options.n_trees.to_u64().unwrap_or(0));
		update_progress(TrainProgress::Training(progress_counter.clone()));
		// Draw every tree's seed up front so the result does not depend on the order in which rayon schedules the trees.
		let mut rng = Xoshiro256Plus::seed_from_u64(options.seed);
		let seeds: Vec<u64> = (0..options.n_trees).map(|_| rng.next_u64()).collect();
		let trees = seeds
			.into_par_iter()
			.map(|seed| {
				let tree = train::train_tree(features, labels, n_classes, options, seed);
				progress_counter.inc(1);
				tree
			})
			.collect();
		Self {
			trees,
			n_classes,
			n_features: features.ncols(),
		}
	}

	/// Write the class probabilities for each example to `probabilities`, which must have shape (n_examples, n_classes).
	pub fn predict(&self, features: ArrayView2<f32>, mut probabilities: ArrayViewMut2<f32>) {
		probabilities.fill(0.0);
		if self.trees.is_empty() {
			let uniform = 1.0 / self.n_classes.to_f32().unwrap_or(1.0);
			probabilities.fill(uniform);
			return;
		}
		let n_trees = self.trees.len().to_f32().unwrap_or(1.0);
		for (features, mut probabilities) in izip!(
			features.axis_iter(Axis(0)),
			probabilities.axis_iter_mut(Axis(0))
		) {
			for tree in self.trees.iter() {
				for (probability, value) in probabilities.iter_mut().zip(tree.predict(features)) {
					*probability += *value;
				}
			}
			probabilities /= n_trees;
		}
	}
}

/// Trees are stored as a `Vec` of `Node`s. The root is the first node, and each branch holds the indexes of its two children.
#[derive(Clone, Debug)]
pub struct Tree {
	pub nodes: Vec<Node>,
}

impl Tree {
	/// Return the class distribution of the leaf that `features` falls into.
	pub fn predict(&self, features: ArrayView1<f32>) -> &[f32] {
		let mut node_index = 0;
		loop {
			match &self.nodes[node_index] {
				Node::Branch(BranchNode {
					left_child_index,
					right_child_index,
					feature_index,
					split_value,
				}) => {
					node_index = if features[*feature_index] <= *split_value {
						*left_child_index
					} else {
						*right_child_index
					};
				}
				Node::Leaf(LeafNode { distribution, .. }) => return distribution,
			}
		}
	}

	pub fn n_leaves(&self) -> usize {
		self.nodes
			.iter()
			.filter(|node| matches!(node, Node::Leaf(_)))
			.count()
	}
}

#[derive(Clone, Debug)]
pub enum Node {
	Branch(BranchNode),
	Leaf(LeafNode),
}

#[derive(Clone, Debug)]
pub struct BranchNode {
	pub left_child_index: usize,
	pub right_child_index: usize,
	pub feature_index: usize,
	/// Examples whose feature value is less than or equal to the split value go to the left child.
	pub split_value: f32,
}

#[derive(Clone, Debug)]
pub struct LeafNode {
	/// The fraction of the training examples reaching this leaf in each class.
	pub distribution: Vec<f32>,
	pub examples_count: usize,
}

#[cfg(test)]
fn separable_dataset() -> (Array2<f32>, Array1<usize>) {
	// Three classes separated along the first feature. The second feature is noise-free filler.
	let mut features = Array2::zeros((60, 2));
	let mut labels = Array1::zeros(60);
	for class in 0..3 {
		for i in 0..20 {
			let row = class * 20 + i;
			features[(row, 0)] = class as f32 * 10.0 + i as f32 * 0.15;
			features[(row, 1)] = 0.5;
			labels[row] = class;
		}
	}
	(features, labels)
}

#[cfg(test)]
fn accuracy(forest: &Forest, features: ArrayView2<f32>, labels: ArrayView1<usize>) -> f32 {
	let mut probabilities = Array2::zeros((features.nrows(), forest.n_classes));
	forest.predict(features, probabilities.view_mut());
	let n_correct = probabilities
		.axis_iter(Axis(0))
		.zip(labels.iter())
		.filter(|(probabilities, label)| {
			let prediction = probabilities
				.iter()
				.enumerate()
				.max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap())
				.unwrap()
				.0;
			prediction == **label
		})
		.count();
	n_correct as f32 / labels.len() as f32
}

#[test]
fn test_random_forest_separable() {
	let (features, labels) = separable_dataset();
	let options = TrainOptions {
		n_trees: 20,
		..TrainOptions::random_forest()
	};
	let forest = Forest::train(features.view(), labels.view(), 3, &options, &mut |_| {});
	assert_eq!(forest.trees.len(), 20);
	assert!(accuracy(&forest, features.view(), labels.view()) > 0.9);
}

#[test]
fn test_completely_random_forest_separable() {
	let (features, labels) = separable_dataset();
	let options = TrainOptions {
		n_trees: 20,
		..TrainOptions::completely_random_forest()
	};
	let forest = Forest::train(features.view(), labels.view(), 3, &options, &mut |_| {});
	assert!(accuracy(&forest, features.view(), labels.view()) > 0.85);
}

#[test]
fn test_probabilities_sum_to_one() {
	let (features, labels) = separable_dataset();
	let options = TrainOptions {
		n_trees: 5,
		max_depth: Some(1),
		..TrainOptions::random_forest()
	};
	let forest = Forest::train(features.view(), labels.view(), 3, &options, &mut |_| {});
	let mut probabilities = Array2::zeros((features.nrows(), 3));
	forest.predict(features.view(), probabilities.view_mut());
	for row in probabilities.axis_iter(Axis(0)) {
		assert!((row.sum() - 1.0).abs() < 1e-5);
	}
}

#[test]
fn test_same_seed_same_forest() {
	let (features, labels) = separable_dataset();
	let options = TrainOptions {
		n_trees: 8,
		seed: 7,
		..TrainOptions::random_forest()
	};
	let predict = |forest: &Forest| {
		let mut probabilities = Array2::zeros((features.nrows(), 3));
		forest.predict(features.view(), probabilities.view_mut());
		probabilities
	};
	let a = Forest::train(features.view(), labels.view(), 3, &options, &mut |_| {});
	let b = Forest::train(features.view(), labels.view(), 3, &options, &mut |_| {});
	assert_eq!(predict(&a), predict(&b));
}

#[test]
fn test_progress_counts_trees() {
	let (features, labels) = separable_dataset();
	let options = TrainOptions {
		n_trees: 3,
		..TrainOptions::random_forest()
	};
	let mut counters = Vec::new();
	Forest::train(
		features.view(),
		labels.view(),
		3,
		&options,
		&mut |progress| match progress {
			TrainProgress::Training(counter) => counters.push(counter),
		},
	);
	assert_eq!(counters.len(), 1);
	assert_eq!(counters[0].get(), 3);
	assert!(counters[0].is_done());
}

#[test]
fn test_pure_node_is_a_leaf() {
	let features = arr2(&[[0.0], [1.0], [2.0], [3.0]]);
	let labels = arr1(&[0, 0, 0, 0]);
	let options = TrainOptions {
		n_trees: 1,
		..TrainOptions::random_forest()
	};
	let forest = Forest::train(features.view(), labels.view(), 2, &options, &mut |_| {});
	insta::assert_debug_snapshot!(forest.trees[0].nodes, @r###"
 [
     Leaf(
         LeafNode {
             distribution: [
                 1.0,
                 0.0,
             ],
             examples_count: 4,
         },
     ),
 ]
 "###);
}
