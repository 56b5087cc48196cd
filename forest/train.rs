use crate::{BranchNode, ForestKind, LeafNode, Node, TrainOptions, Tree};
use ndarray::prelude::*;
use num_traits::ToPrimitive;
use rand::{seq::index, Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use std::{cmp::Ordering, ops::Range};

/// A node waiting to be split or turned into a leaf. `examples_range` indexes into the shared examples index.
struct QueueItem {
	node_index: usize,
	examples_range: Range<usize>,
	depth: usize,
}

struct Split {
	feature_index: usize,
	split_value: f32,
}

/// Grow a single tree depth first.
pub fn train_tree(
	features: ArrayView2<f32>,
	labels: ArrayView1<usize>,
	n_classes: usize,
	options: &TrainOptions,
	seed: u64,
) -> Tree {
	let mut rng = Xoshiro256Plus::seed_from_u64(seed);
	let n_examples = features.nrows();
	let n_features = features.ncols();
	let mut examples_index: Vec<usize> = if options.bootstrap && n_examples > 0 {
		(0..n_examples)
			.map(|_| rng.gen_range(0..n_examples))
			.collect()
	} else {
		(0..n_examples).collect()
	};
	let max_features = options
		.max_features
		.unwrap_or_else(|| {
			n_features
				.to_f64()
				.map(|n| n.sqrt().ceil())
				.and_then(|n| n.to_usize())
				.unwrap_or(1)
		})
		.max(1)
		.min(n_features);
	let max_depth = options.max_depth.unwrap_or(usize::MAX);

	// Every node starts as an empty leaf and is overwritten once it has been processed.
	let mut nodes = vec![empty_leaf()];
	let mut queue = vec![QueueItem {
		node_index: 0,
		examples_range: 0..examples_index.len(),
		depth: 0,
	}];
	while let Some(item) = queue.pop() {
		let examples = &mut examples_index[item.examples_range.clone()];
		let class_counts = compute_class_counts(examples, labels, n_classes);
		let n_nonzero_classes = class_counts.iter().filter(|count| **count > 0).count();
		let should_split = n_features > 0
			&& examples.len() >= options.min_examples_split.max(2)
			&& item.depth < max_depth
			&& n_nonzero_classes > 1;
		let split = if should_split {
			match options.kind {
				ForestKind::Random => choose_best_split(
					features,
					labels,
					examples,
					&class_counts,
					max_features,
					&mut rng,
				),
				ForestKind::CompletelyRandom => choose_random_split(features, examples, &mut rng),
			}
		} else {
			None
		};
		let split = match split {
			Some(split) => split,
			None => {
				nodes[item.node_index] = make_leaf(&class_counts, examples.len());
				continue;
			}
		};
		let n_left = partition(examples, features, split.feature_index, split.split_value);
		// Rounding in the split value can send every example to one side. Such a split separates nothing.
		if n_left == 0 || n_left == examples.len() {
			nodes[item.node_index] = make_leaf(&class_counts, examples.len());
			continue;
		}
		let left_child_index = nodes.len();
		nodes.push(empty_leaf());
		let right_child_index = nodes.len();
		nodes.push(empty_leaf());
		nodes[item.node_index] = Node::Branch(BranchNode {
			left_child_index,
			right_child_index,
			feature_index: split.feature_index,
			split_value: split.split_value,
		});
		let start = item.examples_range.start;
		queue.push(QueueItem {
			node_index: right_child_index,
			examples_range: start + n_left..item.examples_range.end,
			depth: item.depth + 1,
		});
		queue.push(QueueItem {
			node_index: left_child_index,
			examples_range: start..start + n_left,
			depth: item.depth + 1,
		});
	}
	Tree { nodes }
}

fn empty_leaf() -> Node {
	Node::Leaf(LeafNode {
		distribution: Vec::new(),
		examples_count: 0,
	})
}

fn compute_class_counts(
	examples: &[usize],
	labels: ArrayView1<usize>,
	n_classes: usize,
) -> Vec<usize> {
	let mut class_counts = vec![0; n_classes];
	for example_index in examples.iter() {
		class_counts[labels[*example_index]] += 1;
	}
	class_counts
}

/// A leaf reached by no training examples predicts the uniform distribution.
fn make_leaf(class_counts: &[usize], examples_count: usize) -> Node {
	let distribution = if examples_count == 0 {
		let n_classes = class_counts.len().to_f32().unwrap_or(1.0);
		vec![1.0 / n_classes; class_counts.len()]
	} else {
		let total = examples_count.to_f32().unwrap_or(1.0);
		class_counts
			.iter()
			.map(|count| count.to_f32().unwrap_or(0.0) / total)
			.collect()
	};
	Node::Leaf(LeafNode {
		distribution,
		examples_count,
	})
}

fn gini(class_counts: &[usize], total: usize) -> f32 {
	if total == 0 {
		return 0.0;
	}
	let total = total.to_f32().unwrap_or(1.0);
	1.0 - class_counts
		.iter()
		.map(|count| {
			let p = count.to_f32().unwrap_or(0.0) / total;
			p * p
		})
		.sum::<f32>()
}

/// Search `max_features` randomly chosen features for the threshold with the lowest weighted Gini impurity. Returns `None` if no split lowers the impurity of the node.
fn choose_best_split(
	features: ArrayView2<f32>,
	labels: ArrayView1<usize>,
	examples: &[usize],
	class_counts: &[usize],
	max_features: usize,
	rng: &mut Xoshiro256Plus,
) -> Option<Split> {
	let n_examples = examples.len();
	let n_examples_f32 = n_examples.to_f32().unwrap_or(1.0);
	let mut best_impurity = gini(class_counts, n_examples);
	let mut best_split = None;
	let mut values: Vec<(f32, usize)> = Vec::with_capacity(n_examples);
	for feature_index in index::sample(rng, features.ncols(), max_features).iter() {
		values.clear();
		values.extend(
			examples
				.iter()
				.map(|example_index| (features[(*example_index, feature_index)], labels[*example_index])),
		);
		values.sort_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(Ordering::Equal));
		let mut left_counts = vec![0; class_counts.len()];
		let mut right_counts = class_counts.to_vec();
		for i in 0..n_examples - 1 {
			let (value, label) = values[i];
			left_counts[label] += 1;
			right_counts[label] -= 1;
			let next_value = values[i + 1].0;
			if value >= next_value {
				continue;
			}
			let n_left = i + 1;
			let n_right = n_examples - n_left;
			let impurity = (n_left.to_f32().unwrap_or(0.0) * gini(&left_counts, n_left)
				+ n_right.to_f32().unwrap_or(0.0) * gini(&right_counts, n_right))
				/ n_examples_f32;
			if impurity < best_impurity {
				best_impurity = impurity;
				best_split = Some(Split {
					feature_index,
					split_value: value + (next_value - value) / 2.0,
				});
			}
		}
	}
	best_split
}

/// Visit the features in random order and split the first one that is not constant over `examples` at a uniformly random threshold in `[min, max)`.
fn choose_random_split(
	features: ArrayView2<f32>,
	examples: &[usize],
	rng: &mut Xoshiro256Plus,
) -> Option<Split> {
	let n_features = features.ncols();
	for feature_index in index::sample(rng, n_features, n_features).iter() {
		let (min, max) = examples.iter().fold(
			(std::f32::INFINITY, std::f32::NEG_INFINITY),
			|(min, max), example_index| {
				let value = features[(*example_index, feature_index)];
				(min.min(value), max.max(value))
			},
		);
		if min < max {
			return Some(Split {
				feature_index,
				split_value: rng.gen_range(min..max),
			});
		}
	}
	None
}

/// Reorder `examples` so the ones going left come first and return how many go left.
fn partition(
	examples: &mut [usize],
	features: ArrayView2<f32>,
	feature_index: usize,
	split_value: f32,
) -> usize {
	let mut n_left = 0;
	for i in 0..examples.len() {
		if features[(examples[i], feature_index)] <= split_value {
			examples.swap(n_left, i);
			n_left += 1;
		}
	}
	n_left
}

#[test]
fn test_partition() {
	let features = arr2(&[[3.0], [1.0], [4.0], [1.5], [0.5]]);
	let mut examples = vec![0, 1, 2, 3, 4];
	let n_left = partition(&mut examples, features.view(), 0, 1.5);
	assert_eq!(n_left, 3);
	let mut left = examples[..n_left].to_vec();
	left.sort_unstable();
	assert_eq!(left, vec![1, 3, 4]);
}

#[test]
fn test_gini() {
	assert!((gini(&[5, 5], 10) - 0.5).abs() < 1e-6);
	assert!(gini(&[10, 0], 10).abs() < 1e-6);
	assert!(gini(&[0, 0], 0).abs() < 1e-6);
}

#[test]
fn test_best_split_separates_classes() {
	let features = arr2(&[[0.0, 9.0], [1.0, 9.0], [2.0, 9.0], [10.0, 9.0], [11.0, 9.0]]);
	let labels = arr1(&[0, 0, 0, 1, 1]);
	let examples = vec![0, 1, 2, 3, 4];
	let mut rng = Xoshiro256Plus::seed_from_u64(0);
	let split = choose_best_split(features.view(), labels.view(), &examples, &[3, 2], 2, &mut rng)
		.unwrap();
	assert_eq!(split.feature_index, 0);
	assert!((split.split_value - 6.0).abs() < 1e-6);
}

#[test]
fn test_random_split_skips_constant_features() {
	let features = arr2(&[[1.0, 0.0], [1.0, 4.0], [1.0, 2.0]]);
	let examples = vec![0, 1, 2];
	let mut rng = Xoshiro256Plus::seed_from_u64(3);
	let split = choose_random_split(features.view(), &examples, &mut rng).unwrap();
	assert_eq!(split.feature_index, 1);
	assert!(split.split_value >= 0.0 && split.split_value < 4.0);
	let constant = arr2(&[[1.0], [1.0]]);
	assert!(choose_random_split(constant.view(), &[0, 1], &mut rng).is_none());
}

#[test]
fn test_max_depth_limits_tree() {
	let features = arr2(&[[0.0], [1.0], [2.0], [3.0]]);
	let labels = arr1(&[0, 1, 0, 1]);
	let options = TrainOptions {
		n_trees: 1,
		max_depth: Some(1),
		bootstrap: false,
		..TrainOptions::random_forest()
	};
	let tree = train_tree(features.view(), labels.view(), 2, &options, 0);
	assert!(tree.nodes.len() <= 3);
	assert!(tree.n_leaves() <= 2);
}
