/*!
Classification metrics computed on a held out test set.

[`ClassificationMetrics`](struct.ClassificationMetrics.html) implements [`StreamingMetric`](trait.StreamingMetric.html), so it can be updated one chunk of predictions at a time and merged across threads.
*/

use ndarray::prelude::*;
use num_traits::ToPrimitive;

/**
The `StreamingMetric` trait defines a common interface to metrics computed over input that arrives in chunks. Call `update` once per chunk, `merge` to combine metrics aggregated separately, and `finalize` to produce the output.
*/
pub trait StreamingMetric<'a> {
	type Input;
	type Output;
	fn update(&mut self, input: Self::Input);
	fn merge(&mut self, other: Self);
	fn finalize(self) -> Self::Output;
}

pub struct ClassificationMetrics {
	/// The shape of the confusion matrix is (n_classes, n_classes). Rows are predictions and columns are labels.
	confusion_matrix: Array2<u64>,
}

pub struct ClassificationMetricsInput<'a> {
	/// (n_examples, n_classes)
	pub probabilities: ArrayView2<'a, f32>,
	/// (n_examples), zero-based
	pub labels: ArrayView1<'a, usize>,
}

#[derive(Debug)]
pub struct ClassificationMetricsOutput {
	pub class_metrics: Vec<ClassMetrics>,
	pub accuracy: f32,
	pub precision_unweighted: f32,
	pub precision_weighted: f32,
	pub recall_unweighted: f32,
	pub recall_weighted: f32,
	/// The accuracy of always predicting the most common class.
	pub baseline_accuracy: f32,
}

#[derive(Debug)]
pub struct ClassMetrics {
	pub true_positives: u64,
	pub false_positives: u64,
	pub true_negatives: u64,
	pub false_negatives: u64,
	pub accuracy: f32,
	pub precision: f32,
	pub recall: f32,
	pub f1_score: f32,
}

impl ClassificationMetrics {
	pub fn new(n_classes: usize) -> Self {
		Self {
			confusion_matrix: Array2::zeros((n_classes, n_classes)),
		}
	}
}

impl<'a> StreamingMetric<'a> for ClassificationMetrics {
	type Input = ClassificationMetricsInput<'a>;
	type Output = ClassificationMetricsOutput;

	fn update(&mut self, input: Self::Input) {
		let predictions = crate::argmax_rows(input.probabilities);
		for (prediction, label) in predictions.iter().zip(input.labels.iter()) {
			self.confusion_matrix[(*prediction, *label)] += 1;
		}
	}

	fn merge(&mut self, other: Self) {
		self.confusion_matrix += &other.confusion_matrix;
	}

	fn finalize(self) -> ClassificationMetricsOutput {
		let confusion_matrix = self.confusion_matrix;
		let n_classes = confusion_matrix.nrows();
		let n_examples = confusion_matrix.sum();
		let class_metrics: Vec<ClassMetrics> = (0..n_classes)
			.map(|class_index| {
				let true_positives = confusion_matrix[(class_index, class_index)];
				let false_positives = confusion_matrix.row(class_index).sum() - true_positives;
				let false_negatives = confusion_matrix.column(class_index).sum() - true_positives;
				let true_negatives = n_examples - true_positives - false_positives - false_negatives;
				let accuracy = ratio(true_positives + true_negatives, n_examples);
				let precision = ratio(true_positives, true_positives + false_positives);
				let recall = ratio(true_positives, true_positives + false_negatives);
				let f1_score = if precision + recall > 0.0 {
					2.0 * (precision * recall) / (precision + recall)
				} else {
					0.0
				};
				ClassMetrics {
					true_positives,
					false_positives,
					true_negatives,
					false_negatives,
					accuracy,
					precision,
					recall,
					f1_score,
				}
			})
			.collect();
		let accuracy = ratio(confusion_matrix.diag().sum(), n_examples);
		let n_classes_f32 = n_classes.to_f32().unwrap_or(1.0).max(1.0);
		let precision_unweighted = class_metrics
			.iter()
			.map(|class| class.precision)
			.sum::<f32>()
			/ n_classes_f32;
		let recall_unweighted =
			class_metrics.iter().map(|class| class.recall).sum::<f32>() / n_classes_f32;
		let n_examples_per_class = confusion_matrix.sum_axis(Axis(0));
		let weighted = |metric: fn(&ClassMetrics) -> f32| {
			let total = class_metrics
				.iter()
				.zip(n_examples_per_class.iter())
				.map(|(class, n_examples_in_class)| {
					metric(class) * n_examples_in_class.to_f32().unwrap_or(0.0)
				})
				.sum::<f32>();
			if n_examples > 0 {
				total / n_examples.to_f32().unwrap_or(1.0)
			} else {
				0.0
			}
		};
		let precision_weighted = weighted(|class| class.precision);
		let recall_weighted = weighted(|class| class.recall);
		let baseline_accuracy = ratio(
			n_examples_per_class.iter().copied().max().unwrap_or(0),
			n_examples,
		);
		ClassificationMetricsOutput {
			class_metrics,
			accuracy,
			precision_unweighted,
			precision_weighted,
			recall_unweighted,
			recall_weighted,
			baseline_accuracy,
		}
	}
}

/// Divide two counts, returning 0 when the denominator is 0.
fn ratio(numerator: u64, denominator: u64) -> f32 {
	if denominator == 0 {
		return 0.0;
	}
	numerator.to_f32().unwrap_or(0.0) / denominator.to_f32().unwrap_or(1.0)
}

#[cfg(test)]
fn one_hot(predictions: &[usize], n_classes: usize) -> Array2<f32> {
	Array2::from_shape_fn((predictions.len(), n_classes), |(i, j)| {
		if predictions[i] == j {
			1.0
		} else {
			0.0
		}
	})
}

#[test]
fn test_multiclass() {
	let mut metrics = ClassificationMetrics::new(3);
	let labels = arr1(&[0, 0, 0, 1, 1, 1, 1, 2, 2, 2]);
	let probabilities = one_hot(&[0, 0, 1, 1, 1, 1, 0, 2, 2, 1], 3);
	metrics.update(ClassificationMetricsInput {
		probabilities: probabilities.view(),
		labels: labels.view(),
	});
	let metrics = metrics.finalize();
	insta::assert_debug_snapshot!(metrics, @r###"
 ClassificationMetricsOutput {
     class_metrics: [
         ClassMetrics {
             true_positives: 2,
             false_positives: 1,
             true_negatives: 6,
             false_negatives: 1,
             accuracy: 0.8,
             precision: 0.6666667,
             recall: 0.6666667,
             f1_score: 0.6666667,
         },
         ClassMetrics {
             true_positives: 3,
             false_positives: 2,
             true_negatives: 4,
             false_negatives: 1,
             accuracy: 0.7,
             precision: 0.6,
             recall: 0.75,
             f1_score: 0.6666667,
         },
         ClassMetrics {
             true_positives: 2,
             false_positives: 0,
             true_negatives: 7,
             false_negatives: 1,
             accuracy: 0.9,
             precision: 1.0,
             recall: 0.6666667,
             f1_score: 0.8,
         },
     ],
     accuracy: 0.7,
     precision_unweighted: 0.75555557,
     precision_weighted: 0.74,
     recall_unweighted: 0.6944445,
     recall_weighted: 0.7,
     baseline_accuracy: 0.4,
 }
 "###);
}

#[test]
fn test_merge_matches_single_update() {
	let labels = arr1(&[0, 1, 1, 0, 1, 0]);
	let probabilities = arr2(&[
		[0.9, 0.1],
		[0.4, 0.6],
		[0.7, 0.3],
		[0.2, 0.8],
		[0.1, 0.9],
		[0.6, 0.4],
	]);
	let mut whole = ClassificationMetrics::new(2);
	whole.update(ClassificationMetricsInput {
		probabilities: probabilities.view(),
		labels: labels.view(),
	});
	let mut first = ClassificationMetrics::new(2);
	first.update(ClassificationMetricsInput {
		probabilities: probabilities.slice(s![..2, ..]),
		labels: labels.slice(s![..2]),
	});
	let mut second = ClassificationMetrics::new(2);
	second.update(ClassificationMetricsInput {
		probabilities: probabilities.slice(s![2.., ..]),
		labels: labels.slice(s![2..]),
	});
	first.merge(second);
	assert_eq!(first.confusion_matrix, whole.confusion_matrix);
	let metrics = first.finalize();
	assert!((metrics.accuracy - 4.0 / 6.0).abs() < 1e-6);
	assert!((metrics.baseline_accuracy - 0.5).abs() < 1e-6);
}

#[test]
fn test_missing_class_does_not_produce_nan() {
	let mut metrics = ClassificationMetrics::new(3);
	let labels = arr1(&[0, 1]);
	let probabilities = one_hot(&[0, 1], 3);
	metrics.update(ClassificationMetricsInput {
		probabilities: probabilities.view(),
		labels: labels.view(),
	});
	let metrics = metrics.finalize();
	let class = &metrics.class_metrics[2];
	assert_eq!(class.precision, 0.0);
	assert_eq!(class.recall, 0.0);
	assert_eq!(class.f1_score, 0.0);
	assert_eq!(metrics.accuracy, 1.0);
	assert!(metrics.precision_unweighted.is_finite());
}

#[test]
fn test_empty() {
	let metrics = ClassificationMetrics::new(2).finalize();
	assert_eq!(metrics.accuracy, 0.0);
	assert_eq!(metrics.baseline_accuracy, 0.0);
	assert_eq!(metrics.precision_weighted, 0.0);
}
