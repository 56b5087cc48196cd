use crate::{
	config::{ForestConfig, ModelConfig},
	Classifier, Error, Result,
};
use deepforest_forest::{Forest, TrainOptions};
use ndarray::prelude::*;
use rand::RngCore;

/// Adapts a [`Forest`](../deepforest_forest/struct.Forest.html) to the `Classifier` trait.
#[derive(Clone, Debug)]
pub struct ForestClassifier {
	options: TrainOptions,
	n_classes: Option<usize>,
	forest: Option<Forest>,
}

impl ForestClassifier {
	/// If `n_classes` is `None`, it is inferred from the largest label seen by `fit`. Fixing it keeps the probability width the same for every ensemble, even when a training set is missing a class.
	pub fn new(options: TrainOptions, n_classes: Option<usize>) -> Self {
		Self {
			options,
			n_classes,
			forest: None,
		}
	}

	pub fn options(&self) -> &TrainOptions {
		&self.options
	}

	pub fn forest(&self) -> Option<&Forest> {
		self.forest.as_ref()
	}
}

impl Classifier for ForestClassifier {
	fn fit(&mut self, features: ArrayView2<f32>, labels: ArrayView1<usize>) -> Result<()> {
		if features.nrows() == 0 {
			return Err(Error::EmptyDataset);
		}
		if labels.len() != features.nrows() {
			return Err(Error::LabelCountMismatch {
				n_samples: features.nrows(),
				n_labels: labels.len(),
			});
		}
		let max_label = labels.iter().copied().max().unwrap_or(0);
		let n_classes = match self.n_classes {
			Some(n_classes) if max_label >= n_classes => {
				return Err(Error::LabelOutOfRange {
					label: max_label,
					n_classes,
				})
			}
			Some(n_classes) => n_classes,
			None => max_label + 1,
		};
		let forest = Forest::train(features, labels, n_classes, &self.options, &mut |_| {});
		self.n_classes = Some(n_classes);
		self.forest = Some(forest);
		Ok(())
	}

	fn predict_proba(&self, features: ArrayView2<f32>) -> Result<Array2<f32>> {
		let forest = self.forest.as_ref().ok_or(Error::NotFitted)?;
		if features.ncols() != forest.n_features {
			return Err(Error::FeatureCountMismatch {
				expected: forest.n_features,
				got: features.ncols(),
			});
		}
		let mut probabilities = Array2::zeros((features.nrows(), forest.n_classes));
		forest.predict(features, probabilities.view_mut());
		Ok(probabilities)
	}
}

impl ModelConfig {
	/// Build an unfitted classifier from this config.
	pub fn build(&self, n_classes: Option<usize>, seed: u64) -> Box<dyn Classifier> {
		let (mut options, config) = match self {
			ModelConfig::RandomForest(config) => (TrainOptions::random_forest(), config),
			ModelConfig::CompletelyRandomForest(config) => {
				(TrainOptions::completely_random_forest(), config)
			}
		};
		let ForestConfig {
			n_trees,
			max_depth,
			min_examples_split,
			max_features,
			seed: config_seed,
		} = config;
		if let Some(n_trees) = n_trees {
			options.n_trees = *n_trees;
		}
		if let Some(max_depth) = max_depth {
			options.max_depth = Some(*max_depth);
		}
		if let Some(min_examples_split) = min_examples_split {
			options.min_examples_split = *min_examples_split;
		}
		if let Some(max_features) = max_features {
			options.max_features = Some(*max_features);
		}
		options.seed = config_seed.unwrap_or(seed);
		Box::new(ForestClassifier::new(options, n_classes))
	}
}

/// Build one classifier per config. Configs without a seed draw one from `rng`.
pub fn build_models(
	configs: &[ModelConfig],
	n_classes: Option<usize>,
	rng: &mut impl RngCore,
) -> Vec<Box<dyn Classifier>> {
	configs
		.iter()
		.map(|config| config.build(n_classes, rng.next_u64()))
		.collect()
}

#[cfg(test)]
use rand::SeedableRng;
#[cfg(test)]
use rand_xoshiro::Xoshiro256Plus;

#[cfg(test)]
fn two_blobs() -> (Array2<f32>, Array1<usize>) {
	let features = Array2::from_shape_fn((40, 2), |(i, j)| {
		let offset = if i < 20 { 0.0 } else { 10.0 };
		offset + ((i * 7 + j * 3) % 5) as f32
	});
	let labels = (0..40).map(|i| if i < 20 { 0 } else { 1 }).collect();
	(features, labels)
}

#[test]
fn test_fit_and_predict() {
	let (features, labels) = two_blobs();
	let mut options = TrainOptions::random_forest();
	options.n_trees = 10;
	let mut model = ForestClassifier::new(options, None);
	model.fit(features.view(), labels.view()).unwrap();
	let probabilities = model.predict_proba(features.view()).unwrap();
	assert_eq!(probabilities.dim(), (40, 2));
	assert_eq!(model.predict(features.view()).unwrap(), labels);
}

#[test]
fn test_fixed_class_count_widens_output() {
	let (features, labels) = two_blobs();
	let mut options = TrainOptions::completely_random_forest();
	options.n_trees = 5;
	let mut model = ForestClassifier::new(options, Some(4));
	model.fit(features.view(), labels.view()).unwrap();
	let probabilities = model.predict_proba(features.view()).unwrap();
	assert_eq!(probabilities.ncols(), 4);
	assert!(probabilities.column(3).iter().all(|p| *p == 0.0));
}

#[test]
fn test_fit_validation() {
	let mut model = ForestClassifier::new(TrainOptions::default(), Some(2));
	let features = Array2::zeros((3, 2));
	assert!(matches!(
		model.fit(features.view(), arr1(&[0, 1]).view()),
		Err(Error::LabelCountMismatch {
			n_samples: 3,
			n_labels: 2
		})
	));
	assert!(matches!(
		model.fit(features.view(), arr1(&[0, 1, 2]).view()),
		Err(Error::LabelOutOfRange {
			label: 2,
			n_classes: 2
		})
	));
	assert!(matches!(
		model.fit(Array2::zeros((0, 2)).view(), Array1::zeros(0).view()),
		Err(Error::EmptyDataset)
	));
}

#[test]
fn test_predict_validation() {
	let mut options = TrainOptions::default();
	options.n_trees = 2;
	let mut model = ForestClassifier::new(options, None);
	let features = Array2::zeros((3, 2));
	assert!(matches!(
		model.predict_proba(features.view()),
		Err(Error::NotFitted)
	));
	model.fit(features.view(), arr1(&[0, 1, 0]).view()).unwrap();
	assert!(matches!(
		model.predict_proba(Array2::zeros((3, 5)).view()),
		Err(Error::FeatureCountMismatch {
			expected: 2,
			got: 5
		})
	));
}

#[test]
fn test_build_models() {
	let configs = vec![
		ModelConfig::RandomForest(ForestConfig {
			n_trees: Some(3),
			..Default::default()
		}),
		ModelConfig::CompletelyRandomForest(ForestConfig {
			n_trees: Some(3),
			seed: Some(11),
			..Default::default()
		}),
	];
	let mut rng = Xoshiro256Plus::seed_from_u64(0);
	let mut models = build_models(&configs, Some(3), &mut rng);
	assert_eq!(models.len(), 2);
	let (features, labels) = two_blobs();
	for model in models.iter_mut() {
		model.fit(features.view(), labels.view()).unwrap();
		assert_eq!(model.predict_proba(features.view()).unwrap().dim(), (40, 3));
	}
}

#[test]
fn test_build_is_deterministic_for_a_seed() {
	let config = ModelConfig::CompletelyRandomForest(ForestConfig {
		n_trees: Some(4),
		..Default::default()
	});
	let (features, labels) = two_blobs();
	let mut a = config.build(None, 5);
	let mut b = config.build(None, 5);
	a.fit(features.view(), labels.view()).unwrap();
	b.fit(features.view(), labels.view()).unwrap();
	assert_eq!(
		a.predict_proba(features.view()).unwrap(),
		b.predict_proba(features.view()).unwrap()
	);
}
