use crate::{
	build_models, cascade,
	config::{Config, ForestConfig, ModelConfig},
	progress::TrainProgress,
	CascadeLayer, Error, MultiGrainedScanner, Result, DEFAULT_PATCH_SHAPE,
};
use deepforest_util::progress_counter::ProgressCounter;
use ndarray::prelude::*;
use num_traits::ToPrimitive;
use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;

/// These are the options passed to `DeepForest::train`.
#[derive(Clone, Debug)]
pub struct DeepForestOptions {
	/// One scanner is trained per patch shape. If this is empty, samples are flattened and passed to the cascade directly.
	pub patch_shapes: Vec<(usize, usize)>,
	/// The number of patches drawn from each sample. If it is `None`, a patch is taken at every position.
	pub n_patches: Option<usize>,
	pub scanning_models: Vec<ModelConfig>,
	pub n_layers: usize,
	pub cascade_models: Vec<ModelConfig>,
	pub seed: u64,
}

impl Default for DeepForestOptions {
	fn default() -> Self {
		let forest = ForestConfig {
			n_trees: Some(30),
			..Default::default()
		};
		let models = vec![
			ModelConfig::RandomForest(forest.clone()),
			ModelConfig::CompletelyRandomForest(forest),
		];
		Self {
			patch_shapes: vec![DEFAULT_PATCH_SHAPE],
			n_patches: None,
			scanning_models: models.clone(),
			n_layers: 2,
			cascade_models: models,
			seed: 42,
		}
	}
}

impl DeepForestOptions {
	/// Apply the values set in `config` on top of the defaults.
	pub fn from_config(config: &Config) -> Self {
		let mut options = Self::default();
		if let Some(seed) = config.seed {
			options.seed = seed;
		}
		if let Some(scanning) = &config.scanning {
			if let Some(patch_shapes) = &scanning.patch_shapes {
				options.patch_shapes = patch_shapes.clone();
			}
			if let Some(n_patches) = scanning.n_patches {
				options.n_patches = n_patches.to_option();
			}
			if let Some(models) = &scanning.models {
				options.scanning_models = models.clone();
			}
		}
		if let Some(cascade) = &config.cascade {
			if let Some(n_layers) = cascade.n_layers {
				options.n_layers = n_layers;
			}
			if let Some(models) = &cascade.models {
				options.cascade_models = models.clone();
			}
		}
		options
	}
}

/**
A trained deep forest. Samples pass through the multi-grained scanner, if there is one, and then through the cascade. The output is the class probabilities of the cascade's last layer, averaged over its models.
*/
pub struct DeepForest {
	scanner: Option<MultiGrainedScanner>,
	cascade: Box<dyn CascadeLayer>,
	n_classes: usize,
	n_layers: usize,
}

impl DeepForest {
	/// Train a deep forest. `samples` has shape (n_samples, height, width) and every label must be less than `n_classes`.
	pub fn train(
		samples: ArrayView3<f32>,
		labels: ArrayView1<usize>,
		n_classes: usize,
		options: &DeepForestOptions,
		update_progress: &mut dyn FnMut(TrainProgress),
	) -> Result<Self> {
		let n_samples = samples.len_of(Axis(0));
		if n_samples == 0 {
			return Err(Error::EmptyDataset);
		}
		if labels.len() != n_samples {
			return Err(Error::LabelCountMismatch {
				n_samples,
				n_labels: labels.len(),
			});
		}
		if let Some(label) = labels.iter().copied().find(|label| *label >= n_classes) {
			return Err(Error::LabelOutOfRange { label, n_classes });
		}
		let mut rng = Xoshiro256Plus::seed_from_u64(options.seed);
		let (scanner, features) = if options.patch_shapes.is_empty() {
			(None, flatten_samples(samples))
		} else {
			let progress_counter =
				ProgressCounter::new(options.patch_shapes.len().to_u64().unwrap_or(0));
			update_progress(TrainProgress::Scanning(progress_counter.clone()));
			let scanner_seed = rng.next_u64();
			let mut scanner = MultiGrainedScanner::new(
				&options.patch_shapes,
				options.n_patches,
				scanner_seed,
				&mut || Ok(build_models(&options.scanning_models, Some(n_classes), &mut rng)),
			)?;
			let features = scanner.fit_transform_with_progress(samples, labels, &mut || {
				progress_counter.inc(1);
			})?;
			(Some(scanner), features)
		};
		update_progress(TrainProgress::TrainingCascade {
			n_layers: options.n_layers,
		});
		let mut cascade = cascade(options.n_layers, &mut || {
			Ok(build_models(&options.cascade_models, Some(n_classes), &mut rng))
		})?;
		cascade.fit(features.view(), labels)?;
		Ok(Self {
			scanner,
			cascade,
			n_classes,
			n_layers: options.n_layers,
		})
	}

	pub fn n_classes(&self) -> usize {
		self.n_classes
	}

	pub fn n_layers(&self) -> usize {
		self.n_layers
	}

	/// Compute the features the cascade consumes.
	pub fn transform(&self, samples: ArrayView3<f32>) -> Result<Array2<f32>> {
		match &self.scanner {
			Some(scanner) => scanner.transform(samples),
			None => Ok(flatten_samples(samples)),
		}
	}

	/// Predict class probabilities. The output has shape (n_samples, n_classes) and each row sums to 1.
	pub fn predict_proba(&self, samples: ArrayView3<f32>) -> Result<Array2<f32>> {
		let features = self.transform(samples)?;
		let probabilities = self.cascade.predict_proba(features.view())?;
		average_members(probabilities.view(), self.n_classes)
	}

	pub fn predict(&self, samples: ArrayView3<f32>) -> Result<Array1<usize>> {
		let probabilities = self.predict_proba(samples)?;
		Ok(crate::argmax_rows(probabilities.view()))
	}
}

/// Reshape (n_samples, height, width) to (n_samples, height * width), row-major.
pub fn flatten_samples(samples: ArrayView3<f32>) -> Array2<f32> {
	let (n_samples, height, width) = samples.dim();
	let mut features = Array2::<f32>::zeros((n_samples, height * width));
	for (mut row, sample) in features.axis_iter_mut(Axis(0)).zip(samples.axis_iter(Axis(0))) {
		for (value, pixel) in row.iter_mut().zip(sample.iter()) {
			*value = *pixel;
		}
	}
	features
}

/// Average blocks of `n_classes` columns, one block per model.
fn average_members(probabilities: ArrayView2<f32>, n_classes: usize) -> Result<Array2<f32>> {
	let n_columns = probabilities.ncols();
	if n_classes == 0 || n_columns % n_classes != 0 {
		return Err(Error::FeatureCountMismatch {
			expected: n_classes,
			got: n_columns,
		});
	}
	let n_models = (n_columns / n_classes).to_f32().unwrap_or(1.0);
	let mut averaged = Array2::<f32>::zeros((probabilities.nrows(), n_classes));
	for block in probabilities.axis_chunks_iter(Axis(1), n_classes) {
		averaged += &block;
	}
	averaged /= n_models;
	Ok(averaged)
}

#[cfg(test)]
fn bright_side_samples(n_samples: usize) -> (Array3<f32>, Array1<usize>) {
	let labels: Array1<usize> = (0..n_samples).map(|i| i % 2).collect();
	let samples = Array3::from_shape_fn((n_samples, 4, 4), |(i, _, column)| {
		let bright_left = labels[i] == 0;
		let bright = (column < 2) == bright_left;
		let noise = ((i * 31 + column * 17) % 7) as f32 / 20.0;
		if bright {
			1.0 - noise
		} else {
			noise
		}
	});
	(samples, labels)
}

#[cfg(test)]
fn small_options() -> DeepForestOptions {
	let forest = ForestConfig {
		n_trees: Some(5),
		..Default::default()
	};
	DeepForestOptions {
		scanning_models: vec![ModelConfig::RandomForest(forest.clone())],
		cascade_models: vec![
			ModelConfig::RandomForest(forest.clone()),
			ModelConfig::CompletelyRandomForest(forest),
		],
		patch_shapes: vec![(2, 2), (3, 3)],
		n_patches: Some(4),
		..Default::default()
	}
}

#[test]
fn test_deep_forest_learns_bright_side() {
	let (samples, labels) = bright_side_samples(40);
	let mut n_scanned = None;
	let model = DeepForest::train(samples.view(), labels.view(), 2, &small_options(), &mut |progress| {
		if let TrainProgress::Scanning(counter) = progress {
			n_scanned = Some(counter);
		}
	})
	.unwrap();
	assert!(n_scanned.unwrap().is_done());
	let (test_samples, test_labels) = bright_side_samples(20);
	let predictions = model.predict(test_samples.view()).unwrap();
	let n_correct = predictions
		.iter()
		.zip(test_labels.iter())
		.filter(|(prediction, label)| prediction == label)
		.count();
	assert!(n_correct as f32 / 20.0 > 0.9);
}

#[test]
fn test_probabilities_sum_to_one() {
	let (samples, labels) = bright_side_samples(20);
	let model = DeepForest::train(samples.view(), labels.view(), 2, &small_options(), &mut |_| {}).unwrap();
	let probabilities = model.predict_proba(samples.view()).unwrap();
	assert_eq!(probabilities.dim(), (20, 2));
	for row in probabilities.axis_iter(Axis(0)) {
		assert!((row.sum() - 1.0).abs() < 1e-5);
	}
}

#[test]
fn test_without_scanning() {
	let (samples, labels) = bright_side_samples(20);
	let options = DeepForestOptions {
		patch_shapes: Vec::new(),
		..small_options()
	};
	let mut events = Vec::new();
	let model = DeepForest::train(samples.view(), labels.view(), 2, &options, &mut |progress| {
		events.push(progress)
	})
	.unwrap();
	assert!(matches!(
		events.as_slice(),
		[TrainProgress::TrainingCascade { n_layers: 2 }]
	));
	assert_eq!(model.transform(samples.view()).unwrap().dim(), (20, 16));
	assert_eq!(model.predict(samples.view()).unwrap(), labels);
}

#[test]
fn test_train_validation() {
	let (samples, labels) = bright_side_samples(4);
	assert!(matches!(
		DeepForest::train(samples.view(), labels.view(), 1, &small_options(), &mut |_| {}),
		Err(Error::LabelOutOfRange {
			label: 1,
			n_classes: 1
		})
	));
	let options = DeepForestOptions {
		n_layers: 0,
		..small_options()
	};
	assert!(matches!(
		DeepForest::train(samples.view(), labels.view(), 2, &options, &mut |_| {}),
		Err(Error::NoLayers)
	));
}

#[test]
fn test_flatten_samples() {
	let samples = Array3::from_shape_fn((2, 2, 3), |(i, j, k)| (i * 6 + j * 3 + k) as f32);
	assert_eq!(
		flatten_samples(samples.view()),
		arr2(&[[0.0, 1.0, 2.0, 3.0, 4.0, 5.0], [6.0, 7.0, 8.0, 9.0, 10.0, 11.0]])
	);
}

#[test]
fn test_average_members() {
	let probabilities = arr2(&[[0.2, 0.8, 0.6, 0.4], [1.0, 0.0, 0.0, 1.0]]);
	let averaged = average_members(probabilities.view(), 2).unwrap();
	let expected = arr2(&[[0.4, 0.6], [0.5, 0.5]]);
	for (a, b) in averaged.iter().zip(expected.iter()) {
		assert!((a - b).abs() < 1e-6);
	}
	assert!(average_members(probabilities.view(), 3).is_err());
}
