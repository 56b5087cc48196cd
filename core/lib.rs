/*!
This crate implements a deep forest, a cascade of forest ensembles preceded by multi-grained scanning.

Training data flows through two stages:

1. A [`MultiGrainedScanner`](struct.MultiGrainedScanner.html) runs one [`PatchScanner`](struct.PatchScanner.html) per configured patch shape. Each scanner cuts every sample into patches, trains an ensemble on the patches, and replaces each sample with the concatenated class probabilities of its patches.
2. A chain of [`CascadeLayer`](trait.CascadeLayer.html)s refines the scanned features. The head of the chain is an [`InputLayer`](struct.InputLayer.html) and every other link is a [`Layer`](struct.Layer.html) that trains on its predecessor's predictions.

The models inside every ensemble are opaque. Anything implementing [`Classifier`](trait.Classifier.html) can be used, and [`ForestClassifier`](struct.ForestClassifier.html) adapts the forests from `deepforest_forest`. [`DeepForest`](struct.DeepForest.html) wires both stages together and [`train`](fn.train.html) drives training from a csv file.
*/

#![allow(clippy::tabs_in_doc_comments)]

use ndarray::prelude::*;

pub mod config;
mod ensemble;
mod error;
mod forest;
mod layer;
pub mod metrics;
#[cfg(test)]
mod mock;
mod model;
mod multi_grained;
pub mod progress;
mod scan;
pub mod train;

pub use self::{
	ensemble::ModelEnsemble,
	error::{Error, Result},
	forest::{build_models, ForestClassifier},
	layer::{cascade, CascadeLayer, InputLayer, Layer},
	model::{flatten_samples, DeepForest, DeepForestOptions},
	multi_grained::MultiGrainedScanner,
	scan::{repeat_labels, PatchScanner, ScanOutput, DEFAULT_PATCH_SHAPE},
	train::train,
};

/**
The `Classifier` trait is the only thing the deep forest knows about the models inside its ensembles.

`features` has shape (n_examples, n_features) and `labels` holds one zero-based class index per example. `predict_proba` returns a matrix of shape (n_examples, n_classes). The number of classes is up to the implementation, but it must not change between calls on the same instance.

Errors returned by an implementation are passed through to the caller unmodified. Wrap foreign errors in [`Error::Model`](enum.Error.html#variant.Model).
*/
pub trait Classifier: Send + Sync {
	fn fit(&mut self, features: ArrayView2<f32>, labels: ArrayView1<usize>) -> Result<()>;

	fn predict_proba(&self, features: ArrayView2<f32>) -> Result<Array2<f32>>;

	/// Predict one class index per example. The default picks the most probable class from `predict_proba`.
	fn predict(&self, features: ArrayView2<f32>) -> Result<Array1<usize>> {
		let probabilities = self.predict_proba(features)?;
		Ok(argmax_rows(probabilities.view()))
	}
}

/// Return the column index of the largest value in each row. Ties go to the lowest index.
pub fn argmax_rows(probabilities: ArrayView2<f32>) -> Array1<usize> {
	probabilities
		.axis_iter(Axis(0))
		.map(|row| {
			row.iter()
				.enumerate()
				.fold(None, |best: Option<(usize, f32)>, (index, &value)| match best {
					Some((_, best_value)) if best_value >= value => best,
					_ => Some((index, value)),
				})
				.map(|(index, _)| index)
				.unwrap_or(0)
		})
		.collect()
}

#[test]
fn test_argmax_rows() {
	let probabilities = arr2(&[[0.1, 0.7, 0.2], [0.5, 0.5, 0.0], [0.0, 0.0, 1.0]]);
	assert_eq!(argmax_rows(probabilities.view()), arr1(&[1usize, 0, 2]));
}
