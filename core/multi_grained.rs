use crate::{Classifier, Error, ModelEnsemble, PatchScanner, Result};
use ndarray::prelude::*;
use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;

/**
A `MultiGrainedScanner` runs one [`PatchScanner`](struct.PatchScanner.html) per patch shape and concatenates their outputs. Each grain owns a fresh set of models, so the grains never share state.

The columns of the output are ordered by grain, in the order the patch shapes were given.
*/
pub struct MultiGrainedScanner {
	scanners: Vec<PatchScanner>,
}

impl MultiGrainedScanner {
	/// Create one scanner per entry of `patch_shapes`. `make_models` is called once per grain to build that grain's models.
	pub fn new(
		patch_shapes: &[(usize, usize)],
		n_patches: Option<usize>,
		seed: u64,
		make_models: &mut dyn FnMut() -> Result<Vec<Box<dyn Classifier>>>,
	) -> Result<Self> {
		if patch_shapes.is_empty() {
			return Err(Error::NoPatchShapes);
		}
		let mut rng = Xoshiro256Plus::seed_from_u64(seed);
		let scanners = patch_shapes
			.iter()
			.map(|patch_shape| {
				let ensemble = ModelEnsemble::new(make_models()?)?;
				PatchScanner::new(ensemble, n_patches, *patch_shape, rng.next_u64())
			})
			.collect::<Result<_>>()?;
		Ok(Self { scanners })
	}

	pub fn scanners(&self) -> &[PatchScanner] {
		&self.scanners
	}

	pub fn fit(&mut self, samples: ArrayView3<f32>, labels: ArrayView1<usize>) -> Result<()> {
		for scanner in self.scanners.iter_mut() {
			scanner.fit(samples, labels)?;
		}
		Ok(())
	}

	pub fn transform(&self, samples: ArrayView3<f32>) -> Result<Array2<f32>> {
		let outputs = self
			.scanners
			.iter()
			.map(|scanner| scanner.transform(samples))
			.collect::<Result<Vec<_>>>()?;
		concatenate_grains(outputs)
	}

	pub fn fit_transform(
		&mut self,
		samples: ArrayView3<f32>,
		labels: ArrayView1<usize>,
	) -> Result<Array2<f32>> {
		self.fit_transform_with_progress(samples, labels, &mut || {})
	}

	/// Like `fit_transform`, calling `on_grain` after each grain is trained.
	pub fn fit_transform_with_progress(
		&mut self,
		samples: ArrayView3<f32>,
		labels: ArrayView1<usize>,
		on_grain: &mut dyn FnMut(),
	) -> Result<Array2<f32>> {
		let mut outputs = Vec::with_capacity(self.scanners.len());
		for scanner in self.scanners.iter_mut() {
			outputs.push(scanner.fit_transform(samples, labels)?);
			on_grain();
		}
		concatenate_grains(outputs)
	}
}

fn concatenate_grains(outputs: Vec<Array2<f32>>) -> Result<Array2<f32>> {
	let outputs: Vec<ArrayView2<f32>> = outputs.iter().map(|output| output.view()).collect();
	Ok(ndarray::concatenate(Axis(1), &outputs)?)
}

#[cfg(test)]
use crate::mock::{mock_models, CallLog};

#[cfg(test)]
fn mock_scanner(
	patch_shapes: &[(usize, usize)],
	n_patches: Option<usize>,
) -> (MultiGrainedScanner, Vec<CallLog>) {
	let mut logs = Vec::new();
	let scanner = MultiGrainedScanner::new(patch_shapes, n_patches, 0, &mut || {
		let (models, grain_logs) = mock_models(&[&[0.3, 0.7]]);
		logs.extend(grain_logs);
		Ok(models)
	})
	.unwrap();
	(scanner, logs)
}

#[test]
fn test_no_patch_shapes() {
	let result = MultiGrainedScanner::new(&[], None, 0, &mut || Ok(Vec::new()));
	assert!(matches!(result, Err(Error::NoPatchShapes)));
}

#[test]
fn test_each_grain_gets_its_own_models() {
	let mut n_calls = 0;
	let scanner = MultiGrainedScanner::new(&[(1, 1), (2, 2), (3, 3)], Some(2), 0, &mut || {
		n_calls += 1;
		Ok(mock_models(&[&[0.5, 0.5]]).0)
	})
	.unwrap();
	assert_eq!(n_calls, 3);
	let shapes: Vec<(usize, usize)> = scanner.scanners().iter().map(|s| s.patch_shape()).collect();
	assert_eq!(shapes, vec![(1, 1), (2, 2), (3, 3)]);
}

#[test]
fn test_output_width_is_the_sum_of_grains() {
	let (mut scanner, _) = mock_scanner(&[(2, 2), (3, 3)], None);
	let samples = Array3::zeros((3, 4, 4));
	let labels = arr1(&[0, 1, 0]);
	let output = scanner.fit_transform(samples.view(), labels.view()).unwrap();
	// (3 * 3 + 2 * 2) patches * 1 model * 2 classes
	assert_eq!(output.dim(), (3, 26));
	assert_eq!(output, scanner.transform(samples.view()).unwrap());
}

#[test]
fn test_grains_see_their_own_patch_width() {
	let (mut scanner, logs) = mock_scanner(&[(1, 2), (2, 3)], Some(2));
	let samples = Array3::zeros((2, 3, 3));
	let labels = arr1(&[1, 0]);
	scanner.fit(samples.view(), labels.view()).unwrap();
	let widths: Vec<usize> = logs.iter().map(|log| log.fits()[0].0.ncols()).collect();
	assert_eq!(widths, vec![2, 6]);
}

#[test]
fn test_progress_is_reported_per_grain() {
	let (mut scanner, _) = mock_scanner(&[(1, 1), (2, 2)], Some(1));
	let samples = Array3::zeros((2, 2, 2));
	let labels = arr1(&[1, 0]);
	let mut n_grains = 0;
	scanner
		.fit_transform_with_progress(samples.view(), labels.view(), &mut || n_grains += 1)
		.unwrap();
	assert_eq!(n_grains, 2);
}

#[test]
fn test_a_grain_larger_than_the_samples_fails() {
	let (mut scanner, _) = mock_scanner(&[(2, 2), (5, 5)], None);
	let samples = Array3::zeros((2, 3, 3));
	let labels = arr1(&[0, 1]);
	let expected = |error: Error| {
		matches!(
			error,
			Error::PatchTooLarge {
				patch_height: 5,
				patch_width: 5,
				height: 3,
				width: 3
			}
		)
	};
	assert!(expected(scanner.fit_transform(samples.view(), labels.view()).unwrap_err()));
	assert!(expected(scanner.transform(samples.view()).unwrap_err()));
}
