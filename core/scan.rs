use crate::{Error, ModelEnsemble, Result};
use itertools::iproduct;
use ndarray::prelude::*;
use num_traits::ToPrimitive;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use rayon::prelude::*;

/// The patch shape used when none is configured, as (height, width).
pub const DEFAULT_PATCH_SHAPE: (usize, usize) = (2, 2);

/**
A `PatchScanner` turns each two dimensional sample into a set of flattened patches, trains its ensemble on the patches, and maps each sample back to a single row holding the class probabilities of all of its patches.

If `n_patches` is `Some(n)`, each sample yields `min(n, n_positions)` patches drawn at random positions with replacement, where `n_positions` is the number of positions a patch fits at. If it is `None`, each sample yields one patch at every position, in row-major order.

Patch positions come from a random number generator seeded from the scanner's seed and the sample's index, so scanning the same samples twice yields the same patches.
*/
pub struct PatchScanner {
	ensemble: ModelEnsemble,
	n_patches: Option<usize>,
	patch_shape: (usize, usize),
	seed: u64,
}

/// The expanded dataset produced by scanning.
#[derive(Debug)]
pub struct ScanOutput {
	/// The patches of every sample, flattened row-major and stacked in sample order. The shape is (total_patches, patch_height * patch_width).
	pub features: Array2<f32>,
	/// The number of patches each sample contributed.
	pub n_patches_per_sample: Vec<usize>,
}

impl PatchScanner {
	pub fn new(
		ensemble: ModelEnsemble,
		n_patches: Option<usize>,
		patch_shape: (usize, usize),
		seed: u64,
	) -> Result<Self> {
		let (height, width) = patch_shape;
		if height == 0 || width == 0 {
			return Err(Error::EmptyPatch { height, width });
		}
		if n_patches == Some(0) {
			return Err(Error::NoPatches);
		}
		Ok(Self {
			ensemble,
			n_patches,
			patch_shape,
			seed,
		})
	}

	pub fn patch_shape(&self) -> (usize, usize) {
		self.patch_shape
	}

	pub fn n_patches(&self) -> Option<usize> {
		self.n_patches
	}

	pub fn ensemble(&self) -> &ModelEnsemble {
		&self.ensemble
	}

	/// Extract the patches of one sample. The output has one row of length `patch_height * patch_width` per patch.
	pub fn patch(&self, sample: ArrayView2<f32>, rng: &mut impl Rng) -> Result<Array2<f32>> {
		let (height, width) = sample.dim();
		let (patch_height, patch_width) = self.patch_shape;
		if patch_height > height || patch_width > width {
			return Err(Error::PatchTooLarge {
				patch_height,
				patch_width,
				height,
				width,
			});
		}
		let n_rows = height - patch_height + 1;
		let n_columns = width - patch_width + 1;
		let positions: Vec<(usize, usize)> = match self.n_patches {
			Some(n_patches) => (0..n_patches.min(n_rows * n_columns))
				.map(|_| (rng.gen_range(0..n_rows), rng.gen_range(0..n_columns)))
				.collect(),
			None => iproduct!(0..n_rows, 0..n_columns).collect(),
		};
		let mut patches = Array2::<f32>::zeros((positions.len(), patch_height * patch_width));
		for (mut patch, (row, column)) in patches.axis_iter_mut(Axis(0)).zip(positions) {
			let window = sample.slice(s![row..row + patch_height, column..column + patch_width]);
			for (value, pixel) in patch.iter_mut().zip(window.iter()) {
				*value = *pixel;
			}
		}
		Ok(patches)
	}

	/// Patch every sample of `samples`, which has shape (n_samples, height, width), and stack the patches.
	pub fn scan(&self, samples: ArrayView3<f32>) -> Result<ScanOutput> {
		let n_samples = samples.len_of(Axis(0));
		if n_samples == 0 {
			return Err(Error::EmptyDataset);
		}
		let patches: Vec<Array2<f32>> = (0..n_samples)
			.into_par_iter()
			.map(|sample_index| {
				let mut rng = self.sample_rng(sample_index);
				self.patch(samples.index_axis(Axis(0), sample_index), &mut rng)
			})
			.collect::<Result<_>>()?;
		let n_patches_per_sample = patches.iter().map(|patches| patches.nrows()).collect();
		let patches: Vec<ArrayView2<f32>> = patches.iter().map(|patches| patches.view()).collect();
		let features = ndarray::concatenate(Axis(0), &patches)?;
		Ok(ScanOutput {
			features,
			n_patches_per_sample,
		})
	}

	/// Scan `samples` and repeat each label once for every patch its sample contributed.
	pub fn scan_with_labels(
		&self,
		samples: ArrayView3<f32>,
		labels: ArrayView1<usize>,
	) -> Result<(ScanOutput, Array1<usize>)> {
		let n_samples = samples.len_of(Axis(0));
		if labels.len() != n_samples {
			return Err(Error::LabelCountMismatch {
				n_samples,
				n_labels: labels.len(),
			});
		}
		let output = self.scan(samples)?;
		let labels = repeat_labels(labels, &output.n_patches_per_sample);
		Ok((output, labels))
	}

	pub fn fit(&mut self, samples: ArrayView3<f32>, labels: ArrayView1<usize>) -> Result<()> {
		let (output, labels) = self.scan_with_labels(samples, labels)?;
		self.ensemble.fit(output.features.view(), labels.view())?;
		Ok(())
	}

	/// Map each sample to the class probabilities of its patches. The output has shape (n_samples, n_patches * n_models * n_classes).
	pub fn transform(&self, samples: ArrayView3<f32>) -> Result<Array2<f32>> {
		let output = self.scan(samples)?;
		let probabilities = self.ensemble.predict_proba(output.features.view())?;
		group_by_sample(probabilities.view(), &output.n_patches_per_sample)
	}

	/// Fit and transform with a single scan.
	pub fn fit_transform(
		&mut self,
		samples: ArrayView3<f32>,
		labels: ArrayView1<usize>,
	) -> Result<Array2<f32>> {
		let (output, labels) = self.scan_with_labels(samples, labels)?;
		self.ensemble.fit(output.features.view(), labels.view())?;
		let probabilities = self.ensemble.predict_proba(output.features.view())?;
		group_by_sample(probabilities.view(), &output.n_patches_per_sample)
	}

	fn sample_rng(&self, sample_index: usize) -> Xoshiro256Plus {
		Xoshiro256Plus::seed_from_u64(self.seed.wrapping_add(sample_index.to_u64().unwrap_or(0)))
	}
}

/// Repeat `labels[i]` `counts[i]` times.
pub fn repeat_labels(labels: ArrayView1<usize>, counts: &[usize]) -> Array1<usize> {
	labels
		.iter()
		.zip(counts.iter())
		.flat_map(|(label, count)| std::iter::repeat(*label).take(*count))
		.collect()
}

/// Flatten the consecutive patch rows of each sample into one row. Every sample must have contributed the same number of patches.
fn group_by_sample(
	probabilities: ArrayView2<f32>,
	n_patches_per_sample: &[usize],
) -> Result<Array2<f32>> {
	let expected = n_patches_per_sample.first().copied().unwrap_or(0);
	if let Some((sample_index, got)) = n_patches_per_sample
		.iter()
		.enumerate()
		.find(|(_, n_patches)| **n_patches != expected)
	{
		return Err(Error::NonUniformPatchCounts {
			sample_index,
			expected,
			got: *got,
		});
	}
	let n_samples = n_patches_per_sample.len();
	let n_columns = expected * probabilities.ncols();
	// `iter` walks in logical row-major order whatever the memory layout, which is what keeps each sample's patches together.
	let values: Vec<f32> = probabilities.iter().copied().collect();
	Ok(Array2::from_shape_vec((n_samples, n_columns), values)?)
}

#[cfg(test)]
use crate::mock::{mock_models, CallLog};

#[cfg(test)]
fn mock_scanner(n_patches: Option<usize>, patch_shape: (usize, usize)) -> (PatchScanner, Vec<CallLog>) {
	let (models, logs) = mock_models(&[&[0.25, 0.75], &[0.6, 0.4]]);
	let ensemble = ModelEnsemble::new(models).unwrap();
	(PatchScanner::new(ensemble, n_patches, patch_shape, 0).unwrap(), logs)
}

/// Sample `i` is filled with the value `i`, so every patch row reveals which sample it came from.
#[cfg(test)]
fn constant_samples(n_samples: usize, height: usize, width: usize) -> Array3<f32> {
	Array3::from_shape_fn((n_samples, height, width), |(i, _, _)| i as f32)
}

#[test]
fn test_patch_exhaustive() {
	let (scanner, _) = mock_scanner(None, (2, 2));
	let sample = arr2(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]);
	let mut rng = Xoshiro256Plus::seed_from_u64(0);
	let patches = scanner.patch(sample.view(), &mut rng).unwrap();
	assert_eq!(
		patches,
		arr2(&[
			[1.0, 2.0, 4.0, 5.0],
			[2.0, 3.0, 5.0, 6.0],
			[4.0, 5.0, 7.0, 8.0],
			[5.0, 6.0, 8.0, 9.0],
		])
	);
}

#[test]
fn test_patch_random_draws_valid_windows() {
	let (random, _) = mock_scanner(Some(5), (2, 3));
	let (exhaustive, _) = mock_scanner(None, (2, 3));
	let sample = Array2::from_shape_fn((4, 5), |(i, j)| (i * 5 + j) as f32);
	let mut rng = Xoshiro256Plus::seed_from_u64(1);
	let patches = random.patch(sample.view(), &mut rng).unwrap();
	let windows = exhaustive.patch(sample.view(), &mut rng).unwrap();
	assert_eq!(patches.dim(), (5, 6));
	for patch in patches.axis_iter(Axis(0)) {
		assert!(windows.axis_iter(Axis(0)).any(|window| window == patch));
	}
}

#[test]
fn test_patch_count_is_capped_by_positions() {
	let (scanner, _) = mock_scanner(Some(100), (2, 2));
	let sample = Array2::zeros((3, 3));
	let mut rng = Xoshiro256Plus::seed_from_u64(0);
	assert_eq!(scanner.patch(sample.view(), &mut rng).unwrap().nrows(), 4);
}

#[test]
fn test_patch_larger_than_sample() {
	let (scanner, _) = mock_scanner(Some(2), (3, 2));
	let sample = Array2::zeros((2, 5));
	let mut rng = Xoshiro256Plus::seed_from_u64(0);
	let error = scanner.patch(sample.view(), &mut rng).unwrap_err();
	assert_eq!(
		error.to_string(),
		"a 3x2 patch does not fit in a 2x5 sample"
	);
}

#[test]
fn test_fit_and_transform_reject_patch_larger_than_samples() {
	let (mut scanner, logs) = mock_scanner(None, (4, 2));
	let samples = constant_samples(2, 3, 3);
	let labels = arr1(&[0, 1]);
	let expected = |error: Error| {
		matches!(
			error,
			Error::PatchTooLarge {
				patch_height: 4,
				patch_width: 2,
				height: 3,
				width: 3
			}
		)
	};
	assert!(expected(scanner.fit(samples.view(), labels.view()).unwrap_err()));
	assert!(expected(scanner.transform(samples.view()).unwrap_err()));
	assert!(expected(scanner.fit_transform(samples.view(), labels.view()).unwrap_err()));
	assert!(logs.iter().all(|log| log.calls().is_empty()));
}

#[test]
fn test_invalid_configuration() {
	let (models, _) = mock_models(&[&[0.5, 0.5]]);
	let ensemble = ModelEnsemble::new(models).unwrap();
	assert!(matches!(
		PatchScanner::new(ensemble, None, (0, 2), 0),
		Err(Error::EmptyPatch { height: 0, width: 2 })
	));
	let (models, _) = mock_models(&[&[0.5, 0.5]]);
	let ensemble = ModelEnsemble::new(models).unwrap();
	assert!(matches!(
		PatchScanner::new(ensemble, Some(0), DEFAULT_PATCH_SHAPE, 0),
		Err(Error::NoPatches)
	));
}

#[test]
fn test_repeat_labels_with_variable_counts() {
	let labels = arr1(&[7, 8, 9]);
	assert_eq!(
		repeat_labels(labels.view(), &[2, 0, 3]),
		arr1(&[7usize, 7, 9, 9, 9])
	);
}

#[test]
fn test_scan_replicates_labels_per_patch() {
	let (scanner, _) = mock_scanner(Some(3), (2, 2));
	let samples = constant_samples(4, 3, 4);
	let labels = arr1(&[0, 10, 20, 30]);
	let (output, expanded_labels) = scanner.scan_with_labels(samples.view(), labels.view()).unwrap();
	assert_eq!(output.n_patches_per_sample, vec![3, 3, 3, 3]);
	assert_eq!(output.features.dim(), (12, 4));
	assert_eq!(expanded_labels.len(), output.features.nrows());
	for (row, label) in output.features.axis_iter(Axis(0)).zip(expanded_labels.iter()) {
		assert_eq!(row[0] as usize * 10, *label);
	}
}

#[test]
fn test_scan_rejects_mismatched_labels() {
	let (scanner, _) = mock_scanner(Some(3), (2, 2));
	let samples = constant_samples(4, 3, 3);
	let labels = arr1(&[0, 1]);
	assert!(matches!(
		scanner.scan_with_labels(samples.view(), labels.view()),
		Err(Error::LabelCountMismatch {
			n_samples: 4,
			n_labels: 2
		})
	));
}

#[test]
fn test_fit_trains_on_expanded_set() {
	let (mut scanner, logs) = mock_scanner(Some(3), (2, 2));
	let samples = constant_samples(5, 4, 4);
	let labels = arr1(&[0, 1, 0, 1, 1]);
	scanner.fit(samples.view(), labels.view()).unwrap();
	for log in logs.iter() {
		let fits = log.fits();
		assert_eq!(fits.len(), 1);
		let (features, labels) = &fits[0];
		assert_eq!(features.dim(), (15, 4));
		assert_eq!(
			labels,
			&arr1(&[0usize, 0, 0, 1, 1, 1, 0, 0, 0, 1, 1, 1, 1, 1, 1])
		);
	}
}

#[test]
fn test_transform_restores_one_row_per_sample() {
	let (scanner, _) = mock_scanner(Some(3), (2, 2));
	let samples = constant_samples(4, 4, 4);
	let output = scanner.transform(samples.view()).unwrap();
	// 3 patches * 2 models * 2 classes
	assert_eq!(output.dim(), (4, 12));
	assert_eq!(
		output.row(0),
		aview1(&[0.25f32, 0.75, 0.6, 0.4, 0.25, 0.75, 0.6, 0.4, 0.25, 0.75, 0.6, 0.4])
	);
}

#[test]
fn test_fit_transform_scans_once_and_matches_transform() {
	let (mut scanner, logs) = mock_scanner(Some(4), (2, 2));
	let samples = constant_samples(3, 5, 5);
	let labels = arr1(&[1, 0, 1]);
	let fitted = scanner.fit_transform(samples.view(), labels.view()).unwrap();
	for log in logs.iter() {
		assert_eq!(log.fits().len(), 1);
		assert_eq!(log.predict_probas().len(), 1);
		// The windows predicted on are the windows trained on.
		assert_eq!(log.fits()[0].0, log.predict_probas()[0]);
	}
	assert_eq!(fitted, scanner.transform(samples.view()).unwrap());
}

#[test]
fn test_group_by_sample_rejects_uneven_counts() {
	let probabilities = Array2::<f32>::zeros((5, 2));
	let error = group_by_sample(probabilities.view(), &[2, 3]).unwrap_err();
	assert!(matches!(
		error,
		Error::NonUniformPatchCounts {
			sample_index: 1,
			expected: 2,
			got: 3
		}
	));
}
