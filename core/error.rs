use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong while building, training or querying a deep forest.
#[derive(Debug, Error)]
pub enum Error {
	#[error("at least one model is required")]
	NoModels,
	#[error("at least one layer is required")]
	NoLayers,
	#[error("at least one patch shape is required")]
	NoPatchShapes,
	#[error("patch dimensions must be nonzero, got {height}x{width}")]
	EmptyPatch { height: usize, width: usize },
	#[error("the number of patches per sample must be nonzero")]
	NoPatches,
	#[error("a {patch_height}x{patch_width} patch does not fit in a {height}x{width} sample")]
	PatchTooLarge {
		patch_height: usize,
		patch_width: usize,
		height: usize,
		width: usize,
	},
	#[error("sample {sample_index} yielded {got} patches but the first sample yielded {expected}")]
	NonUniformPatchCounts {
		sample_index: usize,
		expected: usize,
		got: usize,
	},
	#[error("got {n_samples} samples but {n_labels} labels")]
	LabelCountMismatch { n_samples: usize, n_labels: usize },
	#[error("expected {expected} features but got {got}")]
	FeatureCountMismatch { expected: usize, got: usize },
	#[error("model {model_index} returned {got} rows for {expected} examples")]
	PredictionRowMismatch {
		model_index: usize,
		expected: usize,
		got: usize,
	},
	#[error("label {label} is out of range for {n_classes} classes")]
	LabelOutOfRange { label: usize, n_classes: usize },
	#[error("cannot train on an empty dataset")]
	EmptyDataset,
	#[error("the model must be fit before it can predict")]
	NotFitted,
	#[error(transparent)]
	Shape(#[from] ndarray::ShapeError),
	/// A failure inside a wrapped model.
	#[error(transparent)]
	Model(#[from] anyhow::Error),
}
