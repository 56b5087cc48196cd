use crate::{
	config::{Config, Shuffle},
	metrics::{
		ClassificationMetrics, ClassificationMetricsInput, ClassificationMetricsOutput,
		StreamingMetric,
	},
	progress::Progress,
	DeepForest, DeepForestOptions,
};
use anyhow::{format_err, Context, Result};
use deepforest_util::progress_counter::ProgressCounter;
use ndarray::prelude::*;
use num_traits::ToPrimitive;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use std::{collections::BTreeSet, io::Read, path::Path};

pub struct TrainOutput {
	pub model: DeepForest,
	/// The class names, sorted. A label is an index into this list.
	pub classes: Vec<String>,
	pub n_examples_train: usize,
	pub n_examples_test: usize,
	/// This is `None` if the test split is empty.
	pub test_metrics: Option<ClassificationMetricsOutput>,
}

/// A labeled set of two dimensional samples.
#[derive(Debug)]
pub struct Dataset {
	/// (n_samples, height, width)
	pub samples: Array3<f32>,
	/// (n_samples)
	pub labels: Array1<usize>,
	pub classes: Vec<String>,
}

/// Train a deep forest on the csv file at `file_path`. The column named `target_column_name` holds class names and every other column holds one pixel, in row-major order over `sample_shape`.
pub fn train(
	file_path: &Path,
	target_column_name: &str,
	sample_shape: (usize, usize),
	config_path: Option<&Path>,
	update_progress: &mut dyn FnMut(Progress),
) -> Result<TrainOutput> {
	// load the config from the config file, if provided.
	let config = load_config(config_path)?.unwrap_or_default();

	// load the dataset from the csv file
	let dataset = load_dataset(file_path, target_column_name, sample_shape, update_progress)?;
	let n_classes = dataset.classes.len();

	// shuffle the dataset if enabled
	let dataset = shuffle(dataset, &config, update_progress);

	// train test split
	let test_fraction = config.test_fraction.unwrap_or(0.2);
	if !(0.0..1.0).contains(&test_fraction) {
		return Err(format_err!(
			"test_fraction must be at least 0 and less than 1, got {}",
			test_fraction
		));
	}
	let n_examples = dataset.labels.len();
	let n_examples_train = ((1.0 - test_fraction) * n_examples.to_f32().unwrap_or(0.0))
		.to_usize()
		.unwrap_or(n_examples)
		.min(n_examples);
	if n_examples_train == 0 {
		return Err(format_err!("the training split is empty"));
	}
	let (samples_train, samples_test) = dataset.samples.view().split_at(Axis(0), n_examples_train);
	let (labels_train, labels_test) = dataset.labels.view().split_at(Axis(0), n_examples_train);

	// train the model
	let options = DeepForestOptions::from_config(&config);
	let model = DeepForest::train(
		samples_train,
		labels_train,
		n_classes,
		&options,
		&mut |progress| update_progress(Progress::Training(progress)),
	)
	.context("failed to train the model")?;

	// test the model
	let test_metrics = if labels_test.is_empty() {
		None
	} else {
		Some(test(&model, samples_test, labels_test, update_progress)?)
	};

	Ok(TrainOutput {
		model,
		classes: dataset.classes,
		n_examples_train,
		n_examples_test: labels_test.len(),
		test_metrics,
	})
}

fn load_config(config_path: Option<&Path>) -> Result<Option<Config>> {
	if let Some(config_path) = config_path {
		let config = std::fs::read_to_string(config_path)
			.with_context(|| format!("failed to read config file {}", config_path.display()))?;
		let config = serde_yaml::from_str(&config)
			.with_context(|| format!("failed to parse config file {}", config_path.display()))?;
		Ok(Some(config))
	} else {
		Ok(None)
	}
}

fn load_dataset(
	file_path: &Path,
	target_column_name: &str,
	sample_shape: (usize, usize),
	update_progress: &mut dyn FnMut(Progress),
) -> Result<Dataset> {
	let len = std::fs::metadata(file_path)
		.with_context(|| format!("failed to read {}", file_path.display()))?
		.len();
	let progress_counter = ProgressCounter::new(len);
	update_progress(Progress::Loading(progress_counter.clone()));
	let mut csv_reader = csv::Reader::from_path(file_path)
		.with_context(|| format!("failed to open {}", file_path.display()))?;
	read_dataset(&mut csv_reader, target_column_name, sample_shape, &mut |byte| {
		progress_counter.set(byte)
	})
}

/// Read a dataset from csv. `on_record` receives the byte offset of each record.
pub fn read_dataset<R: Read>(
	csv_reader: &mut csv::Reader<R>,
	target_column_name: &str,
	sample_shape: (usize, usize),
	on_record: &mut dyn FnMut(u64),
) -> Result<Dataset> {
	let (height, width) = sample_shape;
	let column_names: Vec<String> = csv_reader
		.headers()?
		.iter()
		.map(|column_name| column_name.to_owned())
		.collect();
	let target_column_index = column_names
		.iter()
		.position(|column_name| *column_name == target_column_name)
		.ok_or_else(|| {
			format_err!(
				"did not find target column \"{}\" among column names \"{}\"",
				target_column_name,
				column_names.join(", ")
			)
		})?;
	let n_pixels = column_names.len() - 1;
	if height * width != n_pixels {
		return Err(format_err!(
			"a {}x{} sample needs {} pixel columns but the file has {}",
			height,
			width,
			height * width,
			n_pixels
		));
	}
	let mut pixels: Vec<f32> = Vec::new();
	let mut class_names: Vec<String> = Vec::new();
	for (row_index, record) in csv_reader.records().enumerate() {
		let record = record.with_context(|| format!("failed to read row {}", row_index + 1))?;
		if let Some(position) = record.position() {
			on_record(position.byte());
		}
		for (column_index, value) in record.iter().enumerate() {
			if column_index == target_column_index {
				class_names.push(value.to_owned());
				continue;
			}
			let value = value.trim().parse::<f32>().with_context(|| {
				format!(
					"failed to parse \"{}\" in column \"{}\" on row {} as a number",
					value,
					column_names[column_index],
					row_index + 1
				)
			})?;
			pixels.push(value);
		}
	}
	let classes: Vec<String> = class_names
		.iter()
		.cloned()
		.collect::<BTreeSet<String>>()
		.into_iter()
		.collect();
	let labels: Array1<usize> = class_names
		.iter()
		.map(|class_name| classes.binary_search(class_name).unwrap_or(0))
		.collect();
	let samples = Array3::from_shape_vec((labels.len(), height, width), pixels)?;
	Ok(Dataset {
		samples,
		labels,
		classes,
	})
}

fn shuffle(dataset: Dataset, config: &Config, update_progress: &mut dyn FnMut(Progress)) -> Dataset {
	// check if shuffling is enabled in the config
	// and use the seed from the config if provided
	let default_seed = 42;
	let seed = match &config.shuffle {
		None | Some(Shuffle::Enabled(true)) => Some(default_seed),
		Some(Shuffle::Enabled(false)) => None,
		Some(Shuffle::Options { seed }) => Some(*seed),
	};
	let seed = match seed {
		Some(seed) => seed,
		None => return dataset,
	};
	update_progress(Progress::Shuffling);
	let mut rng = Xoshiro256Plus::seed_from_u64(seed);
	let mut indices: Vec<usize> = (0..dataset.labels.len()).collect();
	indices.shuffle(&mut rng);
	Dataset {
		samples: dataset.samples.select(Axis(0), &indices),
		labels: dataset.labels.select(Axis(0), &indices),
		classes: dataset.classes,
	}
}

fn test(
	model: &DeepForest,
	samples: ArrayView3<f32>,
	labels: ArrayView1<usize>,
	update_progress: &mut dyn FnMut(Progress),
) -> Result<ClassificationMetricsOutput> {
	let progress_counter = ProgressCounter::new(labels.len().to_u64().unwrap_or(0));
	update_progress(Progress::Testing(progress_counter.clone()));
	let n_examples_per_batch = 256;
	let mut test_metrics = ClassificationMetrics::new(model.n_classes());
	for (samples, labels) in samples
		.axis_chunks_iter(Axis(0), n_examples_per_batch)
		.zip(labels.axis_chunks_iter(Axis(0), n_examples_per_batch))
	{
		let probabilities = model
			.predict_proba(samples)
			.context("failed to evaluate the model")?;
		test_metrics.update(ClassificationMetricsInput {
			probabilities: probabilities.view(),
			labels: labels.view(),
		});
		progress_counter.inc(labels.len().to_u64().unwrap_or(0));
	}
	Ok(test_metrics.finalize())
}

#[cfg(test)]
fn read(csv: &str, sample_shape: (usize, usize)) -> Result<Dataset> {
	let mut csv_reader = csv::Reader::from_reader(csv.as_bytes());
	read_dataset(&mut csv_reader, "label", sample_shape, &mut |_| {})
}

#[test]
fn test_read_dataset() {
	let dataset = read(
		"p0,p1,label,p2,p3\n1,2,dog,3,4\n5,6,cat,7,8\n0,0,dog,0,1\n",
		(2, 2),
	)
	.unwrap();
	assert_eq!(dataset.classes, vec!["cat".to_owned(), "dog".to_owned()]);
	assert_eq!(dataset.labels, arr1(&[1usize, 0, 1]));
	assert_eq!(
		dataset.samples.index_axis(Axis(0), 1),
		arr2(&[[5.0f32, 6.0], [7.0, 8.0]])
	);
}

#[test]
fn test_read_dataset_errors() {
	let error = read("p0,p1,label\n1,2,a\n", (2, 2)).unwrap_err();
	assert_eq!(
		error.to_string(),
		"a 2x2 sample needs 4 pixel columns but the file has 2"
	);
	let error = read("p0,p1,class\n1,2,a\n", (1, 2)).unwrap_err();
	assert_eq!(
		error.to_string(),
		"did not find target column \"label\" among column names \"p0, p1, class\""
	);
	let error = read("p0,p1,label\n1,x,a\n", (1, 2)).unwrap_err();
	assert_eq!(
		error.to_string(),
		"failed to parse \"x\" in column \"p1\" on row 1 as a number"
	);
}

#[test]
fn test_shuffle_keeps_samples_with_their_labels() {
	let dataset = Dataset {
		samples: Array3::from_shape_fn((10, 1, 2), |(i, _, _)| i as f32),
		labels: (0..10).collect(),
		classes: (0..10).map(|i| i.to_string()).collect(),
	};
	let shuffled = shuffle(dataset, &Config::default(), &mut |_| {});
	assert_ne!(shuffled.labels, (0..10).collect::<Array1<usize>>());
	for (sample, label) in shuffled.samples.axis_iter(Axis(0)).zip(shuffled.labels.iter()) {
		assert_eq!(sample[(0, 0)] as usize, *label);
	}
}

#[test]
fn test_shuffle_disabled() {
	let dataset = Dataset {
		samples: Array3::zeros((4, 1, 1)),
		labels: arr1(&[3, 2, 1, 0]),
		classes: Vec::new(),
	};
	let config = Config {
		shuffle: Some(Shuffle::Enabled(false)),
		..Default::default()
	};
	let mut shuffled = false;
	let dataset = shuffle(dataset, &config, &mut |progress| {
		shuffled = matches!(progress, Progress::Shuffling)
	});
	assert!(!shuffled);
	assert_eq!(dataset.labels, arr1(&[3usize, 2, 1, 0]));
}

#[test]
fn test_train_from_file() {
	let mut csv = String::from("label");
	for i in 0..16 {
		csv.push_str(&format!(",p{}", i));
	}
	csv.push('\n');
	for i in 0..50 {
		let class = if i % 2 == 0 { "left" } else { "right" };
		csv.push_str(class);
		for pixel in 0..16 {
			let bright = (pixel % 4 < 2) == (i % 2 == 0);
			csv.push_str(if bright { ",0.9" } else { ",0.1" });
		}
		csv.push('\n');
	}
	let dir = std::env::temp_dir().join(format!("deepforest_train_{}", std::process::id()));
	std::fs::create_dir_all(&dir).unwrap();
	let file_path = dir.join("data.csv");
	std::fs::write(&file_path, csv).unwrap();
	let config_path = dir.join("config.yaml");
	std::fs::write(
		&config_path,
		"test_fraction: 0.2\nscanning:\n  patch_shapes: [[2, 2]]\n  n_patches: 3\n  models:\n    - model: random_forest\n      n_trees: 5\ncascade:\n  n_layers: 2\n  models:\n    - model: random_forest\n      n_trees: 5\n    - model: completely_random_forest\n      n_trees: 5\n",
	)
	.unwrap();
	let mut events = Vec::new();
	let output = train(&file_path, "label", (4, 4), Some(&config_path), &mut |progress| {
		events.push(progress)
	})
	.unwrap();
	std::fs::remove_dir_all(&dir).unwrap();
	assert_eq!(output.classes, vec!["left".to_owned(), "right".to_owned()]);
	assert_eq!(output.n_examples_train, 40);
	assert_eq!(output.n_examples_test, 10);
	assert_eq!(output.model.n_layers(), 2);
	let test_metrics = output.test_metrics.unwrap();
	assert_eq!(test_metrics.accuracy, 1.0);
	assert!(matches!(events.first(), Some(Progress::Loading(_))));
	assert!(matches!(events.last(), Some(Progress::Testing(_))));
}

#[test]
fn test_metrics_span_batches() {
	use crate::config::{ForestConfig, ModelConfig};
	let n_examples = 600;
	let labels: Array1<usize> = (0..n_examples).map(|i| i % 2).collect();
	let samples = Array3::from_shape_fn((n_examples, 2, 2), |(i, _, column)| {
		if (column == 0) == (labels[i] == 0) {
			1.0
		} else {
			0.0
		}
	});
	let forest = ForestConfig {
		n_trees: Some(3),
		..Default::default()
	};
	let options = DeepForestOptions {
		patch_shapes: Vec::new(),
		n_layers: 1,
		cascade_models: vec![ModelConfig::RandomForest(forest)],
		..Default::default()
	};
	let model = DeepForest::train(samples.view(), labels.view(), 2, &options, &mut |_| {}).unwrap();
	let mut counter = None;
	let metrics = test(&model, samples.view(), labels.view(), &mut |progress| {
		if let Progress::Testing(progress_counter) = progress {
			counter = Some(progress_counter);
		}
	})
	.unwrap();
	let class = &metrics.class_metrics[0];
	let n_counted =
		class.true_positives + class.false_positives + class.true_negatives + class.false_negatives;
	assert_eq!(n_counted, 600);
	assert_eq!(metrics.accuracy, 1.0);
	assert_eq!(counter.unwrap().get(), 600);
}
