//! Recording test doubles for classifiers and cascade layers.

use crate::{CascadeLayer, Classifier, Error, Result};
use ndarray::prelude::*;
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
	Fit {
		features: Array2<f32>,
		labels: Array1<usize>,
	},
	Predict(Array2<f32>),
	PredictProba(Array2<f32>),
}

/// A shared log of calls. Tests keep one clone and hand the other to the mock.
#[derive(Clone, Debug, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
	fn push(&self, call: Call) {
		self.0.lock().unwrap().push(call);
	}

	pub fn calls(&self) -> Vec<Call> {
		self.0.lock().unwrap().clone()
	}

	pub fn fits(&self) -> Vec<(Array2<f32>, Array1<usize>)> {
		self.calls()
			.into_iter()
			.filter_map(|call| match call {
				Call::Fit { features, labels } => Some((features, labels)),
				_ => None,
			})
			.collect()
	}

	pub fn predicts(&self) -> Vec<Array2<f32>> {
		self.calls()
			.into_iter()
			.filter_map(|call| match call {
				Call::Predict(features) => Some(features),
				_ => None,
			})
			.collect()
	}

	pub fn predict_probas(&self) -> Vec<Array2<f32>> {
		self.calls()
			.into_iter()
			.filter_map(|call| match call {
				Call::PredictProba(features) => Some(features),
				_ => None,
			})
			.collect()
	}
}

/// A classifier that returns the same probability row and label for every example.
pub struct MockClassifier {
	pub log: CallLog,
	probabilities: Vec<f32>,
	label: usize,
	fit_error: Option<&'static str>,
	predict_error: Option<&'static str>,
}

impl MockClassifier {
	pub fn new(probabilities: &[f32]) -> Self {
		let label = crate::argmax_rows(aview1(probabilities).insert_axis(Axis(0)))[0];
		Self {
			log: CallLog::default(),
			probabilities: probabilities.to_vec(),
			label,
			fit_error: None,
			predict_error: None,
		}
	}

	/// Fails in `fit`.
	pub fn failing(message: &'static str) -> Self {
		Self {
			fit_error: Some(message),
			..Self::new(&[0.5, 0.5])
		}
	}

	/// Fits, then fails in `predict` and `predict_proba`.
	pub fn failing_predictions(message: &'static str) -> Self {
		Self {
			predict_error: Some(message),
			..Self::new(&[0.5, 0.5])
		}
	}
}

fn fail(error: Option<&'static str>) -> Result<()> {
	match error {
		Some(message) => Err(Error::Model(anyhow::anyhow!(message))),
		None => Ok(()),
	}
}

impl Classifier for MockClassifier {
	fn fit(&mut self, features: ArrayView2<f32>, labels: ArrayView1<usize>) -> Result<()> {
		self.log.push(Call::Fit {
			features: features.to_owned(),
			labels: labels.to_owned(),
		});
		fail(self.fit_error)
	}

	fn predict_proba(&self, features: ArrayView2<f32>) -> Result<Array2<f32>> {
		self.log.push(Call::PredictProba(features.to_owned()));
		fail(self.predict_error)?;
		let probabilities = &self.probabilities;
		Ok(Array2::from_shape_fn(
			(features.nrows(), probabilities.len()),
			|(_, class_index)| probabilities[class_index],
		))
	}

	fn predict(&self, features: ArrayView2<f32>) -> Result<Array1<usize>> {
		self.log.push(Call::Predict(features.to_owned()));
		fail(self.predict_error)?;
		Ok(Array1::from_elem(features.nrows(), self.label))
	}
}

/// Build one boxed mock per probability row, returning the models and their logs in the same order.
pub fn mock_models(probabilities: &[&[f32]]) -> (Vec<Box<dyn Classifier>>, Vec<CallLog>) {
	probabilities
		.iter()
		.map(|probabilities| {
			let model = MockClassifier::new(probabilities);
			let log = model.log.clone();
			(Box::new(model) as Box<dyn Classifier>, log)
		})
		.unzip()
}

/// A cascade layer that records its calls and always predicts `output`.
pub struct MockLayer {
	pub log: CallLog,
	output: Array2<f32>,
}

impl MockLayer {
	pub fn new(output: Array2<f32>) -> Self {
		Self {
			log: CallLog::default(),
			output,
		}
	}
}

impl CascadeLayer for MockLayer {
	fn fit(&mut self, features: ArrayView2<f32>, labels: ArrayView1<usize>) -> Result<()> {
		self.log.push(Call::Fit {
			features: features.to_owned(),
			labels: labels.to_owned(),
		});
		Ok(())
	}

	fn predict(&self, features: ArrayView2<f32>) -> Result<Array2<f32>> {
		self.log.push(Call::Predict(features.to_owned()));
		Ok(self.output.clone())
	}

	fn predict_proba(&self, features: ArrayView2<f32>) -> Result<Array2<f32>> {
		self.log.push(Call::PredictProba(features.to_owned()));
		Ok(self.output.clone())
	}
}
