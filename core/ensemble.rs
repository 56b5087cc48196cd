use crate::{Classifier, Error, Result};
use ndarray::prelude::*;
use rayon::prelude::*;

/// A fixed, ordered group of classifiers trained on the same data. Members are fit and queried in parallel, and their outputs are always combined in the order the members were given.
pub struct ModelEnsemble {
	models: Vec<Box<dyn Classifier>>,
}

impl ModelEnsemble {
	pub fn new(models: Vec<Box<dyn Classifier>>) -> Result<Self> {
		if models.is_empty() {
			return Err(Error::NoModels);
		}
		Ok(Self { models })
	}

	pub fn len(&self) -> usize {
		self.models.len()
	}

	pub fn is_empty(&self) -> bool {
		self.models.is_empty()
	}

	pub fn models(&self) -> &[Box<dyn Classifier>] {
		&self.models
	}

	/// Fit every member on `features` and `labels`. If any member fails, the error of the first failing member is returned.
	pub fn fit(&mut self, features: ArrayView2<f32>, labels: ArrayView1<usize>) -> Result<&mut Self> {
		let results: Vec<Result<()>> = self
			.models
			.par_iter_mut()
			.map(|model| model.fit(features, labels))
			.collect();
		results.into_iter().collect::<Result<()>>()?;
		Ok(self)
	}

	/// Predict a label with every member. The output has shape (n_examples, n_models).
	pub fn predict(&self, features: ArrayView2<f32>) -> Result<Array2<usize>> {
		let results: Vec<Result<Array1<usize>>> = self
			.models
			.par_iter()
			.map(|model| model.predict(features))
			.collect();
		let columns = check_rows(results, features.nrows(), |column| column.len())?;
		let columns: Vec<ArrayView1<usize>> = columns.iter().map(|column| column.view()).collect();
		Ok(ndarray::stack(Axis(1), &columns)?)
	}

	/// Predict class probabilities with every member. The output has shape (n_examples, n_models * n_classes), where the columns of the first member come first.
	pub fn predict_proba(&self, features: ArrayView2<f32>) -> Result<Array2<f32>> {
		let results: Vec<Result<Array2<f32>>> = self
			.models
			.par_iter()
			.map(|model| model.predict_proba(features))
			.collect();
		let probabilities = check_rows(results, features.nrows(), |probabilities| {
			probabilities.nrows()
		})?;
		let probabilities: Vec<ArrayView2<f32>> = probabilities
			.iter()
			.map(|probabilities| probabilities.view())
			.collect();
		Ok(ndarray::concatenate(Axis(1), &probabilities)?)
	}
}

/// Return the first error, or check that every member produced one row per example.
fn check_rows<T>(
	results: Vec<Result<T>>,
	n_examples: usize,
	n_rows: impl Fn(&T) -> usize,
) -> Result<Vec<T>> {
	let outputs = results.into_iter().collect::<Result<Vec<T>>>()?;
	for (model_index, output) in outputs.iter().enumerate() {
		let got = n_rows(output);
		if got != n_examples {
			return Err(Error::PredictionRowMismatch {
				model_index,
				expected: n_examples,
				got,
			});
		}
	}
	Ok(outputs)
}

#[cfg(test)]
use crate::mock::{mock_models, MockClassifier};

#[test]
fn test_empty_ensemble_is_rejected() {
	assert!(matches!(ModelEnsemble::new(Vec::new()), Err(Error::NoModels)));
}

#[test]
fn test_fit_fits_every_member_with_the_same_data() {
	let (models, logs) = mock_models(&[&[0.1, 0.9], &[0.2, 0.8], &[0.3, 0.7]]);
	let mut ensemble = ModelEnsemble::new(models).unwrap();
	let features = arr2(&[[1.0, 2.0], [3.0, 4.0]]);
	let labels = arr1(&[0, 1]);
	ensemble.fit(features.view(), labels.view()).unwrap();
	for log in logs.iter() {
		assert_eq!(log.fits(), vec![(features.clone(), labels.clone())]);
	}
}

#[test]
fn test_fit_returns_the_ensemble() {
	let (models, _) = mock_models(&[&[0.1, 0.9]]);
	let mut ensemble = ModelEnsemble::new(models).unwrap();
	let features = arr2(&[[1.0]]);
	let labels = arr1(&[0]);
	let n_models = ensemble
		.fit(features.view(), labels.view())
		.unwrap()
		.fit(features.view(), labels.view())
		.unwrap()
		.len();
	assert_eq!(n_models, 1);
}

#[test]
fn test_fit_propagates_the_first_member_failure() {
	let models: Vec<Box<dyn Classifier>> = vec![
		Box::new(MockClassifier::new(&[0.5, 0.5])),
		Box::new(MockClassifier::failing("first")),
		Box::new(MockClassifier::failing("second")),
	];
	let mut ensemble = ModelEnsemble::new(models).unwrap();
	let features = arr2(&[[1.0]]);
	let labels = arr1(&[0]);
	let error = ensemble.fit(features.view(), labels.view()).err().unwrap();
	assert_eq!(error.to_string(), "first");
}

#[test]
fn test_predictions_propagate_the_first_member_failure() {
	let models: Vec<Box<dyn Classifier>> = vec![
		Box::new(MockClassifier::new(&[0.5, 0.5])),
		Box::new(MockClassifier::failing_predictions("first")),
		Box::new(MockClassifier::failing_predictions("second")),
	];
	let ensemble = ModelEnsemble::new(models).unwrap();
	let features = arr2(&[[1.0], [2.0]]);
	let error = ensemble.predict(features.view()).err().unwrap();
	assert!(matches!(error, Error::Model(_)));
	assert_eq!(error.to_string(), "first");
	let error = ensemble.predict_proba(features.view()).err().unwrap();
	assert_eq!(error.to_string(), "first");
}

#[test]
fn test_predict_shape() {
	let (models, logs) = mock_models(&[&[0.1, 0.9], &[0.8, 0.2], &[0.3, 0.7]]);
	let ensemble = ModelEnsemble::new(models).unwrap();
	let features = Array2::zeros((10, 4));
	let predictions = ensemble.predict(features.view()).unwrap();
	assert_eq!(predictions.dim(), (10, 3));
	assert_eq!(predictions.row(0), aview1(&[1usize, 0, 1]));
	for log in logs.iter() {
		assert_eq!(log.predicts(), vec![features.clone()]);
	}
}

#[test]
fn test_predict_proba_concatenates_members_in_order() {
	let (models, logs) = mock_models(&[&[0.1, 0.9], &[0.2, 0.8], &[0.3, 0.7]]);
	let ensemble = ModelEnsemble::new(models).unwrap();
	let features = Array2::zeros((10, 4));
	let probabilities = ensemble.predict_proba(features.view()).unwrap();
	assert_eq!(probabilities.dim(), (10, 6));
	for row in probabilities.axis_iter(Axis(0)) {
		assert_eq!(row, aview1(&[0.1f32, 0.9, 0.2, 0.8, 0.3, 0.7]));
	}
	for log in logs.iter() {
		assert_eq!(log.predict_probas().len(), 1);
	}
}

#[test]
fn test_predict_proba_rejects_short_member_output() {
	struct Short;
	impl Classifier for Short {
		fn fit(&mut self, _: ArrayView2<f32>, _: ArrayView1<usize>) -> Result<()> {
			Ok(())
		}
		fn predict_proba(&self, _: ArrayView2<f32>) -> Result<Array2<f32>> {
			Ok(Array2::zeros((1, 2)))
		}
	}
	let models: Vec<Box<dyn Classifier>> = vec![Box::new(MockClassifier::new(&[0.5, 0.5])), Box::new(Short)];
	let ensemble = ModelEnsemble::new(models).unwrap();
	let features = Array2::zeros((3, 1));
	let error = ensemble.predict_proba(features.view()).err().unwrap();
	insta::assert_debug_snapshot!(error, @r###"
 PredictionRowMismatch {
     model_index: 1,
     expected: 3,
     got: 1,
 }
 "###);
}
