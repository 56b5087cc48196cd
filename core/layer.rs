use crate::{Classifier, Error, ModelEnsemble, Result};
use ndarray::prelude::*;

/**
A link in the cascade. The head of a cascade is an [`InputLayer`](struct.InputLayer.html), every other link is a [`Layer`](struct.Layer.html) that owns its predecessor.

`predict` is the output the next link trains on. For an `InputLayer` this is the ensemble's class probabilities, for a `Layer` it is the ensemble's predicted labels. `predict_proba` always returns class probabilities, with shape (n_examples, n_models * n_classes).
*/
pub trait CascadeLayer: Send + Sync {
	fn fit(&mut self, features: ArrayView2<f32>, labels: ArrayView1<usize>) -> Result<()>;

	fn predict(&self, features: ArrayView2<f32>) -> Result<Array2<f32>>;

	fn predict_proba(&self, features: ArrayView2<f32>) -> Result<Array2<f32>>;
}

/// The head of a cascade. It trains directly on the input features.
pub struct InputLayer {
	ensemble: ModelEnsemble,
}

impl InputLayer {
	pub fn new(models: Vec<Box<dyn Classifier>>) -> Result<Self> {
		Ok(Self {
			ensemble: ModelEnsemble::new(models)?,
		})
	}

	pub fn ensemble(&self) -> &ModelEnsemble {
		&self.ensemble
	}
}

impl CascadeLayer for InputLayer {
	fn fit(&mut self, features: ArrayView2<f32>, labels: ArrayView1<usize>) -> Result<()> {
		self.ensemble.fit(features, labels)?;
		Ok(())
	}

	/// Returns class probabilities, not labels.
	fn predict(&self, features: ArrayView2<f32>) -> Result<Array2<f32>> {
		self.ensemble.predict_proba(features)
	}

	fn predict_proba(&self, features: ArrayView2<f32>) -> Result<Array2<f32>> {
		self.ensemble.predict_proba(features)
	}
}

/// A cascade link that trains on its predecessor's `predict` output.
pub struct Layer {
	previous: Box<dyn CascadeLayer>,
	ensemble: ModelEnsemble,
}

impl Layer {
	pub fn new(previous: Box<dyn CascadeLayer>, models: Vec<Box<dyn Classifier>>) -> Result<Self> {
		Ok(Self {
			previous,
			ensemble: ModelEnsemble::new(models)?,
		})
	}

	pub fn previous(&self) -> &dyn CascadeLayer {
		self.previous.as_ref()
	}

	pub fn ensemble(&self) -> &ModelEnsemble {
		&self.ensemble
	}
}

impl CascadeLayer for Layer {
	/// Fit the predecessor, predict with it, then fit this layer's ensemble on the prediction.
	fn fit(&mut self, features: ArrayView2<f32>, labels: ArrayView1<usize>) -> Result<()> {
		self.previous.fit(features, labels)?;
		let previous_output = self.previous.predict(features)?;
		self.ensemble.fit(previous_output.view(), labels)?;
		Ok(())
	}

	/// Returns one predicted label per member, as floats, with shape (n_examples, n_models).
	fn predict(&self, features: ArrayView2<f32>) -> Result<Array2<f32>> {
		let previous_output = self.previous.predict(features)?;
		let labels = self.ensemble.predict(previous_output.view())?;
		Ok(labels.mapv(|label| label as f32))
	}

	fn predict_proba(&self, features: ArrayView2<f32>) -> Result<Array2<f32>> {
		let previous_output = self.previous.predict(features)?;
		self.ensemble.predict_proba(previous_output.view())
	}
}

/// Build a cascade of `n_layers` links. `make_models` is called once per link, head first.
pub fn cascade(
	n_layers: usize,
	make_models: &mut dyn FnMut() -> Result<Vec<Box<dyn Classifier>>>,
) -> Result<Box<dyn CascadeLayer>> {
	if n_layers == 0 {
		return Err(Error::NoLayers);
	}
	let mut layer: Box<dyn CascadeLayer> = Box::new(InputLayer::new(make_models()?)?);
	for _ in 1..n_layers {
		layer = Box::new(Layer::new(layer, make_models()?)?);
	}
	Ok(layer)
}

#[cfg(test)]
use crate::mock::{mock_models, Call, MockClassifier, MockLayer};

#[test]
fn test_input_layer_rejects_empty_models() {
	assert!(matches!(InputLayer::new(Vec::new()), Err(Error::NoModels)));
}

#[test]
fn test_layer_rejects_empty_models() {
	let (models, _) = mock_models(&[&[0.5, 0.5]]);
	let previous = Box::new(InputLayer::new(models).unwrap());
	assert!(matches!(Layer::new(previous, Vec::new()), Err(Error::NoModels)));
}

#[test]
fn test_input_layer_fit_forwards_data_unchanged() {
	let (models, logs) = mock_models(&[&[0.4, 0.6]]);
	let mut layer = InputLayer::new(models).unwrap();
	let features = arr2(&[[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);
	let labels = arr1(&[1, 0, 1]);
	layer.fit(features.view(), labels.view()).unwrap();
	assert_eq!(logs[0].calls(), vec![Call::Fit { features, labels }]);
}

#[test]
fn test_input_layer_predict_returns_probabilities() {
	let (models, _) = mock_models(&[&[0.1, 0.9], &[0.2, 0.8], &[0.3, 0.7]]);
	let layer = InputLayer::new(models).unwrap();
	let features = Array2::zeros((10, 4));
	let predictions = layer.predict(features.view()).unwrap();
	assert_eq!(predictions.dim(), (10, 6));
	assert_eq!(predictions, layer.predict_proba(features.view()).unwrap());
}

#[test]
fn test_layer_fit_call_order() {
	let previous_output = arr2(&[[0.9, 0.1], [0.2, 0.8]]);
	let previous = MockLayer::new(previous_output.clone());
	let previous_log = previous.log.clone();
	let (models, logs) = mock_models(&[&[0.5, 0.5]]);
	let mut layer = Layer::new(Box::new(previous), models).unwrap();
	let features = arr2(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
	let labels = arr1(&[0, 1]);
	layer.fit(features.view(), labels.view()).unwrap();
	assert_eq!(
		previous_log.calls(),
		vec![
			Call::Fit {
				features: features.clone(),
				labels: labels.clone(),
			},
			Call::Predict(features),
		]
	);
	assert_eq!(
		logs[0].calls(),
		vec![Call::Fit {
			features: previous_output,
			labels,
		}]
	);
}

#[test]
fn test_two_layer_cascade_calls_the_input_layer_once() {
	let (input_models, input_logs) = mock_models(&[&[0.3, 0.7]]);
	let (models, _) = mock_models(&[&[0.6, 0.4]]);
	let input = InputLayer::new(input_models).unwrap();
	let mut layer = Layer::new(Box::new(input), models).unwrap();
	let features = Array2::from_shape_fn((4, 3), |(i, j)| (i * 3 + j) as f32);
	let labels = arr1(&[0, 1, 1, 0]);
	layer.fit(features.view(), labels.view()).unwrap();
	assert_eq!(input_logs[0].fits().len(), 1);
	assert_eq!(input_logs[0].fits()[0].0, features);
	assert_eq!(input_logs[0].predict_probas(), vec![features]);
}

#[test]
fn test_layer_predict_returns_labels() {
	let previous = MockLayer::new(arr2(&[[0.5, 0.5], [0.5, 0.5], [0.5, 0.5]]));
	let (models, logs) = mock_models(&[&[0.1, 0.9], &[0.8, 0.2]]);
	let layer = Layer::new(Box::new(previous), models).unwrap();
	let features = Array2::zeros((3, 7));
	let predictions = layer.predict(features.view()).unwrap();
	assert_eq!(predictions, arr2(&[[1.0f32, 0.0], [1.0, 0.0], [1.0, 0.0]]));
	assert_eq!(logs[0].predicts().len(), 1);
	assert!(logs[0].predict_probas().is_empty());
}

#[test]
fn test_cascade_widths_chain() {
	// The head emits 2 models * 2 classes columns, the next layer emits one label column per model.
	let mut widths = vec![4, 3].into_iter();
	let mut logs = Vec::new();
	let mut layer = cascade(3, &mut || {
		let (models, layer_logs) = match widths.next() {
			Some(4) => mock_models(&[&[0.1, 0.9], &[0.7, 0.3]]),
			Some(_) => mock_models(&[&[0.4, 0.6], &[0.2, 0.8], &[0.9, 0.1]]),
			None => mock_models(&[&[0.5, 0.5]]),
		};
		logs.push(layer_logs);
		Ok(models)
	})
	.unwrap();
	let features = Array2::zeros((5, 8));
	let labels = arr1(&[0, 1, 0, 1, 0]);
	layer.fit(features.view(), labels.view()).unwrap();
	let input_widths: Vec<usize> = logs.iter().map(|layer_logs| layer_logs[0].fits()[0].0.ncols()).collect();
	assert_eq!(input_widths, vec![8, 4, 3]);
	assert_eq!(layer.predict(features.view()).unwrap().dim(), (5, 1));
	assert_eq!(layer.predict_proba(features.view()).unwrap().dim(), (5, 2));
}

#[test]
fn test_cascade_without_layers() {
	assert!(matches!(
		cascade(0, &mut || Ok(mock_models(&[&[0.5, 0.5]]).0)),
		Err(Error::NoLayers)
	));
}

#[test]
fn test_previous_failure_propagates() {
	let models: Vec<Box<dyn Classifier>> = vec![Box::new(MockClassifier::failing("bad input"))];
	let input = InputLayer::new(models).unwrap();
	let (models, logs) = mock_models(&[&[0.5, 0.5]]);
	let mut layer = Layer::new(Box::new(input), models).unwrap();
	let features = Array2::zeros((2, 2));
	let labels = arr1(&[0, 1]);
	let error = layer.fit(features.view(), labels.view()).unwrap_err();
	assert_eq!(error.to_string(), "bad input");
	assert!(logs[0].calls().is_empty());
}

#[test]
fn test_previous_prediction_failure_propagates() {
	let models: Vec<Box<dyn Classifier>> =
		vec![Box::new(MockClassifier::failing_predictions("no probabilities"))];
	let input = InputLayer::new(models).unwrap();
	let (models, logs) = mock_models(&[&[0.5, 0.5]]);
	let mut layer = Layer::new(Box::new(input), models).unwrap();
	let features = Array2::zeros((2, 2));
	let labels = arr1(&[0, 1]);
	let error = layer.fit(features.view(), labels.view()).unwrap_err();
	assert_eq!(error.to_string(), "no probabilities");
	assert!(logs[0].fits().is_empty());
	let error = layer.predict(features.view()).unwrap_err();
	assert_eq!(error.to_string(), "no probabilities");
	let error = layer.predict_proba(features.view()).unwrap_err();
	assert_eq!(error.to_string(), "no probabilities");
	assert!(logs[0].calls().is_empty());
}

#[test]
fn test_own_prediction_failure_propagates() {
	let (input_models, _) = mock_models(&[&[0.3, 0.7]]);
	let input = InputLayer::new(input_models).unwrap();
	let models: Vec<Box<dyn Classifier>> = vec![Box::new(MockClassifier::failing_predictions("no labels"))];
	let mut layer = Layer::new(Box::new(input), models).unwrap();
	let features = Array2::zeros((3, 2));
	let labels = arr1(&[0, 1, 0]);
	layer.fit(features.view(), labels.view()).unwrap();
	assert_eq!(layer.predict(features.view()).unwrap_err().to_string(), "no labels");
	assert_eq!(layer.predict_proba(features.view()).unwrap_err().to_string(), "no labels");
}
