/*!
This module defines the `Config` struct, which is used to configure training a deep forest with [`train`](../train/fn.train.html). Every field is optional.

```yaml
test_fraction: 0.25
shuffle:
  seed: 7
seed: 42
scanning:
  patch_shapes: [[2, 2], [3, 3]]
  n_patches: all
  models:
    - model: random_forest
      n_trees: 30
    - model: completely_random_forest
      n_trees: 30
cascade:
  n_layers: 3
  models:
    - model: random_forest
      max_depth: 8
```
*/

#[derive(Debug, Default, serde::Deserialize)]
pub struct Config {
	pub test_fraction: Option<f32>,
	pub shuffle: Option<Shuffle>,
	/// The seed that patch positions and model seeds are derived from.
	pub seed: Option<u64>,
	pub scanning: Option<ScanningConfig>,
	pub cascade: Option<CascadeConfig>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(untagged)]
pub enum Shuffle {
	Enabled(bool),
	Options { seed: u64 },
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct ScanningConfig {
	/// Patch shapes as `[height, width]`. An empty list disables scanning.
	pub patch_shapes: Option<Vec<(usize, usize)>>,
	pub n_patches: Option<NPatches>,
	pub models: Option<Vec<ModelConfig>>,
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize)]
#[serde(untagged)]
pub enum NPatches {
	Count(usize),
	Keyword(NPatchesKeyword),
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize)]
pub enum NPatchesKeyword {
	/// Take a patch at every position.
	#[serde(rename = "all")]
	All,
}

impl NPatches {
	pub fn to_option(self) -> Option<usize> {
		match self {
			NPatches::Count(n_patches) => Some(n_patches),
			NPatches::Keyword(NPatchesKeyword::All) => None,
		}
	}
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct CascadeConfig {
	pub n_layers: Option<usize>,
	pub models: Option<Vec<ModelConfig>>,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(tag = "model")]
pub enum ModelConfig {
	#[serde(rename = "random_forest")]
	RandomForest(ForestConfig),
	#[serde(rename = "completely_random_forest")]
	CompletelyRandomForest(ForestConfig),
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
pub struct ForestConfig {
	pub n_trees: Option<usize>,
	pub max_depth: Option<usize>,
	pub min_examples_split: Option<usize>,
	pub max_features: Option<usize>,
	/// If unset, a seed is drawn from the deep forest's seed.
	pub seed: Option<u64>,
}

#[test]
fn test_parse_config() {
	let config: Config = serde_yaml::from_str(
		r#"
test_fraction: 0.25
shuffle:
  seed: 7
scanning:
  patch_shapes: [[2, 2], [3, 4]]
  n_patches: all
  models:
    - model: random_forest
      n_trees: 30
    - model: completely_random_forest
      max_depth: 5
      seed: 3
cascade:
  n_layers: 3
"#,
	)
	.unwrap();
	assert_eq!(config.test_fraction, Some(0.25));
	assert!(matches!(config.shuffle, Some(Shuffle::Options { seed: 7 })));
	let scanning = config.scanning.unwrap();
	assert_eq!(scanning.patch_shapes, Some(vec![(2, 2), (3, 4)]));
	assert_eq!(scanning.n_patches.map(NPatches::to_option), Some(None));
	assert_eq!(
		scanning.models.unwrap(),
		vec![
			ModelConfig::RandomForest(ForestConfig {
				n_trees: Some(30),
				..Default::default()
			}),
			ModelConfig::CompletelyRandomForest(ForestConfig {
				max_depth: Some(5),
				seed: Some(3),
				..Default::default()
			}),
		]
	);
	let cascade = config.cascade.unwrap();
	assert_eq!(cascade.n_layers, Some(3));
	assert!(cascade.models.is_none());
}

#[test]
fn test_parse_patch_count_and_disabled_shuffle() {
	let config: Config = serde_yaml::from_str("shuffle: false\nscanning:\n  n_patches: 12\n").unwrap();
	assert!(matches!(config.shuffle, Some(Shuffle::Enabled(false))));
	assert_eq!(
		config.scanning.unwrap().n_patches,
		Some(NPatches::Count(12))
	);
}
