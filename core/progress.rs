use deepforest_util::progress_counter::ProgressCounter;

/// Progress events emitted by [`train`](../train/fn.train.html).
#[derive(Clone, Debug)]
pub enum Progress {
	/// The counter tracks bytes of the csv file read so far.
	Loading(ProgressCounter),
	Shuffling,
	Training(TrainProgress),
	/// The counter tracks test examples evaluated so far.
	Testing(ProgressCounter),
}

/// Progress events emitted by [`DeepForest::train`](../struct.DeepForest.html#method.train).
#[derive(Clone, Debug)]
pub enum TrainProgress {
	/// The counter is incremented once for each patch shape that finishes scanning.
	Scanning(ProgressCounter),
	TrainingCascade { n_layers: usize },
}
