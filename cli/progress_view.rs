use colored::Colorize;
use deepforest_core::progress::{Progress, TrainProgress};
use std::{
	io::Write,
	sync::mpsc::{channel, Receiver, Sender, TryRecvError},
	thread::{sleep, spawn, JoinHandle},
	time::Duration,
};

/// Redraws the latest progress event on one line of stderr from a background thread.
pub struct ProgressView {
	thread: Option<JoinHandle<()>>,
	sender: Option<Sender<Option<Progress>>>,
}

impl ProgressView {
	pub fn new() -> Self {
		let (sender, receiver) = channel::<Option<Progress>>();
		let thread = Some(spawn(move || thread_main(receiver)));
		Self {
			thread,
			sender: Some(sender),
		}
	}

	pub fn update(&mut self, progress: Progress) {
		if let Some(sender) = self.sender.as_ref() {
			sender.send(Some(progress)).ok();
		}
	}
}

impl Drop for ProgressView {
	fn drop(&mut self) {
		if let Some(sender) = self.sender.take() {
			sender.send(None).ok();
		}
		if let Some(thread) = self.thread.take() {
			thread.join().ok();
		}
	}
}

fn thread_main(receiver: Receiver<Option<Progress>>) {
	let mut progress = None;
	let mut stderr = std::io::stderr();
	loop {
		match receiver.try_recv() {
			Err(TryRecvError::Empty) => {}
			Err(TryRecvError::Disconnected) | Ok(None) => break,
			Ok(Some(new_progress)) => {
				// Finish the line of the previous stage.
				if progress.is_some() {
					eprintln!();
				}
				progress = Some(new_progress);
			}
		};
		if let Some(progress) = progress.as_ref() {
			eprint!("\r{}", render(progress));
			stderr.flush().ok();
		}
		sleep(Duration::from_millis(15));
	}
	if let Some(progress) = progress.as_ref() {
		eprintln!("\r{}", render(progress));
	}
}

fn render(progress: &Progress) -> String {
	let (stage, counter) = match progress {
		Progress::Loading(counter) => ("loading", Some(counter)),
		Progress::Shuffling => ("shuffling", None),
		Progress::Training(TrainProgress::Scanning(counter)) => ("scanning", Some(counter)),
		Progress::Training(TrainProgress::TrainingCascade { n_layers }) => {
			return format!("{} {} layers", "training cascade".bold(), n_layers);
		}
		Progress::Testing(counter) => ("testing", Some(counter)),
	};
	match counter {
		Some(counter) => format!("{} {}", stage.bold(), counter),
		None => format!("{}", stage.bold()),
	}
}
