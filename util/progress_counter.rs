use num_traits::ToPrimitive;
use std::sync::{
	atomic::{AtomicU64, Ordering},
	Arc,
};

/// A `ProgressCounter` is a cheaply cloneable handle to a shared counter. The code doing the work increments it and whoever displays progress reads it, possibly from another thread.
#[derive(Clone, Debug)]
pub struct ProgressCounter {
	current: Arc<AtomicU64>,
	total: u64,
}

impl ProgressCounter {
	pub fn new(total: u64) -> Self {
		Self {
			current: Arc::new(AtomicU64::new(0)),
			total,
		}
	}

	pub fn total(&self) -> u64 {
		self.total
	}

	pub fn get(&self) -> u64 {
		self.current.load(Ordering::Relaxed)
	}

	pub fn set(&self, value: u64) {
		self.current.store(value, Ordering::Relaxed);
	}

	pub fn inc(&self, amount: u64) {
		self.current.fetch_add(amount, Ordering::Relaxed);
	}

	/// The fraction of the work completed, in `[0, 1]`. A counter with a total of zero is always complete.
	pub fn fraction(&self) -> f32 {
		if self.total == 0 {
			return 1.0;
		}
		let current = self.get().min(self.total);
		current.to_f32().unwrap_or(0.0) / self.total.to_f32().unwrap_or(1.0)
	}

	pub fn is_done(&self) -> bool {
		self.get() >= self.total
	}
}

impl std::fmt::Display for ProgressCounter {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(
			f,
			"{}/{} ({:.0}%)",
			self.get(),
			self.total,
			self.fraction() * 100.0
		)
	}
}

#[test]
fn test_progress_counter_shared_between_clones() {
	let counter = ProgressCounter::new(4);
	let handle = counter.clone();
	handle.inc(1);
	handle.inc(2);
	assert_eq!(counter.get(), 3);
	assert!(!counter.is_done());
	assert_eq!(counter.to_string(), "3/4 (75%)");
	counter.set(4);
	assert!(handle.is_done());
}

#[test]
fn test_progress_counter_empty_total() {
	let counter = ProgressCounter::new(0);
	assert!((counter.fraction() - 1.0).abs() < std::f32::EPSILON);
	assert!(counter.is_done());
}
