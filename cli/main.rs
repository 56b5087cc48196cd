//! This module contains the main entrypoint to the deepforest cli.

use self::progress_view::ProgressView;
use anyhow::Result;
use clap::{Args, Parser};
use colored::Colorize;
use deepforest_core::train::TrainOutput;
use std::path::PathBuf;

mod progress_view;

#[derive(Parser)]
#[clap(
	about = "Train a deep forest on image-like data.",
	setting = clap::AppSettings::DisableHelpSubcommand,
)]
enum Options {
	#[clap(name = "train")]
	Train(TrainArgs),
}

#[derive(Args, Debug)]
#[clap(about = "train a deep forest")]
#[clap(long_about = "train a deep forest from a csv file and report metrics on a held out test split")]
struct TrainArgs {
	#[clap(short, long, help = "the path to your .csv file")]
	file: PathBuf,
	#[clap(short, long, help = "the name of the column holding the class names")]
	target: String,
	#[clap(long, help = "the height of each sample")]
	height: usize,
	#[clap(long, help = "the width of each sample")]
	width: usize,
	#[clap(short, long, help = "the path to a config file")]
	config: Option<PathBuf>,
	#[clap(long = "no-progress", help = "disable the progress view", parse(from_flag = std::ops::Not::not))]
	progress: bool,
}

fn main() {
	let options = Options::parse();
	let result = match options {
		Options::Train(args) => cli_train(args),
	};
	if let Err(error) = result {
		eprintln!("{}: {:#}", "error".red().bold(), error);
		std::process::exit(1);
	}
}

fn cli_train(args: TrainArgs) -> Result<()> {
	let output = {
		let mut progress_view = if args.progress {
			Some(ProgressView::new())
		} else {
			None
		};
		deepforest_core::train(
			&args.file,
			&args.target,
			(args.height, args.width),
			args.config.as_deref(),
			&mut |progress| {
				if let Some(progress_view) = progress_view.as_mut() {
					progress_view.update(progress)
				}
			},
		)?
	};
	print_report(&output);
	Ok(())
}

fn print_report(output: &TrainOutput) {
	println!(
		"Trained a {} layer deep forest on {} examples.",
		output.model.n_layers(),
		output.n_examples_train
	);
	let test_metrics = match output.test_metrics.as_ref() {
		Some(test_metrics) => test_metrics,
		None => {
			println!("The test split is empty, so no metrics were computed.");
			return;
		}
	};
	println!("Tested on {} examples.", output.n_examples_test);
	println!("{} {:.4}", "accuracy".bold(), test_metrics.accuracy);
	println!(
		"{} {:.4}",
		"baseline accuracy".bold(),
		test_metrics.baseline_accuracy
	);
	println!(
		"{:<20} {:>10} {:>10} {:>10}",
		"class".bold(),
		"precision".bold(),
		"recall".bold(),
		"f1".bold()
	);
	for (class, class_metrics) in output.classes.iter().zip(test_metrics.class_metrics.iter()) {
		println!(
			"{:<20} {:>10.4} {:>10.4} {:>10.4}",
			class, class_metrics.precision, class_metrics.recall, class_metrics.f1_score
		);
	}
}
