//! Trains the co-moving classifier from a feature file and its ground
//! truth.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use comove_cli::{init_logging, or_exit};
use comove_core::archive::{load_feature_file, load_ground_truth_file, save_classifier_file};
use comove_core::{ArchiveFormat, CoMovingClassifier};

/// Train the co-moving classifier.
#[derive(Parser, Debug)]
#[command(name = "train-classifier")]
struct Args {
    /// A feature file produced by produce-features.
    #[arg(long, value_name = "PATH")]
    input: PathBuf,

    /// Format of the feature file: json or binary.
    #[arg(long = "input-type", value_name = "TYPE", default_value = "json")]
    input_type: String,

    /// A ground truth file produced by produce-ground-truth.
    #[arg(long = "ground-truth", value_name = "PATH")]
    ground_truth: PathBuf,

    /// Output file for the trained classifier.
    #[arg(long, value_name = "PATH")]
    output: PathBuf,

    /// Output format: json, compact-json or binary.
    #[arg(long = "output-type", value_name = "TYPE", default_value = "json")]
    output_type: String,

    /// Verbose output.
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let input_format: ArchiveFormat = or_exit(args.input_type.parse(), "invalid input type");
    let output_format: ArchiveFormat = or_exit(args.output_type.parse(), "invalid output type");

    let (sim, params) = or_exit(
        load_feature_file(&args.input, input_format),
        "failed to read feature file",
    );
    let gt = or_exit(
        load_ground_truth_file(&args.ground_truth, ArchiveFormat::Json),
        "failed to read ground truth file",
    );
    or_exit(
        gt.must_match(sim.begin_timestamp, sim.end_timestamp, &sim.devices),
        "ground truth mismatch",
    );

    info!(
        source = %args.input.display(),
        data_source = %params.data_source,
        algorithm = %params.algorithm,
        window_size = params.window_size,
        time_lag = params.time_lag,
        devices = sim.devices.len(),
        duration = sim.duration,
        "training co-moving classifier"
    );

    let mut classifier = CoMovingClassifier::new();
    or_exit(classifier.learn(&sim, &gt), "training failed");

    or_exit(
        save_classifier_file(&args.output, output_format, &classifier, &params),
        "failed to write classifier file",
    );
    info!(output = %args.output.display(), "classifier written");
}
