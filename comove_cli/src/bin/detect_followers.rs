//! Classifies feature data into per-timestamp following relations.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use comove_cli::{init_logging, or_exit};
use comove_core::archive::{load_classifier_file, load_feature_file, save_follower_file};
use comove_core::{classify, ArchiveFormat};

/// Detect co-moving pairs and their following relations.
#[derive(Parser, Debug)]
#[command(name = "detect-followers")]
struct Args {
    /// A feature file produced by produce-features.
    #[arg(long, value_name = "PATH")]
    input: PathBuf,

    /// Format of the feature file: json or binary.
    #[arg(long = "input-type", value_name = "TYPE", default_value = "json")]
    input_type: String,

    /// A classifier file produced by train-classifier.
    #[arg(long, value_name = "PATH")]
    classifier: PathBuf,

    /// Output file.
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

    let (mut classifier, classifier_params) = or_exit(
        load_classifier_file(&args.classifier, ArchiveFormat::Json),
        "failed to read classifier file",
    );
    info!(
        source = %args.classifier.display(),
        data_source = %classifier_params.data_source,
        algorithm = %classifier_params.algorithm,
        window_size = classifier_params.window_size,
        time_lag = classifier_params.time_lag,
        "using classifier"
    );

    let (sim, params) = or_exit(
        load_feature_file(&args.input, input_format),
        "failed to read feature file",
    );
    or_exit(
        classifier_params.ensure_matches(&params, &args.input.display().to_string()),
        "incompatible feature data",
    );
    info!(
        source = %args.input.display(),
        devices = sim.devices.len(),
        duration = sim.duration,
        "classifying feature data"
    );

    let followers = classify(&mut classifier, &sim);

    or_exit(
        save_follower_file(&args.output, output_format, &followers, &params),
        "failed to write follower file",
    );
    info!(output = %args.output.display(), "follower file written");
}
