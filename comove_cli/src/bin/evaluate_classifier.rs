//! Evaluates a trained classifier against labelled feature data.

use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;
use tracing::info;

use comove_cli::{init_logging, or_exit, BinaryClassifierResult};
use comove_core::archive::{load_classifier_file, load_feature_file, load_ground_truth_file};
use comove_core::{ArchiveFormat, CoMovingClassifier, Error, FeatureParameters, Result};

/// Evaluate a classifier against feature files and their ground truth.
///
/// Input files are given in pairs: a feature file followed by its
/// ground truth file.
#[derive(Parser, Debug)]
#[command(name = "evaluate-classifier")]
struct Args {
    /// A classifier file produced by train-classifier.
    #[arg(long, value_name = "PATH")]
    classifier: PathBuf,

    /// Format of the feature files: json or binary.
    #[arg(long = "input-type", value_name = "TYPE", default_value = "json")]
    input_type: String,

    /// Evaluation results are written to this file.
    #[arg(long, value_name = "PATH")]
    output: PathBuf,

    /// Additionally run the cross-validation sweep over the SVM cost
    /// parameter and log the per-C accuracies.
    #[arg(long = "cross-validate")]
    cross_validate: bool,

    /// Pairs of feature file and ground truth file.
    #[arg(value_name = "FILE", required = true)]
    inputs: Vec<PathBuf>,

    /// Verbose output.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct EvaluationReport {
    params: FeatureParameters,
    results: Vec<BinaryClassifierResult>,
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let input_format: ArchiveFormat = or_exit(args.input_type.parse(), "invalid input type");
    if args.inputs.len() % 2 != 0 {
        or_exit(
            Err::<(), _>(Error::InvalidParameters(
                "expected an even number of input files (feature data and ground truth pairs)"
                    .into(),
            )),
            "invalid arguments",
        );
    }

    let (mut classifier, training_params) = or_exit(
        load_classifier_file(&args.classifier, ArchiveFormat::Json),
        "failed to read classifier file",
    );
    info!(
        source = %args.classifier.display(),
        data_source = %training_params.data_source,
        algorithm = %training_params.algorithm,
        window_size = training_params.window_size,
        time_lag = training_params.time_lag,
        "using classifier"
    );

    let mut results = Vec::new();
    for pair in args.inputs.chunks(2) {
        let result = or_exit(
            evaluate_data_set(
                &mut classifier,
                &training_params,
                &pair[0],
                &pair[1],
                input_format,
                args.cross_validate,
            ),
            "evaluation failed",
        );
        results.push(result);
    }

    let report = EvaluationReport {
        params: training_params,
        results,
    };
    or_exit(write_report(&args.output, &report), "failed to write report");
    info!(output = %args.output.display(), "evaluation report written");
}

fn evaluate_data_set(
    classifier: &mut CoMovingClassifier,
    training_params: &FeatureParameters,
    feature_path: &PathBuf,
    ground_truth_path: &PathBuf,
    input_format: ArchiveFormat,
    cross_validate: bool,
) -> Result<BinaryClassifierResult> {
    let (sim, params) = load_feature_file(feature_path, input_format)?;
    training_params.ensure_matches(&params, &feature_path.display().to_string())?;

    let gt = load_ground_truth_file(ground_truth_path, ArchiveFormat::Json)?;
    gt.must_match(sim.begin_timestamp, sim.end_timestamp, &sim.devices)?;

    info!(
        source = %feature_path.display(),
        ground_truth = %ground_truth_path.display(),
        devices = sim.devices.len(),
        duration = sim.duration,
        "evaluating data set"
    );

    let mut true_positive = 0i64;
    let mut false_positive = 0i64;
    let mut false_negative = 0i64;
    let mut true_negative = 0i64;

    for pair in &sim.pairs {
        let left_name = &sim.devices[pair.left];
        let right_name = &sim.devices[pair.right];

        for ts in sim.begin_timestamp..=sim.end_timestamp {
            let co_moving = gt.co_moving_at(ts, left_name, right_name);
            let predicted = classifier.co_moving(sim.feature_at(pair, ts));

            match (co_moving, predicted) {
                (true, true) => true_positive += 1,
                (true, false) => false_negative += 1,
                (false, true) => false_positive += 1,
                (false, false) => true_negative += 1,
            }
        }
    }

    if cross_validate {
        for entry in CoMovingClassifier::cross_validate(&sim, &gt)? {
            info!(
                c = entry.c,
                positive_accuracy = entry.positive_accuracy,
                negative_accuracy = entry.negative_accuracy,
                "cross validation"
            );
        }
    }

    Ok(BinaryClassifierResult::new(
        feature_path.display().to_string(),
        true_positive,
        false_positive,
        false_negative,
        true_negative,
    ))
}

fn write_report(path: &PathBuf, report: &EvaluationReport) -> Result<()> {
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(file, report)?;
    Ok(())
}
