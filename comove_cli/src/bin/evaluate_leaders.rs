//! Evaluates detected leaders against ground truth.

use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;
use tracing::info;

use comove_cli::{init_logging, or_exit, BinaryClassifierResult};
use comove_core::archive::{load_ground_truth_file, load_leader_file};
use comove_core::{ArchiveFormat, Error, FeatureParameters, GroundTruth, LeaderData, Result};

/// Evaluate the accuracy of a leader file.
#[derive(Parser, Debug)]
#[command(name = "evaluate-leaders")]
struct Args {
    /// A leader file produced by detect-leaders.
    #[arg(long, value_name = "PATH")]
    input: PathBuf,

    /// Format of the leader file: json or binary.
    #[arg(long = "input-type", value_name = "TYPE", default_value = "json")]
    input_type: String,

    /// The ground truth to compare the leader results against.
    #[arg(long = "ground-truth", value_name = "PATH")]
    ground_truth: PathBuf,

    /// Evaluation results are written to this file.
    #[arg(long, value_name = "PATH")]
    output: PathBuf,

    /// Verbose output.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct EvaluationReport {
    params: FeatureParameters,
    result: BinaryClassifierResult,
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let input_format: ArchiveFormat = or_exit(args.input_type.parse(), "invalid input type");
    let (leaders, params) = or_exit(
        load_leader_file(&args.input, input_format),
        "failed to read leader file",
    );
    let gt = or_exit(
        load_ground_truth_file(&args.ground_truth, ArchiveFormat::Json),
        "failed to read ground truth file",
    );

    info!(
        source = %args.input.display(),
        ground_truth = %args.ground_truth.display(),
        data_source = %params.data_source,
        algorithm = %params.algorithm,
        window_size = params.window_size,
        time_lag = params.time_lag,
        "evaluating leader file"
    );

    let result = or_exit(
        eval_leaders(args.input.display().to_string(), &leaders, &gt),
        "evaluation failed",
    );
    info!(
        true_positive = result.true_positive,
        false_positive = result.false_positive,
        false_negative = result.false_negative,
        true_negative = result.true_negative,
        accuracy = result.accuracy,
        "leader evaluation finished"
    );

    let report = EvaluationReport { params, result };
    or_exit(write_report(&args.output, &report), "failed to write report");
    info!(output = %args.output.display(), "evaluation report written");
}

/// Builds a confusion matrix over the detected leaders.
///
/// A ground truth group counts as detected when at least one of its
/// real leaders appears in the detected leader list; every detected
/// leader that leads no group at all is a false positive.
fn eval_leaders(name: String, leaders: &LeaderData, gt: &GroundTruth) -> Result<BinaryClassifierResult> {
    let num_devices = leaders.devices.len() as i64;

    let mut false_positive = 0i64;
    let mut false_negative = 0i64;
    let mut positives = 0i64;
    let mut negatives = 0i64;

    for ts in leaders.begin_timestamp..=leaders.end_timestamp {
        let gt_leaders = gt
            .leaders_at(ts)
            .ok_or_else(|| Error::Range(format!("timestamp not in ground truth: {ts}")))?;
        let detected = &leaders.data_at(ts).leaders;

        positives += gt_leaders.len() as i64;
        negatives += num_devices - gt_leaders.len() as i64;

        for group in gt_leaders.values() {
            let found = group.iter().any(|real| detected.contains(real));
            if !found {
                // A leader of a group was not classified as such.
                false_negative += 1;
            }
        }
        for leader in detected {
            let is_real = gt_leaders.values().any(|group| group.contains(leader));
            if !is_real {
                // A follower was classified as a leader.
                false_positive += 1;
            }
        }
    }

    Ok(BinaryClassifierResult::new(
        name,
        positives - false_negative,
        false_positive,
        false_negative,
        negatives - false_positive,
    ))
}

fn write_report(path: &PathBuf, report: &EvaluationReport) -> Result<()> {
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(file, report)?;
    Ok(())
}
