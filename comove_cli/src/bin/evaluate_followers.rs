//! Evaluates detected following types against ground truth.

use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;
use tracing::{debug, info};

use comove_cli::{init_logging, or_exit, FollowerEvaluationResult};
use comove_core::archive::{load_follower_file, load_ground_truth_file};
use comove_core::ground_truth::Relation;
use comove_core::{ArchiveFormat, FeatureParameters, FollowingData, FollowingType, GroundTruth};

/// Evaluate the precision of a follower file.
#[derive(Parser, Debug)]
#[command(name = "evaluate-followers")]
struct Args {
    /// A follower file produced by detect-followers.
    #[arg(long, value_name = "PATH")]
    input: PathBuf,

    /// Format of the follower file: json or binary.
    #[arg(long = "input-type", value_name = "TYPE", default_value = "json")]
    input_type: String,

    /// The ground truth to compare the follower results against.
    #[arg(long = "ground-truth", value_name = "PATH")]
    ground_truth: PathBuf,

    /// Evaluation results are written to this file.
    #[arg(long, value_name = "PATH")]
    output: PathBuf,

    /// Verbose output (e.g. highlighting good timestamps).
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct EvaluationReport {
    params: FeatureParameters,
    result: FollowerEvaluationResult,
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let input_format: ArchiveFormat = or_exit(args.input_type.parse(), "invalid input type");
    let (followers, params) = or_exit(
        load_follower_file(&args.input, input_format),
        "failed to read follower file",
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
        "evaluating follower file"
    );

    let result = eval_followers(args.input.display().to_string(), &followers, &gt);
    info!(
        correct = result.correct,
        total = result.total,
        accuracy = result.accuracy,
        accuracy_co_moving = result.accuracy_co_moving,
        "follower evaluation finished"
    );

    let report = EvaluationReport { params, result };
    or_exit(write_report(&args.output, &report), "failed to write report");
    info!(output = %args.output.display(), "evaluation report written");
}

/// Compares every classified record's following type with the ground
/// truth relation of its pair.
fn eval_followers(
    name: String,
    followers: &FollowingData,
    gt: &GroundTruth,
) -> FollowerEvaluationResult {
    let mut correct = 0i64;
    let mut total = 0i64;
    let mut total_co_moving = 0i64;

    for ts in followers.begin_timestamp..=followers.end_timestamp {
        let data = followers.data_at(ts);

        let mut ts_correct = 0i64;
        let mut ts_total = 0i64;
        for pair in &data.co_moving {
            let left_name = &followers.devices[pair.left];
            let right_name = &followers.devices[pair.right];
            let real = gt.relation_at(ts, left_name, right_name);

            if real != Relation::None {
                total_co_moving += 1;
            }
            let matches = match pair.kind {
                // A co-leading pair counts as a correctly detected
                // leading relation.
                FollowingType::CoLeading | FollowingType::Leading => real == Relation::Leading,
                FollowingType::Following => real == Relation::Following,
            };
            if matches {
                ts_correct += 1;
            }
            ts_total += 1;
        }

        correct += ts_correct;
        total += ts_total;

        if ts_total > 0 && ts_correct as f64 / ts_total as f64 > 0.8 {
            debug!(
                timestamp = ts,
                correct = ts_correct,
                total = ts_total,
                "good timestamp"
            );
        }
    }

    FollowerEvaluationResult::new(name, correct, total, total_co_moving)
}

fn write_report(path: &PathBuf, report: &EvaluationReport) -> comove_core::Result<()> {
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(file, report)?;
    Ok(())
}
