//! Shared plumbing for the pipeline binaries.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use comove_core::parser::{self, GameGroundTruthParser, GameSignalParser};
use comove_core::scene::SceneManifest;
use comove_core::signal::{bad_access_points, remove_access_points, SignalData};
use comove_core::{GroundTruth, Result, TracingData};

/// Minimum average signal strength an access point must reach to survive
/// the bad-AP filter.
pub const MINIMUM_SIGNAL_AVERAGE: f64 = -90.0;

/// Signal strength assumed for missing access-point readings.
pub const MISSING_SIGNAL_READING: i32 = -100;

/// Installs the global tracing subscriber for a binary.
pub fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("failed to set tracing subscriber");
}

/// Unwraps a pipeline result or prints the error and exits non-zero.
pub fn or_exit<T>(result: Result<T>, context: &str) -> T {
    match result {
        Ok(value) => value,
        Err(error) => {
            eprintln!("{context}: {error}");
            std::process::exit(1);
        }
    }
}

fn open_text(path: &Path) -> Result<BufReader<File>> {
    Ok(BufReader::new(File::open(path)?))
}

/// Drops access points whose average signal strength falls below the
/// minimum; logs the survivors.
fn clean_access_points(sd: &mut SignalData, minimum_average: f64) {
    let bad = bad_access_points(sd, minimum_average);
    if bad.is_empty() {
        return;
    }

    info!(
        removed = bad.len(),
        minimum_average, "removing access points below the signal average"
    );
    remove_access_points(sd, &bad);
}

/// Reads a plain signal file into tracing data: parse, drop bad access
/// points, normalise.
pub fn read_signal_file(
    path: &Path,
    minimum_average: f64,
    missing_reading: i32,
) -> Result<TracingData> {
    let mut signal = parser::parse_signal_data(open_text(path)?)?;
    clean_access_points(&mut signal, minimum_average);
    TracingData::from_signal(&signal, missing_reading)
}

/// Reads a plain location file into tracing data.
pub fn read_location_file(path: &Path) -> Result<TracingData> {
    let location = parser::parse_location_data(open_text(path)?)?;
    TracingData::from_location(&location)
}

/// Reads a scripted-scene ground truth file.
pub fn read_ground_truth_file(path: &Path) -> Result<GroundTruth> {
    parser::parse_ground_truth_data(open_text(path)?)
}

/// Reads all per-device scan files of a game scene into tracing data.
pub fn read_game_signal_files(
    manifest: &SceneManifest,
    minimum_average: f64,
    missing_reading: i32,
) -> Result<TracingData> {
    let game = manifest.game_data()?;

    let mut parser = GameSignalParser::new();
    for target in &manifest.targets {
        let path = game.scan_file(target);
        parser.parse(target, open_text(&path)?)?;
    }

    let mut signal = parser.finish();
    clean_access_points(&mut signal, minimum_average);
    TracingData::from_signal(&signal, missing_reading)
}

/// Reads all per-device follow-event files of a game scene.
pub fn read_game_ground_truth(manifest: &SceneManifest) -> Result<GroundTruth> {
    let game = manifest.game_data()?;

    let mut parser = GameGroundTruthParser::new(&game.evaders, manifest.start, manifest.end)?;
    for target in &manifest.targets {
        let path = game.follow_event_file(target);
        parser.parse(target, open_text(&path)?)?;
    }
    Ok(parser.finish())
}

/// The confusion matrix of one classifier evaluation run, with the
/// usual derived rates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryClassifierResult {
    /// Dataset name.
    pub name: String,

    pub true_positive: i64,
    pub false_positive: i64,
    pub false_negative: i64,
    pub true_negative: i64,

    pub recall: f64,
    pub specificity: f64,
    pub precision: f64,
    pub accuracy: f64,
    pub f: f64,
}

impl BinaryClassifierResult {
    pub fn new(
        name: impl Into<String>,
        true_positive: i64,
        false_positive: i64,
        false_negative: i64,
        true_negative: i64,
    ) -> Self {
        let positive = true_positive + false_negative;
        let negative = false_positive + true_negative;

        // Values like NaN or +/- inf are illegal JSON; a zero denominator
        // collapses the rate to 0.
        let div = |a: f64, b: f64| if b.abs() > 1e-7 { a / b } else { 0.0 };

        let recall = div(true_positive as f64, positive as f64);
        let specificity = div(true_negative as f64, negative as f64);
        let precision = div(
            true_positive as f64,
            (true_positive + false_positive) as f64,
        );
        let accuracy = div(
            (true_positive + true_negative) as f64,
            (positive + negative) as f64,
        );
        let f = 2.0 * div(precision * recall, precision + recall);

        Self {
            name: name.into(),
            true_positive,
            false_positive,
            false_negative,
            true_negative,
            recall,
            specificity,
            precision,
            accuracy,
            f,
        }
    }
}

/// Accuracy of the detected following types of one follower file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowerEvaluationResult {
    /// Dataset name.
    pub name: String,

    /// Records whose following type matches the ground truth relation.
    pub correct: i64,
    /// All records classified as co-moving.
    pub total: i64,
    /// Records that really co-move according to the ground truth.
    pub total_co_moving: i64,

    /// `correct / total`.
    pub accuracy: f64,
    /// `correct / total_co_moving`.
    pub accuracy_co_moving: f64,
}

impl FollowerEvaluationResult {
    pub fn new(name: impl Into<String>, correct: i64, total: i64, total_co_moving: i64) -> Self {
        let accuracy = if total == 0 {
            0.0
        } else {
            correct as f64 / total as f64
        };
        let accuracy_co_moving = if total_co_moving == 0 {
            0.0
        } else {
            correct as f64 / total_co_moving as f64
        };

        Self {
            name: name.into(),
            correct,
            total,
            total_co_moving,
            accuracy,
            accuracy_co_moving,
        }
    }
}
