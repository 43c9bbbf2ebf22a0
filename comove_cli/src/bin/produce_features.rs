//! Computes similarity feature vectors for a scene.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use comove_cli::{
    init_logging, or_exit, read_game_signal_files, read_location_file, read_signal_file,
    MINIMUM_SIGNAL_AVERAGE, MISSING_SIGNAL_READING,
};
use comove_core::array2d::Array2;
use comove_core::scene::{GameSceneData, SceneType};
use comove_core::{
    Algorithm, ArchiveFormat, DataSource, FeatureComputation, FeatureParameters, Result,
    SceneManifest, TracingData,
};

/// Compute similarity feature vectors for every device pair of a scene.
#[derive(Parser, Debug)]
#[command(name = "produce-features")]
struct Args {
    /// A scene manifest describing the experiment.
    #[arg(long, value_name = "PATH")]
    input: PathBuf,

    /// Output file.
    #[arg(long, value_name = "PATH")]
    output: PathBuf,

    /// Output format: json, compact-json or binary.
    /// (eval-dtw always writes plain text.)
    #[arg(long = "output-type", value_name = "TYPE", default_value = "json")]
    output_type: String,

    /// Smooth the input with a moving average of this window size,
    /// in seconds. 0 disables smoothing.
    #[arg(long, value_name = "SECONDS", default_value_t = 0)]
    smooth: usize,

    /// Similarity algorithm: dtw, multi-dtw, euclid, or the eval-dtw
    /// pseudo algorithm that emits warp path frequencies.
    #[arg(long, value_name = "NAME", default_value = "dtw")]
    algorithm: String,

    /// Window size in seconds. Must be greater than zero.
    #[arg(long = "window-size", value_name = "SECONDS", default_value_t = 15)]
    window_size: usize,

    /// Time lag in seconds. Must not be negative.
    #[arg(long = "time-lag", value_name = "SECONDS", default_value_t = 7)]
    time_lag: usize,

    /// Number of worker threads; 0 picks the number of logical CPUs.
    #[arg(long, value_name = "NUMBER", default_value_t = 0)]
    threads: usize,

    /// Keep devices that are not mentioned in the target list.
    /// Only used for performance evaluation.
    #[arg(long = "disable-target-filter")]
    disable_target_filter: bool,

    /// Limit the number of devices. Used for performance evaluation.
    #[arg(long = "limit-targets", value_name = "NUMBER")]
    limit_targets: Option<usize>,

    /// Verbose output.
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let manifest = or_exit(SceneManifest::load(&args.input), "failed to read manifest");
    let (mut trace, pairs) = or_exit(load_scene(&manifest, &args), "failed to load scene data");

    if args.smooth != 0 {
        info!(window = args.smooth, "smoothing input data");
        or_exit(trace.moving_average(args.smooth), "failed to smooth input");
    }

    let computation = FeatureComputation {
        time_lag: args.time_lag,
        window_size: args.window_size,
        threads: if args.threads != 0 {
            args.threads
        } else {
            std::thread::available_parallelism().map_or(1, |n| n.get())
        },
        begin_timestamp: manifest.start,
        end_timestamp: manifest.end,
    };

    info!(
        source = %manifest.data_type,
        begin = computation.begin_timestamp,
        end = computation.end_timestamp,
        devices = trace.devices.len(),
        pairs = pairs.len(),
        dimension = trace.data_dimension,
        "data attributes"
    );
    info!(
        time_lag = computation.time_lag,
        window_size = computation.window_size,
        threads = computation.threads,
        algorithm = %args.algorithm,
        "computation parameters"
    );

    if args.algorithm == "eval-dtw" {
        let frequencies = or_exit(
            computation.evaluate_warp_paths(&trace, &pairs),
            "dtw evaluation failed",
        );
        or_exit(
            write_frequencies(&args.output, &frequencies).map_err(Into::into),
            "failed to write output file",
        );
        return;
    }

    let algorithm: Algorithm = or_exit(args.algorithm.parse(), "invalid algorithm");
    let format: ArchiveFormat = or_exit(args.output_type.parse(), "invalid output type");

    let result = or_exit(
        match algorithm {
            Algorithm::Dtw => computation.compute_dtw(&trace, &pairs),
            Algorithm::MultiDtw => computation.compute_multi_dtw(&trace, &pairs),
            Algorithm::Euclid => computation.compute_euclid(&trace, &pairs),
        },
        "feature computation failed",
    );

    let params = FeatureParameters {
        data_source: manifest.data_type,
        algorithm,
        window_size: args.window_size,
        time_lag: args.time_lag,
    };
    or_exit(
        comove_core::archive::save_feature_file(&args.output, format, &result, &params),
        "failed to write feature file",
    );
    info!(output = %args.output.display(), "feature file written");
}

/// Reads the measurement data named by the manifest and selects the
/// device pairs to compute.
fn load_scene(
    manifest: &SceneManifest,
    args: &Args,
) -> Result<(TracingData, Vec<(usize, usize)>)> {
    let mut trace = match (manifest.scene_type, manifest.data_type) {
        (SceneType::Plain, DataSource::Signal) => read_signal_file(
            &manifest.plain_data()?.data_file,
            MINIMUM_SIGNAL_AVERAGE,
            MISSING_SIGNAL_READING,
        )?,
        (SceneType::Plain, DataSource::Location) => {
            read_location_file(&manifest.plain_data()?.data_file)?
        }
        (SceneType::Game, DataSource::Signal) => {
            read_game_signal_files(manifest, MINIMUM_SIGNAL_AVERAGE, MISSING_SIGNAL_READING)?
        }
        (SceneType::Game, DataSource::Location) => {
            let game = manifest.game_data()?;
            let location_file = game.location_file.as_ref().ok_or_else(|| {
                comove_core::Error::MalformedInput("no location file specified".into())
            })?;
            read_location_file(location_file)?
        }
    };

    clean_devices(&mut trace, manifest, args);

    let pairs = match manifest.scene_type {
        SceneType::Plain => trace.unique_pairs(),
        SceneType::Game => game_pairs(&trace, manifest.game_data()?),
    };
    Ok((trace, pairs))
}

/// Removes devices that are not part of the experiment.
fn clean_devices(trace: &mut TracingData, manifest: &SceneManifest, args: &Args) {
    if args.disable_target_filter {
        info!("not filtering devices based on the list of targets");
    } else {
        let before = trace.devices.len();
        trace.retain_devices(|name| manifest.targets.iter().any(|t| t == name));
        let removed = before - trace.devices.len();
        if removed > 0 {
            info!(removed, "removed devices that are not listed as targets");
        }
    }

    if let Some(limit) = args.limit_targets {
        if trace.devices.len() > limit {
            trace.devices.truncate(limit);
            info!(limit, "limited the number of devices");
        }
    }
}

/// The game data only supports pairs of one evader and one follower.
fn game_pairs(trace: &TracingData, game: &GameSceneData) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    for (i, left) in trace.devices.iter().enumerate() {
        if !game.is_evader(&left.name) {
            continue;
        }
        for (j, right) in trace.devices.iter().enumerate() {
            if !game.is_evader(&right.name) {
                pairs.push((i, j));
            }
        }
    }
    pairs
}

/// Writes the warp-path frequency matrix as fixed-precision plain text.
fn write_frequencies(path: &PathBuf, frequencies: &Array2<f64>) -> std::io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for row in 0..frequencies.rows() {
        for column in 0..frequencies.columns() {
            if column != 0 {
                write!(out, " ")?;
            }
            write!(out, "{:.4}", frequencies.cell(row, column))?;
        }
        writeln!(out)?;
    }
    out.flush()
}
