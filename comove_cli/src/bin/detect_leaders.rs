//! Detects per-timestamp group leaders from following data.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use comove_cli::{init_logging, or_exit};
use comove_core::archive::{load_follower_file, save_leader_file};
use comove_core::{detect_leaders_over_time, ArchiveFormat};

/// Detect group leaders for every timestamp.
#[derive(Parser, Debug)]
#[command(name = "detect-leaders")]
struct Args {
    /// A follower file produced by detect-followers.
    #[arg(long, value_name = "PATH")]
    input: PathBuf,

    /// Format of the follower file: json or binary.
    #[arg(long = "input-type", value_name = "TYPE", default_value = "json")]
    input_type: String,

    /// Output file.
    #[arg(long, value_name = "PATH")]
    output: PathBuf,

    /// Output format: json, compact-json or binary.
    #[arg(long = "output-type", value_name = "TYPE", default_value = "json")]
    output_type: String,

    /// Weight edges by the estimated lag instead of treating all edges
    /// equally.
    #[arg(long = "use-weights")]
    use_weights: bool,

    /// Verbose output.
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let input_format: ArchiveFormat = or_exit(args.input_type.parse(), "invalid input type");
    let output_format: ArchiveFormat = or_exit(args.output_type.parse(), "invalid output type");

    let (followers, params) = or_exit(
        load_follower_file(&args.input, input_format),
        "failed to read follower file",
    );
    info!(
        source = %args.input.display(),
        data_source = %params.data_source,
        algorithm = %params.algorithm,
        use_weights = args.use_weights,
        duration = followers.duration,
        "detecting leaders"
    );

    let leaders = or_exit(
        detect_leaders_over_time(&followers, args.use_weights),
        "leader detection failed",
    );

    or_exit(
        save_leader_file(&args.output, output_format, &leaders, &params),
        "failed to write leader file",
    );
    info!(output = %args.output.display(), "leader file written");
}
