//! Converts scene ground truth into an archived ground truth file.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use comove_cli::{init_logging, or_exit, read_game_ground_truth, read_ground_truth_file};
use comove_core::archive::save_ground_truth_file;
use comove_core::scene::SceneType;
use comove_core::{ArchiveFormat, Error, SceneManifest};

/// Produce a ground truth file from a scene manifest.
#[derive(Parser, Debug)]
#[command(name = "produce-ground-truth")]
struct Args {
    /// A scene manifest.
    #[arg(long, value_name = "PATH")]
    input: PathBuf,

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

    let format: ArchiveFormat = or_exit(args.output_type.parse(), "invalid output type");
    let manifest = or_exit(SceneManifest::load(&args.input), "failed to read manifest");

    let gt = match manifest.scene_type {
        SceneType::Plain => {
            let plain = or_exit(manifest.plain_data(), "invalid scene");
            let path = or_exit(
                plain
                    .ground_truth_file
                    .clone()
                    .ok_or_else(|| Error::MalformedInput("no ground truth file specified".into())),
                "invalid scene",
            );
            or_exit(read_ground_truth_file(&path), "failed to read ground truth")
        }
        SceneType::Game => or_exit(
            read_game_ground_truth(&manifest),
            "failed to read game ground truth",
        ),
    };

    or_exit(
        save_ground_truth_file(&args.output, format, &gt),
        "failed to write ground truth file",
    );
    info!(output = %args.output.display(), "ground truth written");
}
