//! Exports the groups and their leaders at a single timestamp.

use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;
use tracing::info;

use comove_cli::{init_logging, or_exit};
use comove_core::archive::load_follower_file;
use comove_core::{
    detect_groups, detect_leaders, following_graph_at, ArchiveFormat, Error, FollowingGraph,
    Result,
};

/// Export the detected groups of one timestamp as JSON.
#[derive(Parser, Debug)]
#[command(name = "group-eval")]
struct Args {
    /// A follower file produced by detect-followers.
    #[arg(long, value_name = "PATH")]
    input: PathBuf,

    /// Format of the follower file: json or binary.
    #[arg(long = "input-type", value_name = "TYPE", default_value = "json")]
    input_type: String,

    /// Use the follower data at this timestamp to generate the
    /// following graph. Interpreted as relative to the beginning of the
    /// follower data (0 -> first second) unless --absolute is given.
    #[arg(long, value_name = "TIMESTAMP")]
    at: i64,

    /// Interpret the timestamp given for --at as absolute.
    #[arg(long)]
    absolute: bool,

    /// The detected groups are written to this file.
    #[arg(long, value_name = "PATH")]
    output: PathBuf,

    /// Verbose output.
    #[arg(short, long)]
    verbose: bool,
}

/// One member of a detected group and the devices it follows.
#[derive(Debug, Serialize)]
struct GroupMember {
    name: String,
    follows: Vec<String>,
}

/// A detected group: its members and its PageRank leader.
#[derive(Debug, Serialize)]
struct Group {
    leader: String,
    members: Vec<GroupMember>,
}

#[derive(Serialize)]
struct GroupReport {
    groups: Vec<Group>,
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let input_format: ArchiveFormat = or_exit(args.input_type.parse(), "invalid input type");
    let (followers, params) = or_exit(
        load_follower_file(&args.input, input_format),
        "failed to read follower file",
    );

    let timestamp = if args.absolute {
        args.at
    } else {
        followers.begin_timestamp + args.at
    };
    info!(
        source = %args.input.display(),
        data_source = %params.data_source,
        algorithm = %params.algorithm,
        devices = followers.devices.len(),
        timestamp,
        "detecting groups"
    );

    let graph = or_exit(
        following_graph_at(&followers, timestamp),
        "failed to build the following graph",
    );
    let groups = or_exit(collect_groups(&graph), "group detection failed");

    or_exit(
        write_report(&args.output, &GroupReport { groups }),
        "failed to write group file",
    );
    info!(output = %args.output.display(), "group file written");
}

/// Runs group and leader detection over the graph and assembles the
/// report entries.
fn collect_groups(graph: &FollowingGraph) -> Result<Vec<Group>> {
    let followed_devices = |name: &str| -> Result<Vec<String>> {
        let vertex = graph
            .node_indices()
            .find(|&v| graph[v] == name)
            .ok_or_else(|| Error::Range(format!("no vertex for name {name}")))?;
        Ok(graph.neighbors(vertex).map(|t| graph[t].clone()).collect())
    };

    let mut groups = Vec::new();
    for member_names in detect_groups(graph) {
        let mut members = Vec::with_capacity(member_names.len());
        for name in member_names {
            let follows = followed_devices(&name)?;
            members.push(GroupMember { name, follows });
        }
        groups.push(Group {
            leader: String::new(),
            members,
        });
    }

    for leader in detect_leaders(graph, true) {
        let group = groups
            .iter_mut()
            .find(|group| group.members.iter().any(|m| m.name == leader))
            .ok_or_else(|| Error::Range(format!("no group for leader {leader}")))?;
        group.leader = leader;
    }

    Ok(groups)
}

fn write_report(path: &PathBuf, report: &GroupReport) -> Result<()> {
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(file, report)?;
    Ok(())
}
