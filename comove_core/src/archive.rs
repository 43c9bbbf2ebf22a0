//! Artifact archives.
//!
//! Every pipeline artifact can be written in two interchangeable
//! framings: a JSON document (pretty or compact) and a portable binary
//! encoding. All archives carry the [`FeatureParameters`] of the data
//! they were derived from, and loaders re-check the structural
//! invariants the producers guarantee.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::classifier::CoMovingClassifier;
use crate::error::{Error, Result};
use crate::features::SimilarityData;
use crate::following::FollowingData;
use crate::graph::{deserialize_graph, serialize_graph, FollowingGraph, LeaderData, SerializedGraph};
use crate::ground_truth::GroundTruth;
use crate::scene::DataSource;

// ============================================================================
// FORMATS & PARAMETERS
// ============================================================================

/// On-disk representation of an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// Pretty-printed JSON; huge but human readable.
    Json,
    /// JSON without any formatting.
    CompactJson,
    /// Portable binary encoding; small and fast.
    Binary,
}

impl std::str::FromStr for ArchiveFormat {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "json" => Ok(ArchiveFormat::Json),
            "compact-json" => Ok(ArchiveFormat::CompactJson),
            "binary" => Ok(ArchiveFormat::Binary),
            other => Err(Error::InvalidParameters(format!(
                "unsupported archive format: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchiveFormat::Json => write!(f, "json"),
            ArchiveFormat::CompactJson => write!(f, "compact-json"),
            ArchiveFormat::Binary => write!(f, "binary"),
        }
    }
}

/// The similarity algorithm that produced a feature archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    Euclid,
    Dtw,
    MultiDtw,
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Algorithm::Euclid => write!(f, "euclid"),
            Algorithm::Dtw => write!(f, "dtw"),
            Algorithm::MultiDtw => write!(f, "multi-dtw"),
        }
    }
}

impl std::str::FromStr for Algorithm {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "euclid" => Ok(Algorithm::Euclid),
            "dtw" => Ok(Algorithm::Dtw),
            "multi-dtw" => Ok(Algorithm::MultiDtw),
            other => Err(Error::InvalidParameters(format!(
                "unsupported algorithm: {other}"
            ))),
        }
    }
}

/// Parameters of the computation an artifact was derived from.
///
/// They travel with every archive so that downstream stages can refuse
/// inputs computed under different settings; a classifier trained on
/// signal data makes little to no predictions about location features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureParameters {
    pub data_source: DataSource,
    pub algorithm: Algorithm,
    pub window_size: usize,
    pub time_lag: usize,
}

impl FeatureParameters {
    /// Fails unless `other` (read from the archive named by `context`)
    /// matches these parameters exactly.
    pub fn ensure_matches(&self, other: &FeatureParameters, context: &str) -> Result<()> {
        let mismatch = |detail: String| Error::ParameterMismatch {
            context: context.to_string(),
            detail,
        };

        if self.data_source != other.data_source {
            return Err(mismatch(format!(
                "uses a different data source ({})",
                other.data_source
            )));
        }
        if self.algorithm != other.algorithm {
            return Err(mismatch(format!(
                "uses a different algorithm ({})",
                other.algorithm
            )));
        }
        if self.window_size != other.window_size {
            return Err(mismatch(format!(
                "uses a different window size ({})",
                other.window_size
            )));
        }
        if self.time_lag != other.time_lag {
            return Err(mismatch(format!(
                "uses a different time lag ({})",
                other.time_lag
            )));
        }
        Ok(())
    }
}

// ============================================================================
// BINARY BLOBS
// ============================================================================

/// An opaque byte string, base64-encoded inside human-readable framings
/// and length-prefixed inside the binary framing. Both framings carry
/// the exact same bytes, so blobs survive cross-framing conversions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BinaryBlob(pub Vec<u8>);

impl Serialize for BinaryBlob {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&BASE64.encode(&self.0))
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for BinaryBlob {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let text = String::deserialize(deserializer)?;
            BASE64
                .decode(text.as_bytes())
                .map(BinaryBlob)
                .map_err(serde::de::Error::custom)
        } else {
            Vec::<u8>::deserialize(deserializer).map(BinaryBlob)
        }
    }
}

// ============================================================================
// GENERIC READ / WRITE
// ============================================================================

fn write_archive<T: Serialize>(path: &Path, format: ArchiveFormat, value: &T) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    match format {
        ArchiveFormat::Json => serde_json::to_writer_pretty(&mut writer, value)?,
        ArchiveFormat::CompactJson => serde_json::to_writer(&mut writer, value)?,
        ArchiveFormat::Binary => {
            let bytes = postcard::to_allocvec(value)?;
            writer.write_all(&bytes)?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn read_archive<T: DeserializeOwned>(path: &Path, format: ArchiveFormat) -> Result<T> {
    match format {
        // Pretty and compact JSON parse the same way.
        ArchiveFormat::Json | ArchiveFormat::CompactJson => {
            let file = File::open(path)?;
            Ok(serde_json::from_reader(BufReader::new(file))?)
        }
        ArchiveFormat::Binary => {
            let bytes = std::fs::read(path)?;
            Ok(postcard::from_bytes(&bytes)?)
        }
    }
}

// ============================================================================
// ARTIFACT FILES
// ============================================================================

#[derive(Serialize)]
struct FeatureFileRef<'a> {
    params: &'a FeatureParameters,
    feature_data: &'a SimilarityData,
}

#[derive(Deserialize)]
struct FeatureFile {
    params: FeatureParameters,
    feature_data: SimilarityData,
}

pub fn save_feature_file(
    path: impl AsRef<Path>,
    format: ArchiveFormat,
    data: &SimilarityData,
    params: &FeatureParameters,
) -> Result<()> {
    write_archive(
        path.as_ref(),
        format,
        &FeatureFileRef {
            params,
            feature_data: data,
        },
    )
}

pub fn load_feature_file(
    path: impl AsRef<Path>,
    format: ArchiveFormat,
) -> Result<(SimilarityData, FeatureParameters)> {
    let file: FeatureFile = read_archive(path.as_ref(), format)?;
    file.feature_data.validate()?;
    if file.feature_data.feature_dimension != file.params.time_lag * 2 + 1 {
        return Err(Error::Range(format!(
            "feature dimension {} does not match time lag {}",
            file.feature_data.feature_dimension, file.params.time_lag
        )));
    }
    Ok((file.feature_data, file.params))
}

#[derive(Serialize, Deserialize)]
struct ClassifierFile {
    params: FeatureParameters,
    classifier: BinaryBlob,
}

pub fn save_classifier_file(
    path: impl AsRef<Path>,
    format: ArchiveFormat,
    classifier: &CoMovingClassifier,
    params: &FeatureParameters,
) -> Result<()> {
    write_archive(
        path.as_ref(),
        format,
        &ClassifierFile {
            params: *params,
            classifier: BinaryBlob(classifier.to_bytes()?),
        },
    )
}

pub fn load_classifier_file(
    path: impl AsRef<Path>,
    format: ArchiveFormat,
) -> Result<(CoMovingClassifier, FeatureParameters)> {
    let file: ClassifierFile = read_archive(path.as_ref(), format)?;
    let classifier = CoMovingClassifier::from_bytes(&file.classifier.0)?;
    Ok((classifier, file.params))
}

#[derive(Serialize)]
struct FollowerFileRef<'a> {
    params: &'a FeatureParameters,
    followers: &'a FollowingData,
}

#[derive(Deserialize)]
struct FollowerFile {
    params: FeatureParameters,
    followers: FollowingData,
}

pub fn save_follower_file(
    path: impl AsRef<Path>,
    format: ArchiveFormat,
    followers: &FollowingData,
    params: &FeatureParameters,
) -> Result<()> {
    write_archive(path.as_ref(), format, &FollowerFileRef { params, followers })
}

pub fn load_follower_file(
    path: impl AsRef<Path>,
    format: ArchiveFormat,
) -> Result<(FollowingData, FeatureParameters)> {
    let file: FollowerFile = read_archive(path.as_ref(), format)?;
    file.followers.validate()?;
    Ok((file.followers, file.params))
}

#[derive(Serialize)]
struct LeaderFileRef<'a> {
    params: &'a FeatureParameters,
    leader_data: &'a LeaderData,
}

#[derive(Deserialize)]
struct LeaderFile {
    params: FeatureParameters,
    leader_data: LeaderData,
}

pub fn save_leader_file(
    path: impl AsRef<Path>,
    format: ArchiveFormat,
    leaders: &LeaderData,
    params: &FeatureParameters,
) -> Result<()> {
    write_archive(
        path.as_ref(),
        format,
        &LeaderFileRef {
            params,
            leader_data: leaders,
        },
    )
}

pub fn load_leader_file(
    path: impl AsRef<Path>,
    format: ArchiveFormat,
) -> Result<(LeaderData, FeatureParameters)> {
    let file: LeaderFile = read_archive(path.as_ref(), format)?;
    file.leader_data.validate()?;
    Ok((file.leader_data, file.params))
}

#[derive(Serialize)]
struct GroundTruthFileRef<'a> {
    ground_truth: &'a GroundTruth,
}

#[derive(Deserialize)]
struct GroundTruthFile {
    ground_truth: GroundTruth,
}

pub fn save_ground_truth_file(
    path: impl AsRef<Path>,
    format: ArchiveFormat,
    gt: &GroundTruth,
) -> Result<()> {
    write_archive(path.as_ref(), format, &GroundTruthFileRef { ground_truth: gt })
}

pub fn load_ground_truth_file(path: impl AsRef<Path>, format: ArchiveFormat) -> Result<GroundTruth> {
    let file: GroundTruthFile = read_archive(path.as_ref(), format)?;
    Ok(file.ground_truth)
}

#[derive(Serialize, Deserialize)]
struct GraphFile {
    graph: SerializedGraph,
}

pub fn save_graph_file(
    path: impl AsRef<Path>,
    format: ArchiveFormat,
    graph: &FollowingGraph,
) -> Result<()> {
    write_archive(
        path.as_ref(),
        format,
        &GraphFile {
            graph: serialize_graph(graph),
        },
    )
}

pub fn load_graph_file(path: impl AsRef<Path>, format: ArchiveFormat) -> Result<FollowingGraph> {
    let file: GraphFile = read_archive(path.as_ref(), format)?;
    deserialize_graph(&file.graph)
}
