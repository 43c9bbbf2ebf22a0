//! Co-movement detection from multi-device sensor traces.
//!
//! This library analyses WiFi signal-strength scans or geolocation fixes
//! of several devices and decides, per device pair and second, whether
//! the devices move together and who is leading whom. The pipeline:
//!
//! 1. **Normalisation**: sparse measurements become dense per-second
//!    matrices with an observed/imputed mask ([`trace`]).
//! 2. **Similarity features**: time-lagged similarity vectors per pair,
//!    computed in parallel ([`features`], [`metrics`]).
//! 3. **Co-moving classification**: a linear SVM trained on ground
//!    truth ([`classifier`], [`ground_truth`]).
//! 4. **Lag estimation**: co-moving pairs get a lag and a
//!    leading/following/co-leading type ([`following`]).
//! 5. **Graphs and leaders**: per-second following graphs, connected
//!    groups and PageRank leaders ([`graph`]).
//!
//! Every stage artifact can be archived as JSON or portable binary and
//! the pipeline can restart from any stage ([`archive`]).

pub mod archive;
pub mod array2d;
pub mod classifier;
pub mod error;
pub mod features;
pub mod following;
pub mod graph;
pub mod ground_truth;
pub mod location;
pub mod metrics;
pub mod parser;
pub mod scene;
pub mod signal;
pub mod trace;

// Re-export key types for convenience
pub use archive::{Algorithm, ArchiveFormat, FeatureParameters};
pub use classifier::CoMovingClassifier;
pub use error::{Error, Result};
pub use features::{FeatureComputation, SimilarityData};
pub use following::{classify, FollowingData, FollowingType, TimeLagEstimation};
pub use graph::{
    detect_groups, detect_leaders, detect_leaders_over_time, following_graph_at, FollowingGraph,
    LeaderData,
};
pub use ground_truth::GroundTruth;
pub use location::LocationData;
pub use scene::{DataSource, SceneManifest, SceneType};
pub use signal::SignalData;
pub use trace::TracingData;
