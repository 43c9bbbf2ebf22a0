//! Error kinds shared by every pipeline stage.

/// Errors surfaced by parsers, archives and pipeline drivers.
///
/// Math kernels never return errors for valid inputs; invalid kernel
/// inputs are caller bugs and are guarded by assertions instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Artifact parameters differ from the driver's configuration.
    #[error("parameter mismatch in \"{context}\": {detail}")]
    ParameterMismatch { context: String, detail: String },

    /// Invalid stage parameters (window size, time lag, thread count, range).
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// Timestamp, device index or vector length out of bounds.
    #[error("out of range: {0}")]
    Range(String),

    /// No devices, no access points or no measurements.
    #[error("empty input: {0}")]
    EmptyInput(&'static str),

    /// Classifier was serialized with an incompatible layout.
    #[error("serialized classifier has incorrect version {found}, version must be {expected}")]
    VersionMismatch { found: u32, expected: u32 },

    /// Unexpected token or shape in a parsed file.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// A serialized graph references a vertex id not in its own vertex list.
    #[error("graph invariant violated: {0}")]
    GraphInvariant(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("binary codec error: {0}")]
    Binary(#[from] postcard::Error),

    /// The similarity worker pool could not be constructed.
    #[error("thread pool error: {0}")]
    ThreadPool(String),
}

pub type Result<T> = std::result::Result<T, Error>;
