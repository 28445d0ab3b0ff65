use std::path::PathBuf;
use thiserror::Error;

/// Result type for registration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the registration drivers.
///
/// Configuration problems (`EngineNotFound`, preset errors) surface before
/// any subprocess is spawned. `Cancelled` and `ToolFailed` come out of a
/// running external process. I/O errors pass through unwrapped.
#[derive(Error, Debug)]
pub enum Error {
    /// Neither the custom directory nor any discovery candidate holds the
    /// elastix executable.
    #[error("elastix executable not found; searched: {searched}")]
    EngineNotFound { searched: String },

    #[error("failed to read preset database {path}: {reason}")]
    PresetDatabase { path: PathBuf, reason: String },

    #[error("invalid preset index {index} (catalog has {count} presets)")]
    PresetIndex { index: usize, count: usize },

    #[error("preset parameter file not found: {0}")]
    PresetFileMissing(PathBuf),

    #[error("preset contains no parameter files")]
    EmptyPreset,

    #[error("user requested cancel")]
    Cancelled,

    /// External tool exited nonzero without a cancel request. `output` holds
    /// the buffered process output when live logging was off.
    #[error("{tool} exited with status {status}")]
    ToolFailed {
        tool: String,
        status: i32,
        output: String,
    },

    #[error("no frame at item number {item} (sequence has {count} items)")]
    ItemOutOfRange { item: usize, count: usize },

    #[error("invalid frame range [{start}, {end}]")]
    InvalidRange { start: usize, end: usize },

    #[error("malformed MetaImage file {path}: {reason}")]
    Format { path: PathBuf, reason: String },

    #[error("transform is not invertible")]
    SingularTransform,

    #[error("failed to persist settings: {0}")]
    Settings(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Format {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
