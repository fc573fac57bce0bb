//! Error taxonomy shared by every stage of a sync run.
//!
//! Functions return `anyhow::Result`; the variants below are attached as the
//! root cause so callers can classify a failure with
//! [`StockpileError::kind_of`] without matching on message text.

use std::path::PathBuf;

/// Classified failures raised by the core.
#[derive(Debug)]
pub enum StockpileError {
    /// Bad input shape or value, detected before any I/O.
    Validation(String),
    /// A referenced repository config file or directory is absent.
    NotFound(PathBuf),
    /// A path is occupied by an entity of the wrong kind.
    Conflict(PathBuf),
    /// Directory creation or link manipulation failed.
    Filesystem { path: PathBuf, message: String },
    /// One or more packages could not be retrieved.
    Download { repo: String, message: String },
}

/// Discriminant of [`StockpileError`], convenient for assertions and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Filesystem,
    Download,
}

impl StockpileError {
    pub fn validation(message: impl Into<String>) -> Self {
        StockpileError::Validation(message.into())
    }

    pub fn filesystem(path: impl Into<PathBuf>, source: impl std::fmt::Display) -> Self {
        StockpileError::Filesystem {
            path: path.into(),
            message: source.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StockpileError::Validation(_) => ErrorKind::Validation,
            StockpileError::NotFound(_) => ErrorKind::NotFound,
            StockpileError::Conflict(_) => ErrorKind::Conflict,
            StockpileError::Filesystem { .. } => ErrorKind::Filesystem,
            StockpileError::Download { .. } => ErrorKind::Download,
        }
    }

    /// Find the first classified error anywhere in an `anyhow` chain.
    pub fn kind_of(err: &anyhow::Error) -> Option<ErrorKind> {
        err.chain()
            .find_map(|cause| cause.downcast_ref::<StockpileError>())
            .map(StockpileError::kind)
    }
}

impl std::fmt::Display for StockpileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StockpileError::Validation(msg) => write!(f, "Invalid input: {}", msg),
            StockpileError::NotFound(path) => {
                write!(f, "No such file or directory: {}", path.display())
            }
            StockpileError::Conflict(path) => {
                write!(f, "{} exists and is not a symlink", path.display())
            }
            StockpileError::Filesystem { path, message } => {
                write!(f, "Filesystem error at {}: {}", path.display(), message)
            }
            StockpileError::Download { repo, message } => {
                write!(f, "Download failed for repository {}: {}", repo, message)
            }
        }
    }
}

impl std::error::Error for StockpileError {}
