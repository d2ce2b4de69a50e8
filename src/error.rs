// Error taxonomy shared by the intake and the change-report filter

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the monthly commands report to the operator.
///
/// None of these are retried. The operator fixes the cause and re-runs,
/// which is safe because every write is an overwrite.
#[derive(Debug, Error)]
pub enum Error {
    /// A required input file is absent from the input directory
    #[error("no input found: nothing matching `{pattern}` in {}", .dir.display())]
    NoInputFound { pattern: String, dir: PathBuf },

    /// The archive does not hold exactly one member for a marker
    #[error(
        "archive {} has {} member(s) for `{marker}`, expected exactly one{}",
        .archive.display(),
        .matches.len(),
        list_matches(.matches)
    )]
    AmbiguousOrMissingEntry {
        marker: String,
        archive: PathBuf,
        matches: Vec<String>,
    },

    /// Input exists but cannot be used (missing column, corrupt archive, bad config)
    #[error("malformed input {}: {reason}", .path.display())]
    MalformedInput { path: PathBuf, reason: String },

    /// Filesystem read/write failure
    #[error("I/O failure on {}: {source}", .path.display())]
    IoFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn list_matches(matches: &[String]) -> String {
    if matches.is_empty() {
        String::new()
    } else {
        format!(" ({})", matches.join(", "))
    }
}

impl Error {
    /// Taxonomy label, stable across message wording changes
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NoInputFound { .. } => "NoInputFound",
            Error::AmbiguousOrMissingEntry { .. } => "AmbiguousOrMissingEntry",
            Error::MalformedInput { .. } => "MalformedInput",
            Error::IoFailure { .. } => "IOFailure",
        }
    }

    /// Process exit code for this kind of failure
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::NoInputFound { .. } => 2,
            Error::AmbiguousOrMissingEntry { .. } => 3,
            Error::MalformedInput { .. } => 4,
            Error::IoFailure { .. } => 5,
        }
    }

    pub(crate) fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Error::IoFailure {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub(crate) fn malformed(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Error::MalformedInput {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    pub(crate) fn from_csv(path: impl AsRef<Path>, err: csv::Error) -> Self {
        if err.is_io_error() {
            if let csv::ErrorKind::Io(source) = err.into_kind() {
                return Error::io(path, source);
            }
            return Error::malformed(path, "unreadable CSV");
        }
        Error::malformed(path, err.to_string())
    }

    pub(crate) fn from_zip(path: impl AsRef<Path>, err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(source) => Error::io(path, source),
            other => Error::malformed(path, other.to_string()),
        }
    }
}

/// First library error in an `anyhow` chain, if any
pub fn library_error(err: &anyhow::Error) -> Option<&Error> {
    err.chain().find_map(|cause| cause.downcast_ref::<Error>())
}

/// Map any error chain to an exit code (1 when no library error is inside)
pub fn exit_code(err: &anyhow::Error) -> u8 {
    library_error(err).map(Error::exit_code).unwrap_or(1)
}
