//! Error taxonomy shared by every public operation of the core.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced to callers of the forensic core.
///
/// Low-level parsers work with `anyhow` internally and are mapped into one of
/// these variants at the trait boundary.
#[derive(Debug, Error)]
pub enum ForensicsError {
    /// The image could not be opened or is not a supported container. Fatal.
    #[error("cannot open image {path}: {reason}")]
    ImageOpen { path: PathBuf, reason: String },

    /// No walkable file system at the requested offset.
    #[error("no usable file system at offset {offset}: {reason}")]
    FileSystemOpen { offset: u64, reason: String },

    /// A read against an image failed. Callers skip the affected unit.
    #[error("read failed at offset {offset}: {reason}")]
    Read { offset: u64, reason: String },

    #[error("unsupported hash algorithm: {0}")]
    HashAlgorithmUnsupported(String),

    /// Hash store failure.
    #[error("hash store error: {0}")]
    Persistence(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for ForensicsError {
    fn from(err: rusqlite::Error) -> Self {
        ForensicsError::Persistence(err.to_string())
    }
}

impl ForensicsError {
    pub(crate) fn read(offset: u64, reason: impl std::fmt::Display) -> Self {
        ForensicsError::Read {
            offset,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn image_open(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        ForensicsError::ImageOpen {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// True for errors that abort the whole operation rather than one unit of it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ForensicsError::ImageOpen { .. } | ForensicsError::FileSystemOpen { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ForensicsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(ForensicsError::image_open("/tmp/x.dd", "missing").is_fatal());
        assert!(!ForensicsError::read(512, "short").is_fatal());
        assert!(!ForensicsError::Persistence("locked".into()).is_fatal());
    }

    #[test]
    fn test_sqlite_errors_map_to_persistence() {
        let err: ForensicsError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, ForensicsError::Persistence(_)));
    }
}
