use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by the normalizer.
#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("source unreadable: {}: {reason}", path.display())]
    SourceUnreadable { path: PathBuf, reason: String },

    #[error("encode failure: {}: {reason}", path.display())]
    EncodeFailure { path: PathBuf, reason: String },

    #[error("media directory unavailable: {}: {source}", path.display())]
    DirectoryUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl NormalizeError {
    pub fn source_unreadable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::SourceUnreadable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn encode_failure(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::EncodeFailure {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Short stable label for logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceUnreadable { .. } => "source_unreadable",
            Self::EncodeFailure { .. } => "encode_failure",
            Self::DirectoryUnavailable { .. } => "directory_unavailable",
            Self::InvalidConfig { .. } => "invalid_config",
        }
    }

    /// The recording or directory the failure concerns.
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::SourceUnreadable { path, .. }
            | Self::EncodeFailure { path, .. }
            | Self::DirectoryUnavailable { path, .. } => Some(path.as_path()),
            Self::InvalidConfig { .. } => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, NormalizeError>;
