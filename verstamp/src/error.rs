//! Error types for stamping and image parsing.

use std::path::PathBuf;

/// Structural problems found while reading or laying out a PE image.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    /// A read ran past the end of the image.
    #[error("truncated image: needed {len} bytes at offset {offset:#x}")]
    Truncated {
        /// Offset of the attempted read.
        offset: usize,
        /// Number of bytes requested.
        len: usize,
    },
    /// A header field or resource structure holds an impossible value.
    #[error("{0}")]
    Malformed(String),
    /// The image has no space left for the rewritten resources.
    #[error("no room for resources: {0}")]
    NoRoom(String),
}

/// Errors produced by [`crate::stamp`] and [`crate::read_version_info`].
#[derive(Debug, thiserror::Error)]
pub enum StampError {
    /// The binary does not exist.
    #[error("file not found: {}", path.display())]
    FileNotFound {
        /// Path that was requested.
        path: PathBuf,
    },
    /// The binary is held open by another process or is read-only.
    #[error("file is locked or read-only: {}", path.display())]
    FileLocked {
        /// Path that could not be opened for writing.
        path: PathBuf,
    },
    /// A version string is not four dot-separated 16-bit integers.
    #[error("malformed version '{value}': {reason}")]
    MalformedVersion {
        /// The rejected input.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
    /// The file is not a PE image this crate can rewrite.
    #[error("invalid PE image {}: {source}", path.display())]
    InvalidImage {
        /// Path of the image.
        path: PathBuf,
        /// Underlying structural problem.
        #[source]
        source: ImageError,
    },
    /// Writing the updated resources back failed. The original file is unchanged.
    #[error("failed to write resources to {}: {reason}", path.display())]
    ResourceWrite {
        /// Path of the image.
        path: PathBuf,
        /// Human-readable cause.
        reason: String,
    },
}

impl StampError {
    /// Short stable label for the error kind, used in CLI diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FileNotFound { .. } => "file_not_found",
            Self::FileLocked { .. } => "file_locked",
            Self::MalformedVersion { .. } => "malformed_version",
            Self::InvalidImage { .. } => "invalid_image",
            Self::ResourceWrite { .. } => "resource_write",
        }
    }

    pub(crate) fn malformed(value: &str, reason: impl Into<String>) -> Self {
        Self::MalformedVersion {
            value: value.to_owned(),
            reason: reason.into(),
        }
    }
}
