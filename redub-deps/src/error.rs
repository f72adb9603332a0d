use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the auto-installer.
#[derive(Debug, Error)]
pub enum InstallError {
    /// Automatic installation is only implemented for Windows.
    #[error("automatic dependency install currently supports Windows only")]
    UnsupportedPlatform,

    /// The dependency id is not covered by the package catalog.
    #[error("dependency {0:?} does not support automatic install")]
    UnsupportedDependency(String),

    /// An HTTP request failed (network error, unexpected status, …).
    #[error("download failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-200 status.
    #[error("download {url}: unexpected status {status}")]
    UnexpectedStatus { url: String, status: u16 },

    /// A filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The downloaded bytes do not hash to the declared checksum.
    #[error("checksum mismatch for {package}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        package: String,
        expected: String,
        actual: String,
    },

    /// Failed to open or extract the downloaded archive.
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// The archive contained no files at all.
    #[error("zip archive is empty")]
    EmptyArchive,

    /// Declared executables that never appeared in the archive.
    #[error("archive missing executables for: {}", .0.join(", "))]
    MissingExecutables(Vec<String>),

    /// A package declaration is malformed.
    #[error("invalid package spec {package}: {message}")]
    InvalidPackage { package: String, message: String },

    /// The expected installed file is absent after extraction.
    #[error("expected installed file missing: {0}")]
    MissingTarget(PathBuf),
}
