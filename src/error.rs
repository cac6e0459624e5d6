//! Typed error classes carried inside [`color_eyre::eyre::Report`].
//!
//! Library functions return `Result<T, Report>`. When a failure belongs to one of
//! the classes below, the [`Error`] travels inside the report, as its root or as
//! context, and callers recover it with [`find_error`].

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Invalid combination of datasets, ranks, classifiers or parameters.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Input data does not agree with itself (k-mer lengths, label columns, missing records).
    #[error("Data consistency error: {0}")]
    DataConsistency(String),

    /// Reading, writing or producing an artifact failed.
    #[error("Artifact I/O error on {path:?}: {source}")]
    ArtifactIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A classifier failed to fit or predict.
    #[error("Classifier error at rank '{rank}': {message}")]
    Classifier { rank: String, message: String },
}

impl Error {
    /// Shorthand for an [`Error::ArtifactIo`] built from any message.
    pub fn artifact_io(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::ArtifactIo {
            path: path.into(),
            source: std::io::Error::new(std::io::ErrorKind::Other, message.into()),
        }
    }
}

/// Returns the outermost [`Error`] of a report, as context or in its chain of causes.
pub fn find_error(report: &color_eyre::eyre::Report) -> Option<&Error> {
    report.downcast_ref::<Error>().or_else(|| report.chain().find_map(|e| e.downcast_ref::<Error>()))
}
