use std::io;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Invalid scan configuration. Always fatal, reported before any I/O.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("block size must be at least 1 byte, got {0}")]
    InvalidBlockSize(usize),

    #[error("unknown hash algorithm '{0}' (expected md5, sha1 or blake3)")]
    UnknownHashAlgorithm(String),

    #[error("invalid file name mask: {0}")]
    InvalidMask(#[from] regex::Error),

    #[error("no directories to scan")]
    NoScanPaths,

    #[error("thread count must be at least 1")]
    InvalidThreadCount,

    #[error("open file limit must be at least 1")]
    InvalidOpenFileLimit,

    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    ParseFile {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Failure affecting a single candidate file. Never fatal to the run.
#[derive(Debug, Error)]
pub enum CandidateError {
    #[error("failed to open '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read '{path}' at offset {offset}: {source}")]
    Read {
        path: PathBuf,
        offset: u64,
        #[source]
        source: io::Error,
    },
}

impl CandidateError {
    pub fn path(&self) -> &PathBuf {
        match self {
            CandidateError::Open { path, .. } | CandidateError::Read { path, .. } => path,
        }
    }

    /// Whether the failure came from running out of file descriptors rather
    /// than from the file itself.
    pub fn is_descriptor_exhaustion(&self) -> bool {
        match self {
            CandidateError::Open { source, .. } | CandidateError::Read { source, .. } => {
                crate::reader::is_descriptor_exhaustion(source)
            }
        }
    }
}

/// Errors that stop a scan as a whole.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan interrupted")]
    Interrupted,

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A file left out of the comparison, with the reason it was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

impl From<&CandidateError> for SkippedFile {
    fn from(err: &CandidateError) -> Self {
        let reason = match err {
            CandidateError::Open { source, .. } => format!("open failed: {source}"),
            CandidateError::Read { offset, source, .. } => {
                format!("read failed at offset {offset}: {source}")
            }
        };
        SkippedFile {
            path: err.path().clone(),
            reason,
        }
    }
}
