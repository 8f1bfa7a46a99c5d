use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::hashes::HashMismatch;

/// One entry that could not be copied during a source tree copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyFailure {
    pub path: PathBuf,
    pub cause: String,
}

impl fmt::Display for CopyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.cause)
    }
}

fn join_failures(failures: &[CopyFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug, Clone)]
pub enum SpfError {
    #[error("I/O Error: {0}")]
    Io(#[from] Arc<std::io::Error>),

    #[error("HTTP Request Error: {0}")]
    Http(#[from] Arc<reqwest::Error>),

    #[error("JSON Parsing Error: {0}")]
    Json(#[from] Arc<serde_json::Error>),

    #[error("URL Parsing Error for '{0}': {1}")]
    Url(String, url::ParseError),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("HTTP error {status} for URL {url}")]
    HttpStatus { url: String, status: u16 },

    #[error(transparent)]
    HashMismatch(#[from] HashMismatch),

    #[error("Failed to copy {} file(s): {}", .0.len(), join_failures(.0))]
    CopyTree(Vec<CopyFailure>),

    #[error("Invalid location '{url}': {reason}")]
    InvalidLocation { url: String, reason: String },

    #[error("Unsupported locator '{0}': only file, http and https sources can be fetched")]
    UnsupportedLocator(String),

    #[error("Refusing to use insecure origin '{0}'")]
    InsecureOrigin(String),

    #[error("Keyring Error: {0}")]
    Keyring(String),

    #[error("Unsupported archive format for {}: {reason}", .path.display())]
    UnsupportedArchive { path: PathBuf, reason: String },

    #[error("Extraction Error: {0}")]
    Extraction(String),

    #[error("IoError: {0}")]
    IoError(String),

    #[error("Generic Error: {0}")]
    Generic(String),
}

impl From<std::io::Error> for SpfError {
    fn from(err: std::io::Error) -> Self {
        SpfError::Io(Arc::new(err))
    }
}

impl From<reqwest::Error> for SpfError {
    fn from(err: reqwest::Error) -> Self {
        SpfError::Http(Arc::new(err))
    }
}

impl From<serde_json::Error> for SpfError {
    fn from(err: serde_json::Error) -> Self {
        SpfError::Json(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, SpfError>;
