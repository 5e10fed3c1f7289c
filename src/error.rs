use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the download and verify actions
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Missing or inconsistent configuration, raised before any I/O
    #[error("{0}")]
    Configuration(String),

    #[error("Invalid download source: {0}")]
    InvalidSource(String),

    #[error("Invalid download destination: {0}")]
    InvalidDestination(String),

    #[error("Invalid authentication scheme: '{0}'. Valid values are 'Basic' and 'Digest'.")]
    InvalidAuthScheme(String),

    #[error("Illegal value for 'useETag' flag: '{0}'")]
    InvalidETagPolicy(String),

    #[error("Unable to download file '{url}' in offline mode.")]
    OfflineUnavailable { url: String },

    #[error("{}", status_message(*code, reason.as_deref(), url))]
    HttpStatus {
        code: u16,
        reason: Option<String>,
        url: String,
    },

    /// Transport failure (connect, timeout, broken body stream)
    #[error("HTTP request to '{url}' failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("File operation failed on '{path}'")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move temporary file '{temp}' to destination file '{dest}'.")]
    Move {
        temp: PathBuf,
        dest: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read cached ETags file '{path}'")]
    ETagCache {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unsupported checksum algorithm: '{0}'")]
    UnsupportedAlgorithm(String),

    #[error("Invalid checksum for file '{file}'. Expected {expected} but got {actual}.")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },
}

impl DownloadError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

fn status_message(code: u16, reason: Option<&str>, url: &str) -> String {
    match reason {
        Some(phrase) if !phrase.is_empty() => {
            format!("{} (HTTP status code: {}, URL: {})", phrase, code, url)
        }
        _ => format!("HTTP status code: {}, URL: {}", code, url),
    }
}

pub type Result<T, E = DownloadError> = std::result::Result<T, E>;
