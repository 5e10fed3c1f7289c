pub mod config;
pub mod download;
pub mod error;

// Re-export commonly used types for easier access in tests
pub use config::ConfigManager;
pub use download::{
    AuthScheme, ChecksumAlgorithm, DestSpec, DownloadAction, DownloadOptions, ProgressSink,
    ProxyEndpoint, ProxySettings, SourceSpec, TransferOutcome, UseETag, VerifyAction,
};
pub use error::{DownloadError, Result};
