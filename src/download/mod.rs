pub mod action;
pub mod auth;
pub mod checksum;
pub mod client;
pub mod engine;
pub mod etag;
pub mod progress;
pub mod source;

pub use action::DownloadAction;
pub use auth::AuthScheme;
pub use checksum::{ChecksumAlgorithm, VerifyAction, calculate_checksum};
pub use client::{ClientFactory, ClientSettings, ProxyEndpoint, ProxySettings};
pub use engine::TransferOutcome;
pub use etag::{ETagStore, UseETag};
pub use progress::{NullProgress, ProgressSink, format_bytes};
pub use source::{DestSpec, SourceSpec};

use reqwest::Method;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{DownloadError, Result};

/// Per-action settings consulted by the transfer engine
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub quiet: bool,
    pub overwrite: bool,
    pub only_if_modified: bool,
    pub compress: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub auth_scheme: AuthScheme,
    /// Sent in insertion order
    pub headers: Vec<(String, String)>,
    pub accept_any_certificate: bool,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Negative retries forever
    pub retries: i32,
    pub temp_and_move: bool,
    pub use_etag: UseETag,
    /// Defaults to `<work_dir>/etags.json`
    pub cached_etags_file: Option<PathBuf>,
    pub work_dir: PathBuf,
    pub method: String,
    pub body: Option<String>,
    pub offline: bool,
    pub proxy: ProxySettings,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        let client = ClientSettings::default();
        Self {
            quiet: false,
            overwrite: true,
            only_if_modified: false,
            compress: client.compress,
            username: None,
            password: None,
            auth_scheme: AuthScheme::Basic,
            headers: Vec::new(),
            accept_any_certificate: false,
            connect_timeout: client.connect_timeout,
            read_timeout: client.read_timeout,
            retries: 0,
            temp_and_move: false,
            use_etag: UseETag::Disabled,
            cached_etags_file: None,
            work_dir: std::env::temp_dir().join("download-task"),
            method: "GET".to_string(),
            body: None,
            offline: false,
            proxy: ProxySettings::default(),
        }
    }
}

impl DownloadOptions {
    pub fn etags_file(&self) -> PathBuf {
        self.cached_etags_file
            .clone()
            .unwrap_or_else(|| self.work_dir.join("etags.json"))
    }

    /// Sets a header, replacing any previous value with the same name
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.headers.push((name, value)),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub(crate) fn http_method(&self) -> Result<Method> {
        let method = self.method.trim().to_ascii_uppercase();
        if method.is_empty() {
            return Err(DownloadError::config("HTTP method must not be empty"));
        }
        Method::from_bytes(method.as_bytes())
            .map_err(|_| DownloadError::config(format!("Invalid HTTP method: '{}'", self.method)))
    }

    pub(crate) fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            compress: self.compress,
            proxy: self.proxy.clone(),
            quiet: self.quiet,
        }
    }
}
