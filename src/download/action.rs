use reqwest::Url;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use super::auth::AuthScheme;
use super::client::{ClientFactory, ProxySettings};
use super::engine::{TransferEngine, TransferOutcome};
use super::etag::{ETagStore, UseETag};
use super::progress::{NullProgress, ProgressSink};
use super::source::{DestSpec, Destination, SourceList, SourceSpec, file_name_from_url};
use super::DownloadOptions;
use crate::error::{DownloadError, Result};

/// Downloads one or more sources to a file or directory.
///
/// Sources are transferred one after another in the order they were added.
/// The first failure aborts the remaining sources; files already written by
/// earlier sources stay in place.
///
/// ```no_run
/// # async fn run() -> download_task::Result<()> {
/// use download_task::DownloadAction;
///
/// let mut action = DownloadAction::new()
///     .src("https://example.com/archive.zip")
///     .dest("build/downloads")
///     .only_if_modified(true);
/// action.execute().await?;
/// println!("up to date: {}", action.is_up_to_date());
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct DownloadAction {
    sources: SourceList,
    dest: Destination,
    options: DownloadOptions,
    progress: Option<Box<dyn ProgressSink>>,
    executed: bool,
    source_count: usize,
    up_to_date: usize,
    skipped: usize,
}

impl DownloadAction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: DownloadOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Adds a source. May be called repeatedly.
    pub fn src(mut self, src: impl Into<SourceSpec>) -> Self {
        self.sources.push(src.into());
        self
    }

    pub fn dest(mut self, dest: impl Into<DestSpec>) -> Self {
        self.dest.set(dest.into());
        self
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.options.quiet = quiet;
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.options.overwrite = overwrite;
        self
    }

    pub fn only_if_modified(mut self, only_if_modified: bool) -> Self {
        self.options.only_if_modified = only_if_modified;
        self
    }

    /// Alias for [`DownloadAction::only_if_modified`]
    pub fn only_if_newer(self, only_if_newer: bool) -> Self {
        self.only_if_modified(only_if_newer)
    }

    pub fn compress(mut self, compress: bool) -> Self {
        self.options.compress = compress;
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.options.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.options.password = Some(password.into());
        self
    }

    pub fn auth_scheme(mut self, scheme: AuthScheme) -> Self {
        self.options.auth_scheme = scheme;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.set_header(name, value);
        self
    }

    /// Replaces all headers
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.options.headers.clear();
        for (name, value) in headers {
            self.options.set_header(name, value);
        }
        self
    }

    pub fn accept_any_certificate(mut self, accept: bool) -> Self {
        self.options.accept_any_certificate = accept;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.options.read_timeout = timeout;
        self
    }

    pub fn retries(mut self, retries: i32) -> Self {
        self.options.retries = retries;
        self
    }

    pub fn temp_and_move(mut self, temp_and_move: bool) -> Self {
        self.options.temp_and_move = temp_and_move;
        self
    }

    pub fn use_etag(mut self, policy: impl Into<UseETag>) -> Self {
        self.options.use_etag = policy.into();
        self
    }

    pub fn cached_etags_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.cached_etags_file = Some(path.into());
        self
    }

    pub fn work_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.work_dir = path.into();
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.options.method = method.into();
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.options.body = Some(body.into());
        self
    }

    pub fn offline(mut self, offline: bool) -> Self {
        self.options.offline = offline;
        self
    }

    pub fn proxy(mut self, proxy: ProxySettings) -> Self {
        self.options.proxy = proxy;
        self
    }

    pub fn progress(mut self, sink: impl ProgressSink + 'static) -> Self {
        self.progress = Some(Box::new(sink));
        self
    }

    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut DownloadOptions {
        &mut self.options
    }

    /// The resolved source URLs. Lazy sources are evaluated on first call.
    pub fn get_sources(&mut self) -> Result<&[Url]> {
        self.sources.resolve()
    }

    pub fn get_dest(&mut self) -> Result<&Path> {
        self.dest.resolve()
    }

    pub async fn execute(&mut self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(DownloadError::config("Please provide a download source"));
        }
        if !self.dest.is_set() {
            return Err(DownloadError::config("Please provide a download destination"));
        }

        let sources = self.sources.resolve()?.to_vec();
        if sources.is_empty() {
            return Err(DownloadError::config("Please provide a download source"));
        }
        let dest = self.dest.resolve()?.to_path_buf();
        if sources.len() > 1 {
            ensure_directory(&dest)?;
        }

        self.executed = false;
        self.source_count = sources.len();
        self.up_to_date = 0;
        self.skipped = 0;

        let etags = ETagStore::new(self.options.etags_file());
        let mut clients = ClientFactory::new(self.options.client_settings());
        let engine = TransferEngine::new(&self.options, &etags);

        let mut null_progress = NullProgress;
        let progress: &mut dyn ProgressSink = match self.progress.as_mut() {
            Some(sink) if !self.options.quiet => sink.as_mut(),
            _ => &mut null_progress,
        };

        let mut result = Ok(());
        for src in &sources {
            match engine.transfer(src, &dest, &mut clients, progress).await {
                Ok(outcome) => {
                    debug!("{}: {:?}", src, outcome);
                    if outcome.is_up_to_date() {
                        self.up_to_date += 1;
                    }
                    if outcome == TransferOutcome::SkippedOffline {
                        self.skipped += 1;
                    }
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        clients.close();
        self.executed = result.is_ok();
        result
    }

    /// True if the last execution transferred nothing
    pub fn is_up_to_date(&self) -> bool {
        self.executed && self.up_to_date == self.source_count
    }

    /// True if every source of the last execution was skipped in offline mode
    pub fn is_skipped(&self) -> bool {
        self.executed && self.skipped == self.source_count
    }

    /// The file each source is (or would be) written to
    pub fn output_files(&mut self) -> Result<Vec<PathBuf>> {
        let sources = self.sources.resolve()?.to_vec();
        let dest = self.dest.resolve()?.to_path_buf();
        if sources.len() > 1 {
            ensure_directory(&dest)?;
        }
        Ok(sources
            .iter()
            .map(|src| {
                if dest.is_dir() {
                    dest.join(file_name_from_url(src))
                } else {
                    dest.clone()
                }
            })
            .collect())
    }
}

/// Multiple sources need a directory destination; a missing one is created
fn ensure_directory(dest: &Path) -> Result<()> {
    if !dest.exists() {
        std::fs::create_dir_all(dest).map_err(|e| DownloadError::io(dest, e))?;
    } else if !dest.is_dir() {
        return Err(DownloadError::config(
            "If multiple sources are provided, the destination has to be a directory.",
        ));
    }
    Ok(())
}
