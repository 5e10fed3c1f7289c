use chrono::{DateTime, NaiveDateTime, Utc};
use filetime::FileTime;
use reqwest::header::{AUTHORIZATION, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, WWW_AUTHENTICATE};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};
use uuid::Uuid;

use super::auth::{AuthScheme, DigestChallenge};
use super::client::{ClientFactory, HttpClient};
use super::etag::{ETagStore, is_weak_etag};
use super::progress::{ByteCounter, NullProgress, ProgressSink};
use super::source::file_name_from_url;
use super::DownloadOptions;
use crate::error::{DownloadError, Result};

const BUFFER_SIZE: usize = 10 * 1024;
const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";
const RFC850_DATE_FORMAT: &str = "%A, %d-%b-%y %H:%M:%S GMT";
const ASCTIME_DATE_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// Result of transferring one source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Downloaded,
    SkippedUpToDate,
    SkippedOffline,
}

impl TransferOutcome {
    /// True if no transfer was necessary
    pub fn is_up_to_date(self) -> bool {
        !matches!(self, Self::Downloaded)
    }
}

enum Body {
    File { file: File, path: PathBuf },
    Http { response: Response, url: String },
}

impl Body {
    /// Replaces `buf` with the next chunk. Returns false at end of input.
    async fn next_chunk(&mut self, buf: &mut Vec<u8>) -> Result<bool> {
        match self {
            Body::File { file, path } => {
                buf.resize(BUFFER_SIZE, 0);
                let n = file
                    .read(buf.as_mut_slice())
                    .await
                    .map_err(|e| DownloadError::io(path.as_path(), e))?;
                buf.truncate(n);
                Ok(n > 0)
            }
            Body::Http { response, url } => {
                let chunk = response.chunk().await.map_err(|e| DownloadError::Request {
                    url: url.clone(),
                    source: e,
                })?;
                match chunk {
                    Some(bytes) => {
                        buf.clear();
                        buf.extend_from_slice(&bytes);
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
        }
    }
}

/// Transfers a single source to its destination file
pub struct TransferEngine<'a> {
    options: &'a DownloadOptions,
    etags: &'a ETagStore,
}

impl<'a> TransferEngine<'a> {
    pub fn new(options: &'a DownloadOptions, etags: &'a ETagStore) -> Self {
        Self { options, etags }
    }

    pub async fn transfer(
        &self,
        src: &Url,
        dest: &Path,
        clients: &mut ClientFactory,
        progress: &mut dyn ProgressSink,
    ) -> Result<TransferOutcome> {
        let quiet = self.options.quiet;
        let dest_file = make_dest_file(src, dest)?;

        if !self.options.overwrite && dest_file.exists() {
            if !quiet {
                info!(
                    "Destination file already exists. Skipping '{}'",
                    display_name(&dest_file)
                );
            }
            return Ok(TransferOutcome::SkippedUpToDate);
        }

        if self.options.offline {
            if dest_file.exists() {
                if !quiet {
                    info!(
                        "Skipping existing file '{}' in offline mode.",
                        display_name(&dest_file)
                    );
                }
                return Ok(TransferOutcome::SkippedOffline);
            }
            return Err(DownloadError::OfflineUnavailable {
                url: src.to_string(),
            });
        }

        let timestamp = if self.options.only_if_modified && dest_file.exists() {
            modified_millis(&dest_file)?
        } else {
            0
        };

        if src.scheme() == "file" {
            self.transfer_file(src, timestamp, &dest_file, progress).await
        } else {
            self.transfer_http(src, timestamp, &dest_file, clients, progress)
                .await
        }
    }

    async fn transfer_file(
        &self,
        src: &Url,
        timestamp: u64,
        dest_file: &Path,
        progress: &mut dyn ProgressSink,
    ) -> Result<TransferOutcome> {
        let src_path = src
            .to_file_path()
            .map_err(|_| DownloadError::InvalidSource(format!("'{}' is not a local file", src)))?;
        let metadata = fs::metadata(&src_path)
            .await
            .map_err(|e| DownloadError::io(&src_path, e))?;

        let last_modified = metadata.modified().map(system_time_millis).unwrap_or(0);
        if last_modified != 0 && timestamp >= last_modified {
            if !self.options.quiet {
                info!("Not modified. Skipping '{}'", src);
            }
            return Ok(TransferOutcome::SkippedUpToDate);
        }

        let file = File::open(&src_path)
            .await
            .map_err(|e| DownloadError::io(&src_path, e))?;
        let mut body = Body::File {
            file,
            path: src_path,
        };
        self.stream_and_move(&mut body, Some(metadata.len()), dest_file, progress, src)
            .await?;

        if self.options.only_if_modified && last_modified > 0 {
            set_modified_millis(dest_file, last_modified)?;
        }
        Ok(TransferOutcome::Downloaded)
    }

    async fn transfer_http(
        &self,
        src: &Url,
        timestamp: u64,
        dest_file: &Path,
        clients: &mut ClientFactory,
        progress: &mut dyn ProgressSink,
    ) -> Result<TransferOutcome> {
        let options = self.options;
        let client =
            clients.client_for(src, options.accept_any_certificate, options.retries)?;

        let host = host_key(src);
        let path = request_path(src);

        let mut etag = None;
        if options.only_if_modified && options.use_etag.enabled() && dest_file.exists() {
            etag = self.etags.get(&host, &path)?;
            if !options.use_etag.use_weak_etags() && etag.as_deref().is_some_and(is_weak_etag) {
                etag = None;
            }
        }

        let response = self
            .open_connection(&client, src, timestamp, etag.as_deref())
            .await?;

        let last_modified = parse_last_modified(&response);
        if response.status() == StatusCode::NOT_MODIFIED
            || (last_modified != 0 && timestamp >= last_modified)
        {
            if !options.quiet {
                info!("Not modified. Skipping '{}'", src);
            }
            return Ok(TransferOutcome::SkippedUpToDate);
        }

        let response_etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let total = response.content_length();
        let mut body = Body::Http {
            response,
            url: src.to_string(),
        };
        let bytes = self
            .stream_and_move(&mut body, total, dest_file, progress, src)
            .await?;
        debug!("Downloaded {} bytes from {}", bytes, src);

        if options.only_if_modified && last_modified > 0 {
            set_modified_millis(dest_file, last_modified)?;
        }

        if options.only_if_modified && options.use_etag.enabled() {
            self.etags.store_response_etag(
                options.use_etag,
                &host,
                &path,
                response_etag.as_deref(),
                options.quiet,
            )?;
        }

        Ok(TransferOutcome::Downloaded)
    }

    async fn open_connection(
        &self,
        client: &HttpClient,
        src: &Url,
        timestamp: u64,
        etag: Option<&str>,
    ) -> Result<Response> {
        let method = self.options.http_method()?;
        let request_error = |e| DownloadError::Request {
            url: src.to_string(),
            source: e,
        };

        let mut response = client
            .send(|c| self.build_request(c, &method, src, timestamp, etag, None))
            .await
            .map_err(request_error)?;

        if response.status() == StatusCode::UNAUTHORIZED
            && self.options.auth_scheme == AuthScheme::Digest
        {
            if let (Some(user), Some(pass), Some(challenge)) = (
                self.options.username.as_deref(),
                self.options.password.as_deref(),
                digest_challenge(&response),
            ) {
                let cnonce = Uuid::new_v4().simple().to_string();
                let authorization = challenge.authorization(
                    user,
                    pass,
                    method.as_str(),
                    &request_path(src),
                    &cnonce,
                    1,
                );
                let authorization = Some(authorization.as_str());
                response = client
                    .send(|c| self.build_request(c, &method, src, timestamp, etag, authorization))
                    .await
                    .map_err(request_error)?;
            }
        }

        let status = response.status();
        if !status.is_success() && status != StatusCode::NOT_MODIFIED {
            return Err(DownloadError::HttpStatus {
                code: status.as_u16(),
                // reqwest keeps only the status code; the server's own
                // reason phrase is not exposed
                reason: status.canonical_reason().map(str::to_string),
                url: src.to_string(),
            });
        }
        Ok(response)
    }

    fn build_request(
        &self,
        client: &Client,
        method: &Method,
        src: &Url,
        timestamp: u64,
        etag: Option<&str>,
        digest_authorization: Option<&str>,
    ) -> RequestBuilder {
        let options = self.options;
        let mut request = client.request(method.clone(), src.clone());

        if let (Some(user), Some(pass)) = (options.username.as_deref(), options.password.as_deref()) {
            match (options.auth_scheme, digest_authorization) {
                (AuthScheme::Basic, _) => request = request.basic_auth(user, Some(pass)),
                (AuthScheme::Digest, Some(value)) => {
                    request = request.header(AUTHORIZATION, value)
                }
                (AuthScheme::Digest, None) => {}
            }
        }

        if timestamp > 0 {
            if let Some(date) = format_http_date(timestamp) {
                request = request.header(IF_MODIFIED_SINCE, date);
            }
        }

        if let Some(etag) = etag {
            request = request.header(IF_NONE_MATCH, etag);
        }

        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        if let Some(body) = &options.body {
            request = request.body(body.clone());
        }

        request
    }

    /// Streams `body` to `dest_file`, through a temporary file in the work
    /// directory when temp-and-move is enabled
    async fn stream_and_move(
        &self,
        body: &mut Body,
        total: Option<u64>,
        dest_file: &Path,
        progress: &mut dyn ProgressSink,
        src: &Url,
    ) -> Result<u64> {
        if !self.options.temp_and_move {
            return stream(body, total, dest_file, progress, src).await;
        }

        let work_dir = &self.options.work_dir;
        fs::create_dir_all(work_dir)
            .await
            .map_err(|e| DownloadError::io(work_dir, e))?;

        let temp_file = work_dir.join(format!(
            "{}.{}.part",
            display_name(dest_file),
            Uuid::new_v4().simple()
        ));

        let bytes = stream(body, total, &temp_file, progress, src).await?;
        move_file(&temp_file, dest_file).await?;
        Ok(bytes)
    }
}

/// Copies `body` into `target`, reporting progress. A partially written
/// target is deleted on failure.
async fn stream(
    body: &mut Body,
    total: Option<u64>,
    target: &Path,
    progress: &mut dyn ProgressSink,
    src: &Url,
) -> Result<u64> {
    progress.started(src.as_str());
    let result = write_body(body, total, target, progress).await;
    progress.completed();

    if result.is_err() {
        remove_partial(target).await;
    }
    result
}

async fn write_body(
    body: &mut Body,
    total: Option<u64>,
    target: &Path,
    progress: &mut dyn ProgressSink,
) -> Result<u64> {
    let mut file = File::create(target)
        .await
        .map_err(|e| DownloadError::io(target, e))?;

    let mut counter = ByteCounter::new(total);
    let mut buf = Vec::with_capacity(BUFFER_SIZE);
    while body.next_chunk(&mut buf).await? {
        file.write_all(&buf)
            .await
            .map_err(|e| DownloadError::io(target, e))?;
        if let Some(message) = counter.add(buf.len()) {
            progress.progress(&message);
        }
    }

    file.flush().await.map_err(|e| DownloadError::io(target, e))?;
    Ok(counter.processed())
}

/// Moves `temp` over `dest`: rename first, copy and delete if the rename
/// fails (e.g. across file systems)
async fn move_file(temp: &Path, dest: &Path) -> Result<()> {
    if fs::rename(temp, dest).await.is_ok() {
        return Ok(());
    }

    // some platforms refuse to rename over an existing file
    if dest.exists() {
        fs::remove_file(dest).await.map_err(|e| move_error(temp, dest, e))?;
        if fs::rename(temp, dest).await.is_ok() {
            return Ok(());
        }
    }

    copy_and_remove(temp, dest).await
}

/// Copies `temp` to `dest` through the regular body writer, then deletes
/// `temp`. A failed copy leaves neither file behind.
async fn copy_and_remove(temp: &Path, dest: &Path) -> Result<()> {
    let file = File::open(temp)
        .await
        .map_err(|e| move_error(temp, dest, e))?;
    let mut body = Body::File {
        file,
        path: temp.to_path_buf(),
    };

    if let Err(e) = write_body(&mut body, None, dest, &mut NullProgress).await {
        remove_partial(dest).await;
        remove_partial(temp).await;
        return Err(match e {
            DownloadError::Io { source, .. } => move_error(temp, dest, source),
            other => other,
        });
    }
    fs::remove_file(temp)
        .await
        .map_err(|e| move_error(temp, dest, e))
}

fn move_error(temp: &Path, dest: &Path, source: std::io::Error) -> DownloadError {
    DownloadError::Move {
        temp: temp.to_path_buf(),
        dest: dest.to_path_buf(),
        source,
    }
}

async fn remove_partial(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        debug!("Could not remove partial file {}: {}", path.display(), e);
    }
}

/// Resolves the file a source is written to. A directory destination gets
/// the URL's file name appended; otherwise missing parents are created.
pub fn make_dest_file(src: &Url, dest: &Path) -> Result<PathBuf> {
    if dest.is_dir() {
        return Ok(dest.join(file_name_from_url(src)));
    }
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| DownloadError::io(parent, e))?;
    }
    Ok(dest.to_path_buf())
}

/// The ETag cache key for a URL's host, e.g. `http://localhost:8080`
pub fn host_key(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port_or_known_default() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    }
}

/// Path and query of a URL, as sent in the request line
pub fn request_path(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

fn digest_challenge(response: &Response) -> Option<DigestChallenge> {
    response
        .headers()
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(DigestChallenge::parse)
}

fn parse_last_modified(response: &Response) -> u64 {
    response
        .headers()
        .get_all(LAST_MODIFIED)
        .iter()
        .last()
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date)
        .unwrap_or(0)
}

/// Parses an HTTP date in any of the three formats RFC 9110 accepts:
/// IMF-fixdate, RFC 850 and asctime
pub(crate) fn parse_http_date(value: &str) -> Option<u64> {
    let value = value.trim();
    let millis = match DateTime::parse_from_rfc2822(value) {
        Ok(date) => date.timestamp_millis(),
        Err(_) => [RFC850_DATE_FORMAT, ASCTIME_DATE_FORMAT]
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())?
            .and_utc()
            .timestamp_millis(),
    };
    u64::try_from(millis).ok()
}

pub(crate) fn format_http_date(millis: u64) -> Option<String> {
    let date = DateTime::<Utc>::from_timestamp_millis(i64::try_from(millis).ok()?)?;
    Some(date.format(HTTP_DATE_FORMAT).to_string())
}

fn system_time_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn modified_millis(path: &Path) -> Result<u64> {
    let metadata = std::fs::metadata(path).map_err(|e| DownloadError::io(path, e))?;
    Ok(metadata.modified().map(system_time_millis).unwrap_or(0))
}

fn set_modified_millis(path: &Path, millis: u64) -> Result<()> {
    let mtime = FileTime::from_unix_time(
        (millis / 1000) as i64,
        ((millis % 1000) * 1_000_000) as u32,
    );
    filetime::set_file_mtime(path, mtime).map_err(|e| DownloadError::io(path, e))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
