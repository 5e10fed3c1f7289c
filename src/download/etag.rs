use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

use crate::error::{DownloadError, Result};

/// How entity tags are used for conditional requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UseETag {
    /// Do not use ETags
    #[default]
    Disabled,
    /// Use all ETags but warn about weak ones
    Enabled,
    /// Use all ETags without warning
    All,
    /// Use strong ETags only
    StrongOnly,
}

impl UseETag {
    pub fn enabled(self) -> bool {
        self != Self::Disabled
    }

    pub fn use_weak_etags(self) -> bool {
        matches!(self, Self::Enabled | Self::All)
    }

    pub fn warn_for_weak(self) -> bool {
        self == Self::Enabled
    }
}

impl From<bool> for UseETag {
    fn from(value: bool) -> Self {
        if value { Self::Enabled } else { Self::Disabled }
    }
}

impl FromStr for UseETag {
    type Err = DownloadError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(Self::All),
            "strongOnly" => Ok(Self::StrongOnly),
            _ if s.eq_ignore_ascii_case("true") => Ok(Self::Enabled),
            _ if s.eq_ignore_ascii_case("false") => Ok(Self::Disabled),
            _ => Err(DownloadError::InvalidETagPolicy(s.to_string())),
        }
    }
}

pub fn is_weak_etag(etag: &str) -> bool {
    etag.starts_with("W/")
}

/// Entity tags persisted as a single JSON document of the form
/// `{ "<scheme>://<host>:<port>": { "<path>": { "ETag": "<value>" } } }`.
///
/// The file is read on every lookup and rewritten wholesale on every store.
/// There is no locking; concurrent writers race and the last one wins.
#[derive(Debug)]
pub struct ETagStore {
    path: PathBuf,
    warned_weak: AtomicBool,
}

impl ETagStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            warned_weak: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, host: &str, path: &str) -> Result<Option<String>> {
        let doc = self.read()?;
        let etag = doc
            .get(host)
            .and_then(|h| h.get(path))
            .and_then(|entry| entry.get("ETag"))
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(etag)
    }

    pub fn put(&self, host: &str, path: &str, etag: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| DownloadError::io(parent, e))?;
        }

        let mut doc = self.read()?;
        let host_entry = doc
            .entry(host.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !host_entry.is_object() {
            *host_entry = Value::Object(Map::new());
        }
        if let Value::Object(paths) = host_entry {
            let mut entry = Map::new();
            entry.insert("ETag".to_string(), Value::String(etag.to_string()));
            paths.insert(path.to_string(), Value::Object(entry));
        }

        let contents = serde_json::to_string(&doc).map_err(|e| DownloadError::ETagCache {
            path: self.path.clone(),
            source: e,
        })?;
        fs::write(&self.path, contents).map_err(|e| DownloadError::io(&self.path, e))
    }

    /// Returns true the first time it is called on this store
    pub(crate) fn first_weak_warning(&self) -> bool {
        !self.warned_weak.swap(true, Ordering::Relaxed)
    }

    fn read(&self) -> Result<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let content = fs::read_to_string(&self.path).map_err(|e| DownloadError::io(&self.path, e))?;
        serde_json::from_str(&content).map_err(|e| DownloadError::ETagCache {
            path: self.path.clone(),
            source: e,
        })
    }

    /// Stores a response's ETag according to `policy`. Missing and
    /// disallowed weak tags are skipped with a warning.
    pub(crate) fn store_response_etag(
        &self,
        policy: UseETag,
        host: &str,
        path: &str,
        etag: Option<&str>,
        quiet: bool,
    ) -> Result<()> {
        let Some(etag) = etag else {
            if !quiet {
                warn!("Server response does not include an entity tag (ETag).");
            }
            return Ok(());
        };

        if is_weak_etag(etag) {
            if policy.warn_for_weak() && !quiet && self.first_weak_warning() {
                warn!(
                    "Weak entity tag (ETag) encountered. Please make sure you want to compare \
                     resources based on weak ETags. If yes, set the 'useETag' flag to \"all\", \
                     otherwise set it to \"strongOnly\"."
                );
            }
            if !policy.use_weak_etags() {
                return Ok(());
            }
        }

        self.put(host, path, etag)
    }
}
