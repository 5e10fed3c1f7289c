use reqwest::Url;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{DownloadError, Result};

type LazySource = Box<dyn Fn() -> SourceSpec + Send + Sync>;
type LazyDest = Box<dyn Fn() -> DestSpec + Send + Sync>;

/// Anything that can be turned into one or more source URLs
pub enum SourceSpec {
    Literal(String),
    Url(Url),
    /// Evaluated when the sources are first resolved
    Provider(LazySource),
    Many(Vec<SourceSpec>),
}

impl SourceSpec {
    pub fn provider<F>(f: F) -> Self
    where
        F: Fn() -> SourceSpec + Send + Sync + 'static,
    {
        Self::Provider(Box::new(f))
    }

    fn flatten_into(&self, out: &mut Vec<Url>) -> Result<()> {
        match self {
            Self::Literal(s) => out.push(parse_source_url(s)?),
            Self::Url(url) => {
                check_scheme(url)?;
                out.push(url.clone());
            }
            Self::Provider(f) => f().flatten_into(out)?,
            Self::Many(specs) => {
                for spec in specs {
                    spec.flatten_into(out)?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(s) => f.debug_tuple("Literal").field(s).finish(),
            Self::Url(u) => f.debug_tuple("Url").field(&u.as_str()).finish(),
            Self::Provider(_) => f.write_str("Provider(..)"),
            Self::Many(specs) => f.debug_tuple("Many").field(specs).finish(),
        }
    }
}

impl From<&str> for SourceSpec {
    fn from(s: &str) -> Self {
        Self::Literal(s.to_string())
    }
}

impl From<String> for SourceSpec {
    fn from(s: String) -> Self {
        Self::Literal(s)
    }
}

impl From<Url> for SourceSpec {
    fn from(url: Url) -> Self {
        Self::Url(url)
    }
}

impl<T: Into<SourceSpec>> From<Vec<T>> for SourceSpec {
    fn from(items: Vec<T>) -> Self {
        Self::Many(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<SourceSpec>, const N: usize> From<[T; N]> for SourceSpec {
    fn from(items: [T; N]) -> Self {
        Self::Many(items.into_iter().map(Into::into).collect())
    }
}

fn parse_source_url(s: &str) -> Result<Url> {
    let url = Url::parse(s)
        .map_err(|e| DownloadError::InvalidSource(format!("'{}' is not a valid URL: {}", s, e)))?;
    check_scheme(&url)?;
    Ok(url)
}

fn check_scheme(url: &Url) -> Result<()> {
    match url.scheme() {
        "http" | "https" | "file" => Ok(()),
        other => Err(DownloadError::InvalidSource(format!(
            "unsupported URL scheme '{}' in '{}'",
            other, url
        ))),
    }
}

/// Anything that can be turned into a destination path
pub enum DestSpec {
    /// A plain path; whether it is a directory is decided at transfer time
    Path(PathBuf),
    /// A directory; it is created when resolved so files land inside it
    Directory(PathBuf),
    /// A regular file
    File(PathBuf),
    Provider(LazyDest),
}

impl DestSpec {
    pub fn provider<F>(f: F) -> Self
    where
        F: Fn() -> DestSpec + Send + Sync + 'static,
    {
        Self::Provider(Box::new(f))
    }

    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self::Directory(path.into())
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    fn evaluate(&self) -> Result<PathBuf> {
        match self {
            Self::Path(p) | Self::File(p) => non_empty(p),
            Self::Directory(p) => {
                let dir = non_empty(p)?;
                fs::create_dir_all(&dir).map_err(|e| DownloadError::io(&dir, e))?;
                Ok(dir)
            }
            Self::Provider(f) => f().evaluate(),
        }
    }
}

impl fmt::Debug for DestSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(p) => f.debug_tuple("Path").field(p).finish(),
            Self::Directory(p) => f.debug_tuple("Directory").field(p).finish(),
            Self::File(p) => f.debug_tuple("File").field(p).finish(),
            Self::Provider(_) => f.write_str("Provider(..)"),
        }
    }
}

impl From<&str> for DestSpec {
    fn from(s: &str) -> Self {
        Self::Path(PathBuf::from(s))
    }
}

impl From<String> for DestSpec {
    fn from(s: String) -> Self {
        Self::Path(PathBuf::from(s))
    }
}

impl From<PathBuf> for DestSpec {
    fn from(p: PathBuf) -> Self {
        Self::Path(p)
    }
}

impl From<&Path> for DestSpec {
    fn from(p: &Path) -> Self {
        Self::Path(p.to_path_buf())
    }
}

fn non_empty(p: &Path) -> Result<PathBuf> {
    if p.as_os_str().is_empty() {
        return Err(DownloadError::InvalidDestination(
            "destination path is empty".to_string(),
        ));
    }
    Ok(p.to_path_buf())
}

/// Collects source specifications and resolves them once into URLs
#[derive(Debug, Default)]
pub struct SourceList {
    specs: Vec<SourceSpec>,
    resolved: Option<Vec<Url>>,
}

impl SourceList {
    pub fn push(&mut self, spec: SourceSpec) {
        self.specs.push(spec);
        self.resolved = None;
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Flattens all specifications in order. The result is cached, so lazy
    /// providers run at most once.
    pub fn resolve(&mut self) -> Result<&[Url]> {
        if self.resolved.is_none() {
            let mut urls = Vec::with_capacity(self.specs.len());
            for spec in &self.specs {
                spec.flatten_into(&mut urls)?;
            }
            self.resolved = Some(urls);
        }
        Ok(self.resolved.as_deref().unwrap_or_default())
    }
}

/// Holds the destination specification and its cached resolution
#[derive(Debug, Default)]
pub struct Destination {
    spec: Option<DestSpec>,
    resolved: Option<PathBuf>,
}

impl Destination {
    pub fn set(&mut self, spec: DestSpec) {
        self.spec = Some(spec);
        self.resolved = None;
    }

    pub fn is_set(&self) -> bool {
        self.spec.is_some()
    }

    pub fn resolve(&mut self) -> Result<&Path> {
        if self.resolved.is_none() {
            let spec = self
                .spec
                .as_ref()
                .ok_or_else(|| DownloadError::config("Please provide a download destination"))?;
            self.resolved = Some(spec.evaluate()?);
        }
        match &self.resolved {
            Some(path) => Ok(path),
            None => Err(DownloadError::config("Please provide a download destination")),
        }
    }
}

/// Derives the file name for a URL: the last path segment after any
/// trailing slash has been stripped.
pub fn file_name_from_url(url: &Url) -> String {
    let s = url.as_str();
    let s = s.strip_suffix('/').unwrap_or(s);
    match s.rfind('/') {
        Some(i) => s[i + 1..].to_string(),
        None => s.to_string(),
    }
}
