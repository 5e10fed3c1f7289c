use digest::Digest;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, BufReader};
use tracing::debug;

use crate::error::{DownloadError, Result};

const BUFFER_SIZE: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumAlgorithm {
    #[default]
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl FromStr for ChecksumAlgorithm {
    type Err = DownloadError;

    /// Accepts names like `MD5`, `SHA-256` or `sha256`
    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-')
            .collect::<String>()
            .to_ascii_uppercase();
        match normalized.as_str() {
            "MD5" => Ok(Self::Md5),
            "SHA1" => Ok(Self::Sha1),
            "SHA224" => Ok(Self::Sha224),
            "SHA256" => Ok(Self::Sha256),
            "SHA384" => Ok(Self::Sha384),
            "SHA512" => Ok(Self::Sha512),
            _ => Err(DownloadError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Md5 => "MD5",
            Self::Sha1 => "SHA-1",
            Self::Sha224 => "SHA-224",
            Self::Sha256 => "SHA-256",
            Self::Sha384 => "SHA-384",
            Self::Sha512 => "SHA-512",
        };
        f.write_str(name)
    }
}

/// Streams a file through `algorithm` and returns the lower-case hex digest
pub async fn calculate_checksum(path: &Path, algorithm: ChecksumAlgorithm) -> Result<String> {
    let file = File::open(path)
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    let mut reader = BufReader::new(file);

    match algorithm {
        ChecksumAlgorithm::Md5 => {
            let mut context = md5::Context::new();
            let mut buffer = [0; BUFFER_SIZE];
            loop {
                let bytes_read = reader
                    .read(&mut buffer)
                    .await
                    .map_err(|e| DownloadError::io(path, e))?;
                if bytes_read == 0 {
                    break;
                }
                context.consume(&buffer[..bytes_read]);
            }
            Ok(format!("{:x}", context.finalize()))
        }
        ChecksumAlgorithm::Sha1 => digest_file::<sha1::Sha1>(&mut reader, path).await,
        ChecksumAlgorithm::Sha224 => digest_file::<sha2::Sha224>(&mut reader, path).await,
        ChecksumAlgorithm::Sha256 => digest_file::<sha2::Sha256>(&mut reader, path).await,
        ChecksumAlgorithm::Sha384 => digest_file::<sha2::Sha384>(&mut reader, path).await,
        ChecksumAlgorithm::Sha512 => digest_file::<sha2::Sha512>(&mut reader, path).await,
    }
}

async fn digest_file<D: Digest>(reader: &mut BufReader<File>, path: &Path) -> Result<String>
where
    digest::Output<D>: fmt::LowerHex,
{
    let mut hasher = D::new();
    let mut buffer = [0; BUFFER_SIZE];
    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .await
            .map_err(|e| DownloadError::io(path, e))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Checks a file against an expected checksum
#[derive(Debug, Clone)]
pub struct VerifyAction {
    src: Option<PathBuf>,
    algorithm: String,
    checksum: Option<String>,
}

impl Default for VerifyAction {
    fn default() -> Self {
        Self {
            src: None,
            algorithm: "MD5".to_string(),
            checksum: None,
        }
    }
}

impl VerifyAction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn src(mut self, src: impl Into<PathBuf>) -> Self {
        self.src = Some(src.into());
        self
    }

    pub fn algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.algorithm = algorithm.into();
        self
    }

    pub fn checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    pub fn get_src(&self) -> Option<&Path> {
        self.src.as_deref()
    }

    pub fn get_algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn get_checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }

    pub async fn execute(&self) -> Result<()> {
        let src = self
            .src
            .as_deref()
            .ok_or_else(|| DownloadError::config("Please provide a file to verify"))?;
        let expected = self
            .checksum
            .as_deref()
            .ok_or_else(|| DownloadError::config("Please provide a checksum to verify against"))?;
        let algorithm: ChecksumAlgorithm = self.algorithm.parse()?;

        let actual = calculate_checksum(src, algorithm).await?;
        debug!("{} checksum of {}: {}", algorithm, src.display(), actual);

        if !actual.eq_ignore_ascii_case(expected) {
            return Err(DownloadError::ChecksumMismatch {
                file: src.display().to_string(),
                expected: expected.to_lowercase(),
                actual,
            });
        }
        Ok(())
    }
}
