use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::download::{DownloadOptions, ProxySettings, UseETag};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub proxy: ProxySettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default)]
    pub quiet: bool,
    #[serde(default = "default_compress")]
    pub compress: bool,
    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default)]
    pub retries: i32,
    #[serde(default)]
    pub temp_and_move: bool,
    /// One of `false`, `true`, `all`, `strongOnly`
    #[serde(default = "default_use_etag")]
    pub use_etag: String,
    /// Temporary files and the ETag cache; the platform cache directory if unset
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

// Default value functions
fn default_compress() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_use_etag() -> String {
    "false".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            quiet: false,
            compress: default_compress(),
            connect_timeout_secs: default_timeout_secs(),
            read_timeout_secs: default_timeout_secs(),
            retries: 0,
            temp_and_move: false,
            use_etag: default_use_etag(),
            work_dir: None,
        }
    }
}

pub struct ConfigManager {
    config_file: PathBuf,
    cache_dir: Option<PathBuf>,
    config: Config,
}

impl ConfigManager {
    /// Load the config from the platform config directory, creating a
    /// default file if there is none
    pub fn new() -> Result<Self> {
        let project_dirs = ProjectDirs::from("", "", "download-task")
            .context("Failed to determine config directory")?;

        let config_file = project_dirs.config_dir().join("config.toml");
        let mut manager = Self::from_file(&config_file)?;
        manager.cache_dir = Some(project_dirs.cache_dir().to_path_buf());
        Ok(manager)
    }

    /// Load the config from an explicit file, creating it with defaults if
    /// it does not exist
    pub fn from_file(config_file: impl Into<PathBuf>) -> Result<Self> {
        let config_file = config_file.into();

        let config = if config_file.exists() {
            Self::load_config(&config_file)?
        } else {
            let default_config = Config::default();
            Self::save_config(&config_file, &default_config)?;
            default_config
        };

        Ok(Self {
            config_file,
            cache_dir: None,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    pub fn save(&self) -> Result<()> {
        Self::save_config(&self.config_file, &self.config)
    }

    /// Overwrite the config file with defaults
    pub fn reset(&mut self) -> Result<()> {
        self.config = Config::default();
        self.save()
    }

    /// The configured work directory, else the platform cache directory,
    /// else a directory under the system temp dir
    pub fn work_dir(&self) -> PathBuf {
        self.config
            .general
            .work_dir
            .clone()
            .or_else(|| self.cache_dir.clone())
            .unwrap_or_else(|| std::env::temp_dir().join("download-task"))
    }

    /// Build download options from the persisted defaults
    pub fn download_options(&self) -> Result<DownloadOptions> {
        let general = &self.config.general;
        let use_etag: UseETag = general
            .use_etag
            .parse()
            .context("Invalid general.use_etag in config")?;

        Ok(DownloadOptions {
            quiet: general.quiet,
            compress: general.compress,
            connect_timeout: Duration::from_secs(general.connect_timeout_secs),
            read_timeout: Duration::from_secs(general.read_timeout_secs),
            retries: general.retries,
            temp_and_move: general.temp_and_move,
            use_etag,
            work_dir: self.work_dir(),
            proxy: self.config.proxy.clone(),
            ..DownloadOptions::default()
        })
    }

    fn load_config(config_file: &Path) -> Result<Config> {
        let content = fs::read_to_string(config_file)
            .with_context(|| format!("Failed to read config file: {:?}", config_file))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", config_file))?;

        Ok(config)
    }

    fn save_config(config_file: &Path, config: &Config) -> Result<()> {
        if let Some(config_dir) = config_file.parent() {
            fs::create_dir_all(config_dir)
                .with_context(|| format!("Failed to create config directory: {:?}", config_dir))?;
        }

        let content = toml::to_string_pretty(config).context("Failed to serialize config")?;

        fs::write(config_file, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_file))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let general = &self.config.general;

        if general.connect_timeout_secs == 0 {
            anyhow::bail!("connect_timeout_secs must be greater than 0");
        }

        if general.read_timeout_secs == 0 {
            anyhow::bail!("read_timeout_secs must be greater than 0");
        }

        general
            .use_etag
            .parse::<UseETag>()
            .context("Invalid general.use_etag")?;

        for (scheme, endpoint) in [("http", &self.config.proxy.http), ("https", &self.config.proxy.https)] {
            if let Some(endpoint) = endpoint {
                if endpoint.host.is_empty() {
                    anyhow::bail!("proxy.{}.host cannot be empty", scheme);
                }
                if endpoint.username.is_some() != endpoint.password.is_some() {
                    anyhow::bail!(
                        "proxy.{} needs both username and password, or neither",
                        scheme
                    );
                }
            }
        }

        Ok(())
    }
}
