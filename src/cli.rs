use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "download-task")]
#[command(about = "Download files over HTTP(S) with conditional re-download and checksum verification")]
#[command(long_about = "
download-task fetches one or more URLs into a file or directory. It can skip
files that are already up to date (modification time or ETag), retry failed
requests, and verify checksums of downloaded files.

Examples:
  download-task download https://example.com/a.zip --dest build/
  download-task download https://example.com/a.zip --dest a.zip --only-if-modified --use-etag true
  download-task verify build/a.zip --checksum 3e25960a79dbc69b674cd4ec67a72c62
  download-task config show
")]
#[command(version)]
pub struct Cli {
    /// Override config file path
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download one or more URLs
    #[command(visible_alias = "dl")]
    Download(DownloadArgs),

    /// Verify a file's checksum
    Verify {
        /// File to verify
        file: PathBuf,

        /// Expected checksum (hex)
        #[arg(long, value_name = "HEX")]
        checksum: String,

        /// Digest algorithm
        #[arg(short, long, default_value = "MD5", value_name = "ALGORITHM")]
        #[arg(help = "Digest algorithm (MD5, SHA-1, SHA-224, SHA-256, SHA-384, SHA-512)")]
        algorithm: String,
    },

    /// Manage configuration
    #[command(visible_alias = "cfg")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args)]
pub struct DownloadArgs {
    /// Source URLs (http, https or file)
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Destination file or directory
    #[arg(short, long, value_name = "PATH")]
    pub dest: PathBuf,

    /// Suppress progress and log output
    #[arg(short, long)]
    pub quiet: bool,

    /// Keep existing destination files
    #[arg(long)]
    pub no_overwrite: bool,

    /// Only download if the source is newer than the destination
    #[arg(short = 'm', long, visible_alias = "only-if-newer")]
    pub only_if_modified: bool,

    /// ETag policy: false, true, all or strongOnly
    #[arg(long, value_name = "POLICY")]
    pub use_etag: Option<String>,

    /// Cached ETags file (defaults to <work dir>/etags.json)
    #[arg(long, value_name = "FILE")]
    pub cached_etags_file: Option<PathBuf>,

    /// Do not request compressed responses
    #[arg(long)]
    pub no_compress: bool,

    #[arg(short, long)]
    pub username: Option<String>,

    #[arg(short, long)]
    pub password: Option<String>,

    /// Authentication scheme: Basic or Digest
    #[arg(long, default_value = "Basic", value_name = "SCHEME")]
    pub auth_scheme: String,

    /// Additional request header as NAME:VALUE (repeatable)
    #[arg(short = 'H', long = "header", value_name = "NAME:VALUE")]
    pub headers: Vec<String>,

    /// HTTP method
    #[arg(short = 'X', long, value_name = "METHOD")]
    pub method: Option<String>,

    /// Request body
    #[arg(long)]
    pub body: Option<String>,

    /// Skip TLS certificate and hostname checks
    #[arg(long)]
    pub accept_any_certificate: bool,

    /// Connect timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub connect_timeout: Option<u64>,

    /// Read timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub read_timeout: Option<u64>,

    /// Retry count; negative retries forever
    #[arg(short, long, allow_negative_numbers = true)]
    pub retries: Option<i32>,

    /// Download to a temporary file first and move it into place
    #[arg(long)]
    pub temp_and_move: bool,

    /// Work directory for temporary files
    #[arg(long, value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// Never access the network
    #[arg(long)]
    pub offline: bool,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Print the config file location
    Path,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Validate CLI arguments and show helpful error messages
    pub fn validate(&self) -> Result<(), String> {
        if let Commands::Download(args) = &self.command {
            if args.urls.iter().any(|u| u.trim().is_empty()) {
                return Err("Source URL cannot be empty".to_string());
            }
            if args.username.is_some() != args.password.is_some() {
                return Err("--username and --password must be given together".to_string());
            }
            if let Some(bad) = args.headers.iter().find(|h| parse_header(h).is_none()) {
                return Err(format!("Invalid header '{}', expected NAME:VALUE", bad));
            }
        }
        if let Commands::Verify { checksum, .. } = &self.command {
            if checksum.is_empty() {
                return Err("Checksum cannot be empty".to_string());
            }
        }
        Ok(())
    }
}

/// Splits `NAME:VALUE`, trimming whitespace around both parts
pub fn parse_header(header: &str) -> Option<(String, String)> {
    let (name, value) = header.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}
