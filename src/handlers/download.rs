use crate::cli::{DownloadArgs, parse_header};
use anyhow::{Context, Result};
use console::{Term, style};
use download_task::{AuthScheme, ConfigManager, DownloadAction, ProgressSink, UseETag};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Renders transfer progress as a spinner line
struct SpinnerProgress {
    bar: Option<ProgressBar>,
    description: String,
}

impl SpinnerProgress {
    fn new() -> Self {
        Self {
            bar: None,
            description: String::new(),
        }
    }
}

impl ProgressSink for SpinnerProgress {
    fn started(&mut self, description: &str) {
        let bar = ProgressBar::new_spinner();
        if let Ok(spinner_style) = ProgressStyle::default_spinner().template("{spinner:.blue} {msg}") {
            bar.set_style(spinner_style);
        }
        bar.set_message(format!("Downloading {}", description));
        bar.enable_steady_tick(Duration::from_millis(100));
        self.description = description.to_string();
        self.bar = Some(bar);
    }

    fn progress(&mut self, message: &str) {
        if let Some(bar) = &self.bar {
            bar.set_message(format!("{}: {}", self.description, message));
        }
    }

    fn completed(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

pub async fn handle_download(config_manager: &ConfigManager, args: DownloadArgs) -> Result<()> {
    let term = Term::stdout();
    let mut options = config_manager.download_options()?;

    options.quiet |= args.quiet;
    options.overwrite = !args.no_overwrite;
    options.only_if_modified = args.only_if_modified;
    options.compress &= !args.no_compress;
    options.accept_any_certificate = args.accept_any_certificate;
    options.temp_and_move |= args.temp_and_move;
    options.offline = args.offline;
    options.username = args.username;
    options.password = args.password;
    options.body = args.body;
    options.cached_etags_file = args.cached_etags_file;
    options.auth_scheme = args
        .auth_scheme
        .parse::<AuthScheme>()
        .context("Invalid --auth-scheme")?;

    if let Some(policy) = &args.use_etag {
        options.use_etag = policy.parse::<UseETag>().context("Invalid --use-etag")?;
    }
    if let Some(method) = args.method {
        options.method = method;
    }
    if let Some(secs) = args.connect_timeout {
        options.connect_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = args.read_timeout {
        options.read_timeout = Duration::from_secs(secs);
    }
    if let Some(retries) = args.retries {
        options.retries = retries;
    }
    if let Some(work_dir) = args.work_dir {
        options.work_dir = work_dir;
    }
    for header in &args.headers {
        if let Some((name, value)) = parse_header(header) {
            options.set_header(name, value);
        }
    }

    let quiet = options.quiet;
    let mut action = DownloadAction::with_options(options)
        .src(args.urls)
        .dest(args.dest)
        .progress(SpinnerProgress::new());

    action.execute().await?;

    if quiet {
        return Ok(());
    }

    if action.is_skipped() {
        term.write_line(&format!(
            "{} Skipped (offline mode)",
            style("⏭️").yellow()
        ))?;
    } else if action.is_up_to_date() {
        term.write_line(&format!("{} Up to date", style("✅").green()))?;
    } else {
        term.write_line(&format!("{} Download complete", style("✅").green()))?;
    }

    for file in action.output_files()? {
        term.write_line(&format!(
            "   {}: {}",
            style("Output").dim(),
            style(file.display()).cyan()
        ))?;
    }

    Ok(())
}
