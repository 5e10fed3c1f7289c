use crate::cli::ConfigAction;
use anyhow::{Context, Result};
use console::{Term, style};
use download_task::ConfigManager;

pub async fn handle_config(config_manager: &mut ConfigManager, action: ConfigAction) -> Result<()> {
    let term = Term::stdout();

    match action {
        ConfigAction::Show => {
            let config_content = toml::to_string_pretty(config_manager.config())
                .context("Failed to serialize config")?;

            term.write_line(&format!("{} Current configuration:", style("⚙️").cyan()))?;
            term.write_line(&format!(
                "   {}: {}",
                style("Work directory").dim(),
                style(config_manager.work_dir().display()).cyan()
            ))?;
            term.write_line("")?;
            term.write_line(&config_content)?;
        }

        ConfigAction::Path => {
            term.write_line(&config_manager.config_file().display().to_string())?;
        }

        ConfigAction::Init { force } => {
            if force {
                config_manager.reset()?;
                term.write_line(&format!(
                    "{} Wrote default configuration to {}",
                    style("✅").green(),
                    style(config_manager.config_file().display()).cyan()
                ))?;
            } else {
                term.write_line(&format!(
                    "{} Configuration exists at {} (use --force to reset it)",
                    style("💡").yellow(),
                    style(config_manager.config_file().display()).cyan()
                ))?;
            }
        }
    }

    Ok(())
}
