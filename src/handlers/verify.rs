use anyhow::Result;
use console::{Term, style};
use download_task::VerifyAction;
use std::path::PathBuf;

pub async fn handle_verify(file: PathBuf, checksum: String, algorithm: String) -> Result<()> {
    let term = Term::stdout();

    let action = VerifyAction::new()
        .src(&file)
        .algorithm(&algorithm)
        .checksum(checksum);
    action.execute().await?;

    term.write_line(&format!(
        "{} {} checksum of {} matches",
        style("✅").green(),
        style(action.get_algorithm()).cyan(),
        style(file.display()).cyan()
    ))?;
    Ok(())
}
