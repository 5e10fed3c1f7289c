pub mod config;
pub mod download;
pub mod verify;

use crate::cli::{Commands, ConfigAction};

// Re-export all handlers
pub use config::handle_config;
pub use download::handle_download;
pub use verify::handle_verify;

/// Config validation is skipped for commands that inspect or repair the file
pub fn should_skip_config_validation(command: &Commands) -> bool {
    matches!(
        command,
        Commands::Config {
            action: ConfigAction::Path | ConfigAction::Init { .. }
        }
    )
}
