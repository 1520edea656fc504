pub mod config;
pub mod maintenance;
pub mod run;

use std::path::PathBuf;

/// Returns the resolved config path or exits with the list of searched
/// locations.
pub(crate) fn require_config_path(config_path: Option<PathBuf>) -> PathBuf {
    match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ~/.config/chanrelay/config.yml");
            eprintln!("  /etc/chanrelay/config.yml");
            eprintln!("\nUse --config <path> to specify a config file, or run 'chanrelay config init' to generate one.");
            std::process::exit(1);
        }
    }
}
