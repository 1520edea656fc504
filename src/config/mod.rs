pub mod generate;
pub mod parse;
pub mod types;

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub use parse::{load_config, parse_config, ConfigError};
pub use types::{Config, NetworkConfig, RelayConfig, SinkConfig, SourceConfig, StorageConfig, WebConfig};

const USER_CONFIG: &str = ".config/chanrelay/config.yml";
const SYSTEM_CONFIG: &str = "/etc/chanrelay/config.yml";

/// Matches `$env{VAR_NAME}` placeholders.
pub(crate) fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env placeholder pattern is valid")
    })
}

/// Replaces `$env{VAR}` with the variable's value. Unset variables are left
/// as-is so validation can name them.
pub fn expand_env_vars(text: &str) -> String {
    env_var_pattern()
        .replace_all(text, |caps: &regex::Captures| {
            let placeholder = &caps[0];
            std::env::var(&caps[1]).unwrap_or_else(|_| placeholder.to_string())
        })
        .to_string()
}

pub fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if let Some(rest) = path_str.strip_prefix("~/") {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(rest);
        }
    } else if path_str == "~" {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir;
        }
    }

    path.to_path_buf()
}

/// Resolves the config file: explicit path, then the per-user file, then the
/// system-wide file.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(expand_tilde(path));
    }

    if let Some(home_dir) = dirs::home_dir() {
        let user_config = home_dir.join(USER_CONFIG);
        if user_config.exists() {
            return Some(user_config);
        }
    }

    let system_config = PathBuf::from(SYSTEM_CONFIG);
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

/// Where `config init` writes when no path is given.
pub fn default_user_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(USER_CONFIG))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("CHANRELAY_TEST_A", "one");
        std::env::set_var("CHANRELAY_TEST_B", "two");
        let result = expand_env_vars("$env{CHANRELAY_TEST_A}/$env{CHANRELAY_TEST_B}");
        assert_eq!(result, "one/two");
        std::env::remove_var("CHANRELAY_TEST_A");
        std::env::remove_var("CHANRELAY_TEST_B");
    }

    #[test]
    fn test_expand_env_vars_leaves_unset_placeholders() {
        let result = expand_env_vars("token: $env{CHANRELAY_TEST_NOT_SET}");
        assert_eq!(result, "token: $env{CHANRELAY_TEST_NOT_SET}");
    }

    #[test]
    fn test_expand_env_vars_ignores_shell_syntax() {
        assert_eq!(expand_env_vars("${HOME}"), "${HOME}");
    }

    #[test]
    fn test_expand_tilde() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/data/relay.duckdb")), home.join("data/relay.duckdb"));
            assert_eq!(expand_tilde(Path::new("~")), home);
        }
        assert_eq!(expand_tilde(Path::new("/var/lib/relay.duckdb")), Path::new("/var/lib/relay.duckdb"));
        assert_eq!(expand_tilde(Path::new("relative/~")), Path::new("relative/~"));
    }

    #[test]
    fn test_explicit_config_path_wins() {
        let resolved = resolve_config_path(Some(Path::new("/opt/relay.yml")));
        assert_eq!(resolved, Some(PathBuf::from("/opt/relay.yml")));
    }
}
