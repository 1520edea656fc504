use super::types::*;
use crate::config::{env_var_pattern, expand_env_vars, expand_tilde};
use crate::source::normalize_source_name;
use reqwest::Url;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml_string = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(e) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        )),
        other => other,
    })
}

/// Parse and validate config YAML, expanding `$env{VAR}` placeholders first.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    let yaml_string = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml_string)?;

    let mut config: Config = serde_yaml::from_str(&yaml_string)?;
    config.storage.path = expand_tilde(&config.storage.path);

    validate_config(&config)?;
    Ok(config)
}

fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    // Placeholders left in comment lines never reach the parsed config
    let mut unexpanded_vars: Vec<String> = yaml_string
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .flat_map(|line| env_var_pattern().captures_iter(line))
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .collect();

    if unexpanded_vars.is_empty() {
        return Ok(());
    }

    unexpanded_vars.sort();
    unexpanded_vars.dedup();

    Err(ConfigError::Validation(format!(
        "environment variables are not set: {}\n\
         \n\
         Export them before starting, or replace the placeholders in the config file.",
        unexpanded_vars.join(", ")
    )))
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.sources.is_empty() {
        errors.push("sources: at least one source must be configured".to_string());
    }

    let mut seen = HashSet::new();
    for name in &config.sources {
        let normalized = normalize_source_name(name);
        if normalized.is_empty() {
            errors.push("sources: source names cannot be empty".to_string());
        } else if !seen.insert(normalized.to_lowercase()) {
            errors.push(format!("sources: '{}' is listed more than once", name));
        }
    }

    if config.source.page_size == 0 || config.source.page_size > 1000 {
        errors.push(format!(
            "source.page_size: must be between 1 and 1000, got {}",
            config.source.page_size
        ));
    }

    match Url::parse(&config.source.bridge_url) {
        Ok(url) if !url.cannot_be_a_base() => {}
        _ => errors.push(format!(
            "source.bridge_url: '{}' is not a valid base URL",
            config.source.bridge_url
        )),
    }

    if let Some(sink) = &config.sink {
        if sink.bot_token.trim().is_empty() {
            errors.push("sink.bot_token: cannot be empty".to_string());
        }
        if sink.chat_id.trim().is_empty() {
            errors.push("sink.chat_id: cannot be empty".to_string());
        }
        if Url::parse(&sink.api_url).is_err() {
            errors.push(format!("sink.api_url: '{}' is not a valid URL", sink.api_url));
        }
    }

    if let Some(proxy) = &config.network.proxy {
        match Url::parse(proxy) {
            Ok(url) if matches!(url.scheme(), "socks5" | "socks5h" | "http" | "https") => {}
            _ => errors.push(format!(
                "network.proxy: '{}' must be a socks5://, socks5h://, http:// or https:// URL",
                proxy
            )),
        }
    }

    if config.web.listen.parse::<SocketAddr>().is_err() {
        errors.push(format!(
            "web.listen: '{}' is not a valid socket address",
            config.web.listen
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const MINIMAL: &str = r#"
sources:
  - durov
  - "@telegram"
source:
  bridge_url: http://127.0.0.1:8081
storage:
  path: /tmp/relay.duckdb
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = parse_config(MINIMAL).unwrap();

        assert_eq!(config.sources, vec!["durov", "@telegram"]);
        assert_eq!(config.source.page_size, 100);
        assert_eq!(config.source.timeout, Duration::from_secs(30));
        assert_eq!(config.source.warm_up_dialogs, 200);
        assert!(config.sink.is_none());
        assert_eq!(config.relay.max_retries, 3);
        assert_eq!(config.relay.delay_between_messages, Duration::from_secs(1));
        assert!(config.network.proxy.is_none());
        assert_eq!(config.web.listen, "127.0.0.1:8000");
    }

    #[test]
    fn test_duplicate_sources_rejected_after_normalization() {
        let yaml = MINIMAL.replace("\"@telegram\"", "\"@durov\"");
        let err = parse_config(&yaml).unwrap_err();
        assert!(err.to_string().contains("listed more than once"));
    }

    #[test]
    fn test_collects_all_validation_errors() {
        let yaml = r#"
sources: []
source:
  bridge_url: not-a-url
  page_size: 0
network:
  proxy: ftp://example.com
storage:
  path: /tmp/relay.duckdb
web:
  listen: nowhere
"#;
        match parse_config(yaml) {
            Err(ConfigError::ValidationList(errors)) => assert_eq!(errors.len(), 5),
            other => panic!("expected validation errors, got {other:?}"),
        }
    }

    #[test]
    fn test_unset_env_var_is_reported() {
        let yaml = format!(
            "{}sink:\n  bot_token: $env{{CHANRELAY_TEST_UNSET_TOKEN}}\n  chat_id: '@warehouse'\n",
            MINIMAL
        );
        let err = parse_config(&yaml).unwrap_err();
        assert!(err.to_string().contains("CHANRELAY_TEST_UNSET_TOKEN"));
    }

    #[test]
    fn test_sink_section_with_env_token() {
        std::env::set_var("CHANRELAY_TEST_SET_TOKEN", "123:abc");
        let yaml = format!(
            "{}sink:\n  bot_token: $env{{CHANRELAY_TEST_SET_TOKEN}}\n  chat_id: '@warehouse'\n  timeout: 10s\n",
            MINIMAL
        );
        let config = parse_config(&yaml).unwrap();
        std::env::remove_var("CHANRELAY_TEST_SET_TOKEN");

        let sink = config.sink.unwrap();
        assert_eq!(sink.bot_token, "123:abc");
        assert_eq!(sink.chat_id, "@warehouse");
        assert_eq!(sink.api_url, "https://api.telegram.org");
        assert_eq!(sink.timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_placeholder_in_comment_is_ignored() {
        let yaml = format!(
            "# Set the token with $env{{CHANRELAY_TEST_COMMENTED_VAR}}\n{}  # bot_token: $env{{CHANRELAY_TEST_COMMENTED_VAR}}\n",
            MINIMAL
        );
        let config = parse_config(&yaml).unwrap();
        assert_eq!(config.sources.len(), 2);
        assert!(config.sink.is_none());
    }

    #[test]
    fn test_starter_config_parses_with_token_set() {
        std::env::set_var("CHANRELAY_BOT_TOKEN", "42:starter");
        let config = parse_config(&crate::config::generate::generate_starter_config()).unwrap();
        assert_eq!(config.sink.unwrap().bot_token, "42:starter");
    }
}
