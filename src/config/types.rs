use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Sources in the order each run visits them.
    pub sources: Vec<String>,
    pub source: SourceConfig,
    /// Without a sink every new message is logged without being relayed.
    #[serde(default)]
    pub sink: Option<SinkConfig>,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub web: WebConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub bridge_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "default_warm_up_dialogs")]
    pub warm_up_dialogs: usize,
}

fn default_page_size() -> usize {
    100
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_warm_up_dialogs() -> usize {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub bot_token: String,
    pub chat_id: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default)]
    pub disable_link_preview: bool,
}

fn default_api_url() -> String {
    "https://api.telegram.org".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_delay_between_messages", with = "humantime_serde")]
    pub delay_between_messages: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            delay_between_messages: default_delay_between_messages(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_delay_between_messages() -> Duration {
    Duration::from_secs(1)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Proxy URL (`socks5://…`, `http://…`) for both source and sink traffic.
    #[serde(default)]
    pub proxy: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:8000".to_string()
}
