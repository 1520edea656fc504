use super::{normalize_source_name, SourceClient, SourceError, SourceItem, SourceSession};
use crate::config::types::SourceConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Deserialize;

/// Message as served by the history bridge.
#[derive(Debug, Deserialize)]
struct BridgeMessage {
    id: i64,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    caption: Option<String>,
    date: DateTime<Utc>,
}

impl From<BridgeMessage> for SourceItem {
    fn from(message: BridgeMessage) -> Self {
        let text = message
            .text
            .filter(|t| !t.trim().is_empty())
            .or(message.caption);
        SourceItem {
            id: message.id,
            text,
            timestamp: message.date,
        }
    }
}

/// Source adapter for an HTTP bridge in front of the messaging network.
///
/// The bridge owns the network session (and any tunnel to reach it); this
/// client only reads channel history from it.
#[derive(Debug, Clone)]
pub struct HttpBridgeClient {
    base_url: Url,
    client: reqwest::Client,
    warm_up_dialogs: usize,
}

impl HttpBridgeClient {
    pub fn new(config: &SourceConfig, proxy: Option<&str>) -> Result<Self, SourceError> {
        let base_url = Url::parse(&config.bridge_url)
            .map_err(|e| SourceError::InvalidUrl(format!("{}: {}", config.bridge_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(SourceError::InvalidUrl(config.bridge_url.clone()));
        }

        let mut builder = reqwest::Client::builder().timeout(config.timeout);
        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }

        Ok(Self {
            base_url,
            client: builder.build()?,
            warm_up_dialogs: config.warm_up_dialogs,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, SourceError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SourceError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl SourceClient for HttpBridgeClient {
    async fn connect(&self) -> Result<Box<dyn SourceSession>, SourceError> {
        if self.warm_up_dialogs > 0 {
            // Listing dialogs makes the bridge resolve every peer it knows
            // about, so handle lookups during the run do not miss its cache.
            let mut url = self.endpoint(&["dialogs"])?;
            url.query_pairs_mut()
                .append_pair("limit", &self.warm_up_dialogs.to_string());

            tracing::info!(limit = self.warm_up_dialogs, "Warming up source bridge dialog cache");
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| SourceError::Connect(e.to_string()))?;
            if !response.status().is_success() {
                return Err(SourceError::Status {
                    status: response.status().as_u16(),
                    message: response.text().await.unwrap_or_default(),
                });
            }
        }

        Ok(Box::new(HttpBridgeSession {
            client: self.clone(),
        }))
    }
}

struct HttpBridgeSession {
    client: HttpBridgeClient,
}

#[async_trait]
impl SourceSession for HttpBridgeSession {
    async fn fetch_recent(
        &self,
        source: &str,
        limit: usize,
    ) -> Result<Vec<SourceItem>, SourceError> {
        let source = normalize_source_name(source);
        let mut url = self.client.endpoint(&["channels", source, "messages"])?;
        url.query_pairs_mut().append_pair("limit", &limit.to_string());

        let response = self.client.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(SourceError::Status {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let messages: Vec<BridgeMessage> = response.json().await?;
        let mut items: Vec<SourceItem> = messages.into_iter().map(SourceItem::from).collect();
        items.truncate(limit);
        Ok(items)
    }

    async fn close(&self) {
        tracing::debug!(bridge = %self.client.base_url, "Source bridge session closed");
    }
}
