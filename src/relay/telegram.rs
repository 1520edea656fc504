use super::render::RenderedMessage;
use super::{Sink, SinkError};
use crate::config::types::SinkConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Used when a 429 carries neither `parameters.retry_after` nor a
/// `Retry-After` header.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

/// Bot API descriptions that mean the markup could not be parsed.
const FORMAT_ERROR_MARKERS: &[&str] = &[
    "can't parse entities",
    "can't find end",
    "unsupported start tag",
    "unclosed start tag",
];

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'static str>,
    disable_web_page_preview: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

/// Relays into a chat through the Telegram Bot API `sendMessage` method.
pub struct TelegramSink {
    client: reqwest::Client,
    endpoint: String,
    chat_id: String,
    disable_link_preview: bool,
}

impl TelegramSink {
    pub fn new(config: &SinkConfig, proxy: Option<&str>) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder().timeout(config.timeout);
        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }

        Ok(Self {
            client: builder.build()?,
            endpoint: format!(
                "{}/bot{}/sendMessage",
                config.api_url.trim_end_matches('/'),
                config.bot_token
            ),
            chat_id: config.chat_id.clone(),
            disable_link_preview: config.disable_link_preview,
        })
    }
}

#[async_trait]
impl Sink for TelegramSink {
    async fn send(&self, message: &RenderedMessage) -> Result<(), SinkError> {
        let request = SendMessageRequest {
            chat_id: &self.chat_id,
            text: &message.text,
            parse_mode: message.format.parse_mode(),
            disable_web_page_preview: self.disable_link_preview,
        };

        // reqwest errors carry the URL, which contains the bot token.
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| SinkError::Fatal(format!("request failed: {}", e.without_url())))?;

        let status = response.status().as_u16();
        let header_retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = response
            .text()
            .await
            .map_err(|e| SinkError::Fatal(format!("reading response failed: {}", e.without_url())))?;

        let parsed: Option<ApiResponse> = serde_json::from_str(&body).ok();
        if (200..300).contains(&status) && parsed.as_ref().map_or(true, |r| r.ok) {
            return Ok(());
        }

        Err(classify(status, parsed.unwrap_or_default(), header_retry_after, &body))
    }
}

fn classify(
    status: u16,
    response: ApiResponse,
    header_retry_after: Option<u64>,
    raw_body: &str,
) -> SinkError {
    let description = response
        .description
        .unwrap_or_else(|| raw_body.trim().to_string());
    let retry_after = response
        .parameters
        .and_then(|p| p.retry_after)
        .or(header_retry_after);

    if status == 429 || retry_after.is_some() {
        return SinkError::RateLimited {
            retry_after: retry_after
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RETRY_AFTER),
        };
    }

    let lowered = description.to_lowercase();
    if status == 400 && FORMAT_ERROR_MARKERS.iter().any(|m| lowered.contains(m)) {
        return SinkError::FormatRejected(description);
    }

    SinkError::Fatal(format!("status {}: {}", status, description))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::render::{render, RenderFormat};

    fn config(api_url: &str) -> SinkConfig {
        SinkConfig {
            bot_token: "123:abc".to_string(),
            chat_id: "@warehouse".to_string(),
            api_url: api_url.to_string(),
            timeout: Duration::from_secs(5),
            disable_link_preview: false,
        }
    }

    fn message() -> RenderedMessage {
        render(RenderFormat::Html, "hello", "https://t.me/alpha/1")
    }

    #[tokio::test]
    async fn test_send_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/bot123:abc/sendMessage")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "chat_id": "@warehouse",
                "parse_mode": "HTML"
            })))
            .with_status(200)
            .with_body(r#"{"ok":true,"result":{"message_id":5}}"#)
            .create_async()
            .await;

        let sink = TelegramSink::new(&config(&server.url()), None).unwrap();
        assert_eq!(sink.send(&message()).await, Ok(()));
        mock.assert_async().await;
    }

    #[test]
    fn test_plain_text_omits_parse_mode() {
        let plain = render(RenderFormat::Plain, "hello", "https://t.me/alpha/1");
        let body = serde_json::to_value(SendMessageRequest {
            chat_id: "@warehouse",
            text: &plain.text,
            parse_mode: plain.format.parse_mode(),
            disable_web_page_preview: true,
        })
        .unwrap();

        assert!(body.get("parse_mode").is_none());
        assert_eq!(body["disable_web_page_preview"], true);
    }

    #[tokio::test]
    async fn test_send_rate_limited() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/bot123:abc/sendMessage")
            .with_status(429)
            .with_body(
                r#"{"ok":false,"error_code":429,"description":"Too Many Requests: retry after 7","parameters":{"retry_after":7}}"#,
            )
            .create_async()
            .await;

        let sink = TelegramSink::new(&config(&server.url()), None).unwrap();
        assert_eq!(
            sink.send(&message()).await,
            Err(SinkError::RateLimited {
                retry_after: Duration::from_secs(7)
            })
        );
    }

    #[tokio::test]
    async fn test_send_format_rejected() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/bot123:abc/sendMessage")
            .with_status(400)
            .with_body(
                r#"{"ok":false,"error_code":400,"description":"Bad Request: can't parse entities: Can't find end of the entity starting at byte offset 3"}"#,
            )
            .create_async()
            .await;

        let sink = TelegramSink::new(&config(&server.url()), None).unwrap();
        assert!(matches!(
            sink.send(&message()).await,
            Err(SinkError::FormatRejected(_))
        ));
    }

    #[tokio::test]
    async fn test_send_forbidden_is_fatal() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/bot123:abc/sendMessage")
            .with_status(403)
            .with_body(r#"{"ok":false,"error_code":403,"description":"Forbidden: bot is not a member of the channel chat"}"#)
            .create_async()
            .await;

        let sink = TelegramSink::new(&config(&server.url()), None).unwrap();
        match sink.send(&message()).await {
            Err(SinkError::Fatal(reason)) => assert!(reason.contains("403")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_classify_uses_retry_after_header_fallback() {
        let error = classify(429, ApiResponse::default(), Some(3), "");
        assert_eq!(
            error,
            SinkError::RateLimited {
                retry_after: Duration::from_secs(3)
            }
        );

        let error = classify(429, ApiResponse::default(), None, "slow down");
        assert_eq!(
            error,
            SinkError::RateLimited {
                retry_after: DEFAULT_RETRY_AFTER
            }
        );
    }

    #[test]
    fn test_classify_non_json_body() {
        let error = classify(502, ApiResponse::default(), None, "Bad Gateway");
        assert_eq!(error, SinkError::Fatal("status 502: Bad Gateway".to_string()));
    }
}
