//! Renderings of a relayed message, from richest to plainest.

use crate::source::normalize_source_name;
use serde::Serialize;

const LINK_LABEL: &str = "View Original Message";

/// Markup flavour a rendering is sent with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderFormat {
    Markdown,
    Html,
    Plain,
}

impl RenderFormat {
    /// The order the relay sender tries formats in.
    pub const FALLBACK_CHAIN: [RenderFormat; 3] =
        [RenderFormat::Markdown, RenderFormat::Html, RenderFormat::Plain];

    /// Value of the Bot API `parse_mode` field, `None` for plain text.
    pub fn parse_mode(self) -> Option<&'static str> {
        match self {
            RenderFormat::Markdown => Some("MarkdownV2"),
            RenderFormat::Html => Some("HTML"),
            RenderFormat::Plain => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub format: RenderFormat,
    pub text: String,
}

/// Public link back to a message.
///
/// Handles map to `https://t.me/{handle}/{id}`. Numeric channel ids of the
/// form `-100NNNN` map to the private form `https://t.me/c/NNNN/{id}`.
pub fn message_link(source: &str, message_id: i64) -> String {
    let source = normalize_source_name(source);
    if let Some(internal) = source.strip_prefix("-100") {
        if !internal.is_empty() && internal.bytes().all(|b| b.is_ascii_digit()) {
            return format!("https://t.me/c/{}/{}", internal, message_id);
        }
    }
    format!("https://t.me/{}/{}", source, message_id)
}

pub fn render(format: RenderFormat, text: &str, link: &str) -> RenderedMessage {
    let text = match format {
        RenderFormat::Markdown => format!(
            "{}\n\n🔗 [{}]({})",
            escape_markdown(text),
            escape_markdown(LINK_LABEL),
            escape_markdown_url(link)
        ),
        RenderFormat::Html => format!(
            "{}\n\n🔗 <a href=\"{}\">{}</a>",
            escape_html(text),
            escape_html(link),
            LINK_LABEL
        ),
        RenderFormat::Plain => format!("{}\n\n🔗 {}:\n{}", text, LINK_LABEL, link),
    };
    RenderedMessage { format, text }
}

fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(
            c,
            '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '>' | '#' | '+' | '-' | '=' | '|'
                | '{' | '}' | '.' | '!' | '\\'
        ) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

// Inside (...) of an inline link only ')' and '\' need escaping.
fn escape_markdown_url(url: &str) -> String {
    url.replace('\\', "\\\\").replace(')', "\\)")
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
