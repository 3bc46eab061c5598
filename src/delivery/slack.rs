//! Slack incoming-webhook rendering and transport.
//!
//! A payload becomes one message with a single colored attachment whose
//! blocks are: summary section (title, optional button), divider, then one
//! section per result entry.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::ReportError;
use crate::models::{Accessory, Icon, ResultEntry};

use super::{Payload, WebhookTransport};

/// Slack rejects section text longer than this.
const MAX_SECTION_TEXT: usize = 3000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Serialize)]
pub struct SlackMessage {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_emoji: Option<String>,
    /// Notification fallback shown by clients that do not render blocks.
    pub text: String,
    pub attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Serialize)]
pub struct SlackAttachment {
    pub color: String,
    pub blocks: Vec<Block>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Section {
        text: TextObject,
        #[serde(skip_serializing_if = "Option::is_none")]
        accessory: Option<ButtonElement>,
    },
    Divider,
}

#[derive(Debug, Serialize)]
pub struct TextObject {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

impl TextObject {
    fn mrkdwn(text: String) -> Self {
        Self {
            kind: "mrkdwn",
            text: truncate_chars(&escape_mrkdwn(&text), MAX_SECTION_TEXT),
        }
    }

    fn plain(text: String) -> Self {
        Self {
            kind: "plain_text",
            text,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ButtonElement {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: TextObject,
    pub url: String,
}

impl From<&Accessory> for ButtonElement {
    fn from(accessory: &Accessory) -> Self {
        Self {
            kind: "button",
            text: TextObject::plain(accessory.text.clone()),
            url: accessory.url.clone(),
        }
    }
}

impl Block {
    fn entry(entry: &ResultEntry) -> Self {
        Block::Section {
            text: TextObject::mrkdwn(entry.text()),
            accessory: None,
        }
    }
}

impl SlackMessage {
    pub fn from_payload(payload: &Payload) -> Self {
        let envelope = &payload.envelope;
        let (icon_url, icon_emoji) = match &envelope.icon {
            Icon::Url(url) => (Some(url.clone()), None),
            Icon::Emoji(emoji) => (None, Some(emoji.clone())),
        };

        let mut blocks = Vec::with_capacity(super::ENVELOPE_BLOCKS + payload.lines.len());
        blocks.push(Block::Section {
            text: TextObject::mrkdwn(format!("*{}*", envelope.title)),
            accessory: envelope.accessory.as_ref().map(ButtonElement::from),
        });
        blocks.push(Block::Divider);
        blocks.extend(payload.lines.iter().map(Block::entry));

        Self {
            username: envelope.username.clone(),
            icon_url,
            icon_emoji,
            text: escape_mrkdwn(&envelope.title),
            attachments: vec![SlackAttachment {
                color: envelope.color.hex().to_string(),
                blocks,
            }],
        }
    }
}

/// Escape the characters Slack treats as control sequences in mrkdwn.
fn escape_mrkdwn(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Cut `text` to at most `max` characters, marking the cut with an ellipsis.
fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Slack incoming-webhook client.
pub struct SlackWebhook {
    client: reqwest::Client,
}

impl SlackWebhook {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self { client }
    }
}

#[async_trait]
impl WebhookTransport for SlackWebhook {
    async fn send(&self, url: &str, payload: &Payload) -> Result<(), ReportError> {
        let message = SlackMessage::from_payload(payload);
        let body = serde_json::to_string(&message)?;

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ReportError::Delivery(format!(
                "webhook returned HTTP {}: {}",
                status, body
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::delivery::chunk;
    use crate::models::document::GLOBAL_LABEL;
    use crate::models::{MessageDocument, RunSummary};

    fn failed_document(icon: Icon) -> MessageDocument {
        let mut doc = MessageDocument::new(GLOBAL_LABEL, icon, "CI bot");
        doc.enter_suite();
        doc.push_pass("A foo".into()).unwrap();
        doc.push_fail("A bar".into(), "boom".into()).unwrap();
        doc.finalize(RunSummary { passed: 1, failed: 1 }, Some("https://video/1"))
            .unwrap();
        doc
    }

    fn first_payload(doc: &MessageDocument) -> Payload {
        chunk(doc, 48).next().unwrap()
    }

    #[test]
    fn message_has_expected_shape() {
        let doc = failed_document(Icon::Emoji(":test_tube:".into()));
        let value = serde_json::to_value(SlackMessage::from_payload(&first_payload(&doc))).unwrap();

        assert_eq!(value["username"], "CI bot");
        assert_eq!(value["icon_emoji"], ":test_tube:");
        assert!(value.get("icon_url").is_none());
        assert_eq!(value["attachments"][0]["color"], "#e01e5a");

        let blocks = value["attachments"][0]["blocks"].as_array().unwrap();
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0]["type"], "section");
        assert_eq!(blocks[0]["text"]["text"], "*Test finished. 1/2 ok*");
        assert_eq!(blocks[0]["accessory"]["type"], "button");
        assert_eq!(blocks[0]["accessory"]["url"], "https://video/1");
        assert_eq!(blocks[1]["type"], "divider");
        assert_eq!(blocks[2]["text"]["text"], "✅ A foo");
        assert_eq!(blocks[3]["text"]["text"], "⛔ A bar - error: boom");
        assert!(blocks[2].get("accessory").is_none());

        // Notification fallback only; results live in the blocks.
        assert_eq!(value["text"], "Test finished. 1/2 ok");
    }

    #[test]
    fn icon_url_replaces_emoji() {
        let doc = failed_document(Icon::Url("https://icon.png".into()));
        let value = serde_json::to_value(SlackMessage::from_payload(&first_payload(&doc))).unwrap();
        assert_eq!(value["icon_url"], "https://icon.png");
        assert!(value.get("icon_emoji").is_none());
    }

    #[test]
    fn control_characters_are_escaped() {
        let mut doc = MessageDocument::new(GLOBAL_LABEL, Icon::Emoji(":x:".into()), "bot");
        doc.push_fail("renders <App/>".into(), "a & b > c".into()).unwrap();
        doc.finalize(RunSummary { passed: 0, failed: 1 }, None).unwrap();

        let value = serde_json::to_value(SlackMessage::from_payload(&first_payload(&doc))).unwrap();
        assert_eq!(
            value["attachments"][0]["blocks"][2]["text"]["text"],
            "⛔ renders &lt;App/&gt; - error: a &amp; b &gt; c"
        );
    }

    #[test]
    fn long_section_text_is_truncated() {
        let long = "x".repeat(MAX_SECTION_TEXT + 10);
        let text = TextObject::mrkdwn(long).text;
        assert_eq!(text.chars().count(), MAX_SECTION_TEXT);
        assert!(text.ends_with('…'));
        assert_eq!(truncate_chars("short", 10), "short");
    }

    /// Accept one request, answer with `status`, and hand back the request body.
    async fn serve_once(listener: TcpListener, status: &'static str) -> String {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let raw = String::from_utf8_lossy(&buf);
            if let Some(header_end) = raw.find("\r\n\r\n") {
                let content_length = raw[..header_end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }
        let response = format!("HTTP/1.1 {}\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok", status);
        socket.write_all(response.as_bytes()).await.unwrap();
        let raw = String::from_utf8_lossy(&buf).to_string();
        raw.split_once("\r\n\r\n").map(|(_, b)| b.to_string()).unwrap_or_default()
    }

    #[tokio::test]
    async fn posts_json_and_reports_http_errors() {
        let Ok(listener) = TcpListener::bind("127.0.0.1:0").await else {
            // Some sandboxes disallow binding even on loopback.
            return;
        };
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        let server = tokio::spawn(serve_once(listener, "500 Internal Server Error"));

        let doc = failed_document(Icon::Emoji(":test_tube:".into()));
        let err = SlackWebhook::new()
            .send(&url, &first_payload(&doc))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("HTTP 500"));

        let body: serde_json::Value = serde_json::from_str(&server.await.unwrap()).unwrap();
        assert_eq!(body["attachments"][0]["blocks"][1]["type"], "divider");
    }

    #[tokio::test]
    async fn success_status_is_ok() {
        let Ok(listener) = TcpListener::bind("127.0.0.1:0").await else {
            return;
        };
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        let server = tokio::spawn(serve_once(listener, "200 OK"));

        let doc = failed_document(Icon::Emoji(":test_tube:".into()));
        SlackWebhook::new()
            .send(&url, &first_payload(&doc))
            .await
            .unwrap();
        server.await.unwrap();
    }
}
