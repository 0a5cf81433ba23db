//! Messenger channel: webhook payload types and Send API (`/me/messages`) via Graph API.

use crate::channels::ChannelHandle;
use crate::config::Config;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// `object` value Meta uses for page subscriptions.
pub const PAGE_OBJECT: &str = "page";

/// Webhook POST body: `{ "object": "page", "entry": [...] }`.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub entry: Vec<Entry>,
}

impl WebhookPayload {
    pub fn is_page(&self) -> bool {
        self.object == PAGE_OBJECT
    }
}

/// One entry per subscribed page.
#[derive(Debug, Clone, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub messaging: Vec<MessagingEvent>,
}

/// One messaging occurrence: a message, a postback, or something we do not answer (reads, deliveries).
#[derive(Debug, Clone, Deserialize)]
pub struct MessagingEvent {
    #[serde(default)]
    pub sender: Option<Participant>,
    #[serde(default)]
    pub message: Option<EventMessage>,
    /// Postback payload is kept opaque; only its presence matters.
    #[serde(default)]
    pub postback: Option<serde_json::Value>,
}

impl MessagingEvent {
    /// Page-scoped sender id, if present and non-empty.
    pub fn sender_psid(&self) -> Option<&str> {
        self.sender
            .as_ref()
            .map(|s| s.id.as_str())
            .filter(|id| !id.is_empty())
    }

    /// Message text, if the event carries a text message.
    pub fn text(&self) -> Option<&str> {
        self.message
            .as_ref()
            .and_then(|m| m.text.as_deref())
            .filter(|t| !t.is_empty())
    }

    pub fn is_postback(&self) -> bool {
        matches!(self.postback, Some(ref v) if !v.is_null())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventMessage {
    #[serde(default)]
    pub mid: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

/// Send API body: `{ "recipient": { "id" }, "message": { "text" } }`.
#[derive(Debug, Serialize)]
pub struct OutboundReply<'a> {
    pub recipient: Recipient<'a>,
    pub message: OutboundText<'a>,
}

#[derive(Debug, Serialize)]
pub struct Recipient<'a> {
    pub id: &'a str,
}

#[derive(Debug, Serialize)]
pub struct OutboundText<'a> {
    pub text: &'a str,
}

impl<'a> OutboundReply<'a> {
    pub fn new(psid: &'a str, text: &'a str) -> Self {
        Self {
            recipient: Recipient { id: psid },
            message: OutboundText { text },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MessengerError {
    #[error("messenger request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("messenger api error: {0}")]
    Api(String),
    #[error("page access token not configured")]
    MissingToken,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    error: Option<GraphError>,
}

/// Graph API error object (`error.message`, `error.type`, `error.code`).
#[derive(Debug, Deserialize)]
struct GraphError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default, rename = "type")]
    typ: Option<String>,
    #[serde(default)]
    code: Option<i64>,
}

impl GraphError {
    fn describe(&self) -> String {
        let message = self.message.as_deref().unwrap_or("unknown error");
        match (&self.typ, self.code) {
            (Some(t), Some(c)) => format!("{} ({} {})", message, t, c),
            (Some(t), None) => format!("{} ({})", message, t),
            (None, Some(c)) => format!("{} ({})", message, c),
            (None, None) => message.to_string(),
        }
    }
}

/// Messenger channel connector: sends replies through the Send API with the page access token.
pub struct MessengerChannel {
    id: String,
    token: Option<String>,
    messages_url: String,
    client: reqwest::Client,
}

impl MessengerChannel {
    pub fn new(config: &Config) -> Self {
        let m = &config.messenger;
        let messages_url = format!(
            "{}/{}/me/messages",
            m.graph_api_base.trim_end_matches('/'),
            m.graph_api_version.trim_matches('/')
        );
        Self {
            id: "messenger".to_string(),
            token: m
                .page_access_token
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
            messages_url,
            client: reqwest::Client::new(),
        }
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Send a text message to a PSID. Returns the Graph `message_id` when Meta reports one.
    pub async fn send_text(&self, psid: &str, text: &str) -> Result<Option<String>, MessengerError> {
        let token = self.token.as_ref().ok_or(MessengerError::MissingToken)?;
        let body = OutboundReply::new(psid, text);
        let res = self
            .client
            .post(&self.messages_url)
            .query(&[("access_token", token.as_str())])
            .json(&body)
            .send()
            .await?;
        let status = res.status();
        let raw = res.text().await?;
        let data: Option<SendResponse> = serde_json::from_str(&raw).ok();
        if let Some(err) = data.as_ref().and_then(|d| d.error.as_ref()) {
            return Err(MessengerError::Api(format!("{} {}", status, err.describe())));
        }
        if !status.is_success() {
            return Err(MessengerError::Api(format!("{} {}", status, raw)));
        }
        Ok(data.and_then(|d| d.message_id))
    }
}

#[async_trait]
impl ChannelHandle for MessengerChannel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), String> {
        match self.send_text(conversation_id, text).await {
            Ok(message_id) => {
                log::info!(
                    "messenger: reply sent to {} (message_id {})",
                    conversation_id,
                    message_id.as_deref().unwrap_or("-")
                );
                Ok(())
            }
            Err(MessengerError::MissingToken) => {
                log::error!(
                    "messenger: no PAGE_ACCESS_TOKEN configured, not replying to {}",
                    conversation_id
                );
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }
}
