//! Communication channels (Messenger).
//!
//! A channel knows how to parse its inbound webhook payload and how to deliver a reply to one
//! conversation. The router only talks to [`ChannelHandle`].

mod messenger;

pub use messenger::{
    Entry, EventMessage, MessagingEvent, MessengerChannel, MessengerError, OutboundReply,
    Participant, WebhookPayload, PAGE_OBJECT,
};

use async_trait::async_trait;

/// Handle to a channel that can deliver replies.
#[async_trait]
pub trait ChannelHandle: Send + Sync {
    /// Channel id (e.g. "messenger").
    fn id(&self) -> &str;
    /// Send a text message to a conversation (Messenger PSID). Missing credentials are logged and count as sent.
    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), String>;
}
