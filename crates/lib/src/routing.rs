//! Event routing: webhook payload -> per-event reply -> channel delivery.
//!
//! Inbound: each messaging event with a sender is answered at most once. Text messages go
//! through the completion backend (falling back to a fixed template), postbacks get a fixed
//! acknowledgement. Outbound: every reply goes through [`dispatch_reply`], which logs failures
//! and never returns them.

use crate::channels::{ChannelHandle, MessagingEvent, WebhookPayload};
use crate::llm::{Completion, CompletionBackend};
use futures_util::future::join_all;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;

/// Reply sent for a postback (button tap). The completion backend is not consulted.
pub const POSTBACK_ACK: &str = "🚀 Recibí tu selección, la estoy procesando.";

/// Reply used when the completion backend produced nothing; embeds the user's text verbatim.
pub fn fallback_reply(user_text: &str) -> String {
    format!(
        "🚀 Hola, soy la IA Interestellar de Andrómeda.\nRecibí tu mensaje: \"{}\".",
        user_text
    )
}

/// What the router decided to do with one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventAction {
    /// No sender id: dropped.
    NoSender,
    /// Text message: ask the completion backend.
    Complete { psid: String, text: String },
    /// Postback: fixed acknowledgement.
    Acknowledge { psid: String },
    /// Nothing to answer (delivery/read receipts, attachments without text).
    Ignore,
}

/// Classify one event. A message with text wins over a postback in the same event.
pub fn classify(event: &MessagingEvent) -> EventAction {
    let Some(psid) = event.sender_psid() else {
        return EventAction::NoSender;
    };
    if let Some(text) = event.text() {
        EventAction::Complete {
            psid: psid.to_string(),
            text: text.to_string(),
        }
    } else if event.is_postback() {
        EventAction::Acknowledge {
            psid: psid.to_string(),
        }
    } else {
        EventAction::Ignore
    }
}

/// Counts for one routed payload (for logs and tests).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteSummary {
    pub events: usize,
    pub replies: usize,
    pub skipped: usize,
}

/// Send one reply through the channel. Failures are logged, not returned.
pub async fn dispatch_reply(channel: &dyn ChannelHandle, psid: &str, text: &str) {
    if let Err(e) = channel.send_message(psid, text).await {
        log::error!("{}: send to {} failed: {}", channel.id(), psid, e);
    }
}

/// Handle one event end to end. Returns true when a reply was attempted.
async fn process_event(
    event: &MessagingEvent,
    completer: &dyn CompletionBackend,
    channel: &dyn ChannelHandle,
) -> bool {
    match classify(event) {
        EventAction::NoSender => {
            log::debug!("routing: event without sender id dropped");
            false
        }
        EventAction::Ignore => false,
        EventAction::Complete { psid, text } => {
            log::info!("routing: message from {}: {:?}", psid, text);
            let reply = match completer.complete(&text).await {
                Completion::Produced(reply) => reply,
                Completion::Unavailable => {
                    log::warn!("routing: no completion for {}, sending fallback", psid);
                    fallback_reply(&text)
                }
            };
            dispatch_reply(channel, &psid, &reply).await;
            true
        }
        EventAction::Acknowledge { psid } => {
            log::info!("routing: postback from {}", psid);
            dispatch_reply(channel, &psid, POSTBACK_ACK).await;
            true
        }
    }
}

/// Route every event of a webhook payload. Payloads whose object is not "page" are ignored.
/// Events are independent and run concurrently; each one awaits its completion before its send.
/// A panic while handling one event is caught and logged; it counts as skipped.
pub async fn route_payload(
    payload: &WebhookPayload,
    completer: &dyn CompletionBackend,
    channel: &dyn ChannelHandle,
) -> RouteSummary {
    if !payload.is_page() {
        log::debug!("routing: ignoring payload with object {:?}", payload.object);
        return RouteSummary::default();
    }
    let events: Vec<&MessagingEvent> = payload
        .entry
        .iter()
        .flat_map(|e| e.messaging.iter())
        .collect();
    let results = join_all(events.iter().map(|event| {
        AssertUnwindSafe(process_event(event, completer, channel)).catch_unwind()
    }))
    .await;
    let replies = results
        .iter()
        .filter(|r| match r {
            Ok(sent) => *sent,
            Err(_) => {
                log::error!("routing: event handler panicked");
                false
            }
        })
        .count();
    RouteSummary {
        events: events.len(),
        replies,
        skipped: events.len() - replies,
    }
}
