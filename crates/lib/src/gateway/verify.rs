//! Webhook subscription handshake (`GET /webhook?hub.mode=subscribe&hub.verify_token=..&hub.challenge=..`).

use serde::Deserialize;

/// Query parameters Meta sends when verifying the callback URL.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// Result of a verification attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Mode and token matched; echo this challenge with 200.
    Accepted(String),
    /// Wrong mode or token; answered with 403.
    Rejected,
}

/// Check mode and token against the configured secret. Pure: same input, same outcome.
pub fn verify_subscription(query: &VerifyQuery, expected_token: &str) -> VerifyOutcome {
    let mode_ok = query.mode.as_deref() == Some("subscribe");
    let token_ok = query.verify_token.as_deref() == Some(expected_token);
    if mode_ok && token_ok {
        VerifyOutcome::Accepted(query.challenge.clone().unwrap_or_default())
    } else {
        VerifyOutcome::Rejected
    }
}
