//! Gateway HTTP server (single port).

use crate::channels::{ChannelHandle, MessengerChannel, WebhookPayload};
use crate::config::Config;
use crate::gateway::verify::{verify_subscription, VerifyOutcome, VerifyQuery};
use crate::llm::{CompletionBackend, GeminiClient};
use crate::routing;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::sync::Arc;

/// Body of `GET /`.
pub const HEALTH_TEXT: &str = "✅ Andromeda webhook online";

/// Shared state for the gateway (config, completion backend, reply channel). Immutable after startup.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub completer: Arc<dyn CompletionBackend>,
    pub channel: Arc<dyn ChannelHandle>,
}

impl GatewayState {
    pub fn new(
        config: Config,
        completer: Arc<dyn CompletionBackend>,
        channel: Arc<dyn ChannelHandle>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            completer,
            channel,
        }
    }

    /// Wire the Gemini client and the Messenger channel from config. Missing credentials are logged, not fatal.
    pub fn from_config(config: Config) -> Self {
        let gemini = GeminiClient::new(&config);
        if !gemini.has_api_key() {
            log::warn!("GEMINI_API_KEY is not configured; every message gets the fallback reply");
        }
        let messenger = MessengerChannel::new(&config);
        if !messenger.has_token() {
            log::warn!("PAGE_ACCESS_TOKEN is not configured; replies cannot be sent to Messenger");
        }
        Self::new(config, Arc::new(gemini), Arc::new(messenger))
    }
}

/// Build the HTTP router: `GET /`, `GET /webhook`, `POST /webhook`.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/webhook", get(verify_webhook).post(receive_webhook))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

/// Run the gateway server; binds to config.gateway.bind:config.gateway.port.
/// Blocks until shutdown (Ctrl+C or SIGTERM).
pub async fn run_gateway(config: Config) -> Result<()> {
    let bind_addr = format!("{}:{}", config.gateway.bind.trim(), config.gateway.port);
    let state = GatewayState::from_config(config);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("andromeda webhook listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
/// Detached event tasks still in flight are dropped with the runtime.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

/// Logs every request line.
async fn log_request(req: Request, next: Next) -> Response {
    log::info!("request: {} {}", req.method(), req.uri().path());
    next.run(req).await
}

/// GET / returns a plain-text health line (for probes).
async fn health_http() -> &'static str {
    HEALTH_TEXT
}

/// GET /webhook — subscription handshake. Echoes the challenge on success, 403 otherwise.
async fn verify_webhook(
    State(state): State<GatewayState>,
    Query(query): Query<VerifyQuery>,
) -> Response {
    log::debug!(
        "webhook verification: mode={:?} challenge={:?}",
        query.mode,
        query.challenge
    );
    match verify_subscription(&query, &state.config.messenger.verify_token) {
        VerifyOutcome::Accepted(challenge) => {
            log::info!("webhook verified");
            (StatusCode::OK, challenge).into_response()
        }
        VerifyOutcome::Rejected => {
            log::error!("webhook verification rejected: wrong mode or verify token");
            StatusCode::FORBIDDEN.into_response()
        }
    }
}

/// POST /webhook — acknowledges with 200 right away, then routes the events on a detached task.
/// Nothing that happens on that task can change this response; failures show up only in logs.
async fn receive_webhook(State(state): State<GatewayState>, body: Bytes) -> StatusCode {
    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            log::warn!("webhook: ignoring unparseable body ({} bytes): {}", body.len(), e);
            return StatusCode::OK;
        }
    };
    let delivery = uuid::Uuid::new_v4();
    log::debug!(
        "webhook {}: {}",
        delivery,
        String::from_utf8_lossy(&body)
    );
    tokio::spawn(async move {
        let summary =
            routing::route_payload(&payload, state.completer.as_ref(), state.channel.as_ref())
                .await;
        log::info!(
            "webhook {}: {} event(s), {} reply(ies), {} skipped",
            delivery,
            summary.events,
            summary.replies,
            summary.skipped
        );
    });
    StatusCode::OK
}
