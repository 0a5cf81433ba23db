//! Integration test: run the gateway on a free port against a local stand-in for the Graph and
//! Gemini APIs, then drive it over HTTP. No network access needed.

use andromeda::channels::{MessengerChannel, MessengerError};
use andromeda::config::Config;
use andromeda::gateway::{self, GatewayState};
use andromeda::routing::{fallback_reply, POSTBACK_ACK};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Clone, Copy)]
enum GeminiMode {
    Reply(&'static str),
    ServerError,
    OkWithError,
    Malformed,
    Slow(&'static str),
}

#[derive(Clone)]
struct Upstream {
    mode: GeminiMode,
    gemini_calls: Arc<AtomicUsize>,
    sends: Arc<Mutex<Vec<Value>>>,
}

impl Upstream {
    fn new(mode: GeminiMode) -> Self {
        Self {
            mode,
            gemini_calls: Arc::new(AtomicUsize::new(0)),
            sends: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn sends(&self) -> Vec<Value> {
        self.sends.lock().unwrap().clone()
    }
}

async fn mock_generate(
    State(up): State<Upstream>,
    Path(model): Path<String>,
    Query(q): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Response {
    up.gemini_calls.fetch_add(1, Ordering::SeqCst);
    assert!(model.ends_with(":generateContent"), "unexpected path {}", model);
    assert_eq!(q.get("key").map(String::as_str), Some("test-key"));
    assert!(body["systemInstruction"]["parts"][0]["text"].is_string());
    let reply = |text: &str| {
        Json(json!({
            "candidates": [{ "content": { "role": "model", "parts": [{ "text": text }] } }]
        }))
        .into_response()
    };
    match up.mode {
        GeminiMode::Reply(text) => reply(text),
        GeminiMode::Slow(text) => {
            tokio::time::sleep(Duration::from_secs(2)).await;
            reply(text)
        }
        GeminiMode::ServerError => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": { "code": 500, "message": "internal", "status": "INTERNAL" } })),
        )
            .into_response(),
        GeminiMode::OkWithError => Json(json!({
            "error": { "code": 429, "message": "quota exceeded", "status": "RESOURCE_EXHAUSTED" }
        }))
        .into_response(),
        GeminiMode::Malformed => {
            Json(json!({ "candidates": [{ "finishReason": "SAFETY" }] })).into_response()
        }
    }
}

async fn mock_send(
    State(up): State<Upstream>,
    Query(q): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    assert_eq!(q.get("access_token").map(String::as_str), Some("page-token"));
    up.sends.lock().unwrap().push(body);
    Json(json!({ "recipient_id": "1", "message_id": "m_1" }))
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind free port");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}", addr)
}

/// Starts the upstream stand-in and the gateway; returns (gateway url, upstream handle).
async fn start(mode: GeminiMode) -> (String, Upstream) {
    let upstream = Upstream::new(mode);
    let upstream_url = serve(
        Router::new()
            .route("/v21.0/me/messages", post(mock_send))
            .route("/models/:model", post(mock_generate))
            .with_state(upstream.clone()),
    )
    .await;

    let mut config = Config::default();
    config.messenger.page_access_token = Some("page-token".to_string());
    config.messenger.verify_token = "verify-me".to_string();
    config.messenger.graph_api_base = upstream_url.clone();
    config.completion.api_key = Some("test-key".to_string());
    config.completion.base_url = upstream_url;
    config.completion.timeout_secs = 5;

    let gateway_url = serve(gateway::router(GatewayState::from_config(config))).await;
    (gateway_url, upstream)
}

async fn wait_for_sends(up: &Upstream, n: usize) -> Vec<Value> {
    for _ in 0..100 {
        let sends = up.sends();
        if sends.len() >= n {
            return sends;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("expected {} send(s) within 5s, got {:?}", n, up.sends());
}

fn page_message(psid: &str, text: &str) -> Value {
    json!({
        "object": "page",
        "entry": [{ "id": "PAGE", "messaging": [
            { "sender": { "id": psid }, "recipient": { "id": "PAGE" }, "message": { "mid": "m", "text": text } }
        ] }]
    })
}

#[tokio::test]
async fn health_responds_with_text() {
    let (url, _) = start(GeminiMode::Reply("x")).await;
    let resp = reqwest::get(format!("{}/", url)).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), gateway::HEALTH_TEXT);
}

#[tokio::test]
async fn verification_echoes_challenge_and_is_idempotent() {
    let (url, _) = start(GeminiMode::Reply("x")).await;
    let verify_url = format!(
        "{}/webhook?hub.mode=subscribe&hub.verify_token=verify-me&hub.challenge=CHALLENGE_ACCEPTED",
        url
    );
    for _ in 0..2 {
        let resp = reqwest::get(&verify_url).await.unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.text().await.unwrap(), "CHALLENGE_ACCEPTED");
    }
}

#[tokio::test]
async fn verification_with_wrong_token_is_forbidden() {
    let (url, _) = start(GeminiMode::Reply("x")).await;
    let resp = reqwest::get(format!(
        "{}/webhook?hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=CHALLENGE_ACCEPTED",
        url
    ))
    .await
    .unwrap();
    assert_eq!(resp.status(), 403);
    assert!(!resp.text().await.unwrap().contains("CHALLENGE_ACCEPTED"));
}

#[tokio::test]
async fn message_is_answered_with_completion() {
    let (url, up) = start(GeminiMode::Reply("Hi there")).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/webhook", url))
        .json(&page_message("psid-1", "hello"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.text().await.unwrap().is_empty());

    let sends = wait_for_sends(&up, 1).await;
    assert_eq!(
        sends[0],
        json!({ "recipient": { "id": "psid-1" }, "message": { "text": "Hi there" } })
    );
}

#[tokio::test]
async fn completion_failure_sends_fallback() {
    let (url, up) = start(GeminiMode::ServerError).await;
    reqwest::Client::new()
        .post(format!("{}/webhook", url))
        .json(&page_message("psid-2", "hello"))
        .send()
        .await
        .unwrap();
    let sends = wait_for_sends(&up, 1).await;
    assert_eq!(sends[0]["message"]["text"], fallback_reply("hello"));
}

#[tokio::test]
async fn postback_is_acknowledged_without_completion() {
    let (url, up) = start(GeminiMode::Reply("unused")).await;
    let body = json!({
        "object": "page",
        "entry": [{ "messaging": [
            { "sender": { "id": "psid-3" }, "postback": { "title": "Empezar", "payload": "GET_STARTED" } }
        ] }]
    });
    reqwest::Client::new()
        .post(format!("{}/webhook", url))
        .json(&body)
        .send()
        .await
        .unwrap();
    let sends = wait_for_sends(&up, 1).await;
    assert_eq!(sends[0]["message"]["text"], POSTBACK_ACK);
    assert_eq!(up.gemini_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn non_page_object_and_garbage_bodies_get_200_and_no_calls() {
    let (url, up) = start(GeminiMode::Reply("x")).await;
    let client = reqwest::Client::new();
    let mut body = page_message("psid-4", "hello");
    body["object"] = json!("instagram");
    let resp = client
        .post(format!("{}/webhook", url))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let resp = client
        .post(format!("{}/webhook", url))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(up.gemini_calls.load(Ordering::SeqCst), 0);
    assert!(up.sends().is_empty());
}

#[tokio::test]
async fn post_is_acknowledged_before_slow_completion_finishes() {
    let (url, up) = start(GeminiMode::Slow("late")).await;
    let started = Instant::now();
    let resp = reqwest::Client::new()
        .post(format!("{}/webhook", url))
        .json(&page_message("psid-5", "hello"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "POST took {:?}",
        started.elapsed()
    );
    assert!(up.sends().is_empty());
    let sends = wait_for_sends(&up, 1).await;
    assert_eq!(sends[0]["message"]["text"], "late");
}

async fn fallback_for(mode: GeminiMode, psid: &str) {
    let (url, up) = start(mode).await;
    reqwest::Client::new()
        .post(format!("{}/webhook", url))
        .json(&page_message(psid, "hola"))
        .send()
        .await
        .unwrap();
    let sends = wait_for_sends(&up, 1).await;
    assert_eq!(up.gemini_calls.load(Ordering::SeqCst), 1);
    assert_eq!(sends[0]["message"]["text"], fallback_reply("hola"));
}

#[tokio::test]
async fn completion_error_field_on_200_sends_fallback() {
    fallback_for(GeminiMode::OkWithError, "psid-6").await;
}

#[tokio::test]
async fn completion_without_candidate_text_sends_fallback() {
    fallback_for(GeminiMode::Malformed, "psid-7").await;
}

async fn graph_error_on_200() -> Json<Value> {
    Json(json!({
        "error": { "message": "bad token", "type": "OAuthException", "code": 190 }
    }))
}

#[tokio::test]
async fn send_with_error_field_on_200_is_api_error() {
    let graph_url = serve(Router::new().route("/v21.0/me/messages", post(graph_error_on_200))).await;
    let mut config = Config::default();
    config.messenger.page_access_token = Some("page-token".to_string());
    config.messenger.graph_api_base = graph_url;
    let channel = MessengerChannel::new(&config);

    match channel.send_text("psid-8", "hi").await {
        Err(MessengerError::Api(msg)) => {
            assert!(msg.contains("bad token"), "unexpected message {}", msg);
            assert!(msg.contains("OAuthException 190"), "unexpected message {}", msg);
        }
        other => panic!("expected api error, got {:?}", other),
    }
}

#[tokio::test]
async fn send_with_truncated_body_is_request_error() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind free port");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        if let Ok((mut sock, _)) = listener.accept().await {
            let mut buf = [0u8; 4096];
            let _ = sock.read(&mut buf).await;
            let _ = sock
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 100\r\n\r\n{\"message_",
                )
                .await;
            let _ = sock.shutdown().await;
        }
    });

    let mut config = Config::default();
    config.messenger.page_access_token = Some("page-token".to_string());
    config.messenger.graph_api_base = format!("http://{}", addr);
    let channel = MessengerChannel::new(&config);

    match channel.send_text("psid-9", "hi").await {
        Err(MessengerError::Request(_)) => {}
        other => panic!("expected request error, got {:?}", other),
    }
}
