//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.andromeda/config.json`) and environment.
//! The resolved `Config` is built once at startup and passed by reference (or `Arc`) to the
//! gateway, the completion client and the messenger channel.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Shared secret Meta sends back in `hub.verify_token` when no other value is configured.
pub const DEFAULT_VERIFY_TOKEN: &str = "andromeda-webhook-token";

/// Instruction sent as the Gemini `systemInstruction` unless `completion.systemPrompt` is set.
pub const DEFAULT_SYSTEM_PROMPT: &str = "Sos la IA Interestellar de Andrómeda, la asistente de la página. \
Respondé siempre en el idioma del usuario, con un tono cálido y cercano. \
Sé breve: como máximo tres oraciones, sin markdown, porque la respuesta se muestra en Messenger. \
Si no sabés algo, decilo y ofrecé derivar la consulta a una persona del equipo.";

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP listener settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Messenger Platform (Graph API) settings.
    #[serde(default)]
    pub messenger: MessengerConfig,

    /// Text-completion (Gemini) settings.
    #[serde(default)]
    pub completion: CompletionConfig,
}

/// Gateway bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Listening port (default 3000). Overridden by PORT env.
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "0.0.0.0"; the platform must reach the webhook from outside).
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

/// Messenger page credentials and Graph API location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessengerConfig {
    /// Long-lived page access token. Overridden by PAGE_ACCESS_TOKEN env.
    #[serde(default)]
    pub page_access_token: Option<String>,

    /// Token expected in `hub.verify_token` during the subscription handshake. Overridden by VERIFY_TOKEN env.
    #[serde(default = "default_verify_token")]
    pub verify_token: String,

    /// Graph API root (no version segment).
    #[serde(default = "default_graph_api_base")]
    pub graph_api_base: String,

    /// Graph API version segment, e.g. "v21.0".
    #[serde(default = "default_graph_api_version")]
    pub graph_api_version: String,
}

/// Gemini generateContent settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionConfig {
    /// Gemini API key. Overridden by GEMINI_API_KEY env.
    #[serde(default)]
    pub api_key: Option<String>,

    /// API root up to and including the version, e.g. `https://generativelanguage.googleapis.com/v1beta`.
    #[serde(default = "default_completion_base_url")]
    pub base_url: String,

    /// Model id used in `models/{model}:generateContent`.
    #[serde(default = "default_completion_model")]
    pub model: String,

    /// Overrides [`DEFAULT_SYSTEM_PROMPT`].
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// User text longer than this (in chars) is truncated before it is sent.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,

    /// Per-request timeout in seconds.
    #[serde(default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_gateway_port() -> u16 {
    3000
}

fn default_gateway_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_verify_token() -> String {
    DEFAULT_VERIFY_TOKEN.to_string()
}

fn default_graph_api_base() -> String {
    "https://graph.facebook.com".to_string()
}

fn default_graph_api_version() -> String {
    "v21.0".to_string()
}

fn default_completion_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_completion_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_max_input_chars() -> usize {
    2000
}

fn default_completion_timeout_secs() -> u64 {
    30
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            page_access_token: None,
            verify_token: default_verify_token(),
            graph_api_base: default_graph_api_base(),
            graph_api_version: default_graph_api_version(),
        }
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_completion_base_url(),
            model: default_completion_model(),
            system_prompt: None,
            max_input_chars: default_max_input_chars(),
            timeout_secs: default_completion_timeout_secs(),
        }
    }
}

impl CompletionConfig {
    /// System instruction to send: configured prompt when non-empty, else the built-in one.
    pub fn system_prompt(&self) -> &str {
        self.system_prompt
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SYSTEM_PROMPT)
    }
}

/// Trimmed, non-empty value of an env var.
fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| non_empty(&s))
}

fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

/// Resolve the page access token: env PAGE_ACCESS_TOKEN overrides config.
pub fn resolve_page_access_token(config: &Config) -> Option<String> {
    env_value("PAGE_ACCESS_TOKEN").or_else(|| {
        config
            .messenger
            .page_access_token
            .as_deref()
            .and_then(non_empty)
    })
}

/// Resolve the Gemini API key: env GEMINI_API_KEY overrides config.
pub fn resolve_gemini_api_key(config: &Config) -> Option<String> {
    env_value("GEMINI_API_KEY").or_else(|| config.completion.api_key.as_deref().and_then(non_empty))
}

/// Resolve the verify token: env VERIFY_TOKEN overrides config; falls back to the compiled-in token.
pub fn resolve_verify_token(config: &Config) -> String {
    env_value("VERIFY_TOKEN")
        .or_else(|| non_empty(&config.messenger.verify_token))
        .unwrap_or_else(default_verify_token)
}

/// Resolve the listening port: env PORT overrides config when it parses as a port number.
pub fn resolve_port(config: &Config) -> u16 {
    match env_value("PORT") {
        Some(p) => match p.parse::<u16>() {
            Ok(port) => port,
            Err(_) => {
                log::warn!("ignoring PORT={:?}: not a valid port number", p);
                config.gateway.port
            }
        },
        None => config.gateway.port,
    }
}

/// Fold environment overrides into the config so the rest of the process sees one explicit value.
pub fn apply_env_overrides(mut config: Config) -> Config {
    config.gateway.port = resolve_port(&config);
    config.messenger.page_access_token = resolve_page_access_token(&config);
    config.messenger.verify_token = resolve_verify_token(&config);
    config.completion.api_key = resolve_gemini_api_key(&config);
    config
}

/// Copy of the config with credentials masked, for printing.
pub fn redacted(config: &Config) -> Config {
    let mask = |v: &Option<String>| v.as_ref().map(|_| "********".to_string());
    let mut out = config.clone();
    out.messenger.page_access_token = mask(&config.messenger.page_access_token);
    out.completion.api_key = mask(&config.completion.api_key);
    out.messenger.verify_token = "********".to_string();
    out
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("ANDROMEDA_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".andromeda").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path, or the default path (or ANDROMEDA_CONFIG_PATH). Missing file => default config.
/// Environment overrides are applied before returning. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((apply_env_overrides(config), path))
}
