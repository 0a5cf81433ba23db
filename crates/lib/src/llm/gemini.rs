//! Gemini API client (`models/{model}:generateContent`).
//! Non-streaming; one system instruction plus one user turn per request.

use crate::config::Config;
use crate::llm::{Completion, CompletionBackend};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Client for the Gemini generateContent endpoint.
#[derive(Clone)]
pub struct GeminiClient {
    base_url: String,
    model: String,
    api_key: Option<String>,
    system_prompt: String,
    max_input_chars: usize,
    client: reqwest::Client,
}

#[derive(Debug, thiserror::Error)]
pub enum GeminiError {
    #[error("gemini request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("gemini api error: {0}")]
    Api(String),
    #[error("gemini api key not configured")]
    MissingApiKey,
    #[error("gemini response had no candidate text")]
    NoCandidate,
}

impl GeminiClient {
    pub fn new(config: &Config) -> Self {
        let completion = &config.completion;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(completion.timeout_secs.max(1)))
            .build()
            .unwrap_or_else(|e| {
                log::warn!("gemini: building http client failed ({}), using defaults", e);
                reqwest::Client::new()
            });
        Self {
            base_url: completion.base_url.trim_end_matches('/').to_string(),
            model: completion.model.trim().to_string(),
            api_key: completion
                .api_key
                .as_deref()
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string),
            system_prompt: completion.system_prompt().to_string(),
            max_input_chars: completion.max_input_chars,
            client,
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// POST generateContent and return the first candidate's first text part.
    pub async fn generate(&self, user_text: &str) -> Result<String, GeminiError> {
        let api_key = self.api_key.as_ref().ok_or(GeminiError::MissingApiKey)?;
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = GenerateRequest::new(
            &self.system_prompt,
            cap_chars(user_text, self.max_input_chars),
        );
        let res = self
            .client
            .post(&url)
            .query(&[("key", api_key.as_str())])
            .json(&body)
            .send()
            .await?;
        let status = res.status();
        let text = res.text().await?;
        let data: GenerateResponse = match serde_json::from_str(&text) {
            Ok(d) => d,
            Err(_) if !status.is_success() => {
                return Err(GeminiError::Api(format!("{} {}", status, text)));
            }
            Err(e) => return Err(GeminiError::Api(format!("malformed response: {}", e))),
        };
        if let Some(err) = data.error.as_ref() {
            return Err(GeminiError::Api(format!("{} {}", status, err.describe())));
        }
        if !status.is_success() {
            return Err(GeminiError::Api(format!("{} {}", status, text)));
        }
        data.first_text()
            .map(str::to_string)
            .ok_or(GeminiError::NoCandidate)
    }
}

#[async_trait]
impl CompletionBackend for GeminiClient {
    async fn complete(&self, user_text: &str) -> Completion {
        match self.generate(user_text).await {
            Ok(text) => Completion::from_text(Some(text)),
            Err(GeminiError::MissingApiKey) => {
                log::warn!("gemini: no GEMINI_API_KEY configured, replying with fallback");
                Completion::Unavailable
            }
            Err(e) => {
                log::error!("gemini: {}", e);
                Completion::Unavailable
            }
        }
    }
}

/// Truncate to at most `max` chars on a char boundary. `max == 0` disables the cap.
pub(crate) fn cap_chars(text: &str, max: usize) -> &str {
    if max == 0 {
        return text;
    }
    match text.char_indices().nth(max) {
        Some((i, _)) => {
            log::debug!("gemini: user text truncated to {} chars", max);
            &text[..i]
        }
        None => text,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: RequestContent<'a>,
    contents: Vec<RequestContent<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

impl<'a> GenerateRequest<'a> {
    fn new(system_prompt: &'a str, user_text: &'a str) -> Self {
        Self {
            system_instruction: RequestContent {
                role: None,
                parts: vec![RequestPart {
                    text: system_prompt,
                }],
            },
            contents: vec![RequestContent {
                role: Some("user"),
                parts: vec![RequestPart { text: user_text }],
            }],
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

/// `{ "error": { "code", "message", "status" } }` body returned on API failures.
#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

impl ApiError {
    fn describe(&self) -> String {
        let message = self.message.as_deref().unwrap_or("unknown error");
        match (&self.status, self.code) {
            (Some(s), _) => format!("{}: {}", s, message),
            (None, Some(c)) => format!("{}: {}", c, message),
            (None, None) => message.to_string(),
        }
    }
}

impl GenerateResponse {
    fn first_text(&self) -> Option<&str> {
        self.candidates
            .first()?
            .content
            .as_ref()?
            .parts
            .first()?
            .text
            .as_deref()
    }
}
