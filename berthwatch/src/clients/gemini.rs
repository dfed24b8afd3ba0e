// berthwatch/src/clients/gemini.rs
//
// Gemini generateContent client — Assistant impl.
//
// The snapshot and the operator's question go in one user turn; the fixed
// operational instruction goes in `system_instruction`. Prompt wording lives
// in chat.rs, not here.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{check_status, http_client, network, parse, Assistant};
use crate::error::ClientError;

const SERVICE: &str = "gemini";
pub const API_BASE: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateResponse {
    fn text(self) -> Option<String> {
        let text: String = self.candidates.into_iter()
            .next()?
            .content?
            .parts.into_iter()
            .filter_map(|p| p.text)
            .collect::<Vec<_>>()
            .join("");
        if text.trim().is_empty() { None } else { Some(text) }
    }
}

pub struct GeminiClient {
    http:    reqwest::Client,
    url:     String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(api_base: &str, model: &str, api_key: &str, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self {
            http:    http_client(SERVICE, timeout)?,
            url:     format!("{}/v1beta/models/{}:generateContent", api_base.trim_end_matches('/'), model),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl Assistant for GeminiClient {
    async fn ask(&self, system_instruction: &str, snapshot: &str, query: &str) -> Result<String, ClientError> {
        let body = json!({
            "system_instruction": { "parts": [{ "text": system_instruction }] },
            "contents": [{
                "role":  "user",
                "parts": [{ "text": format!("Current port dataset:\n{snapshot}\n\nOperator question: {query}") }],
            }],
        });
        let resp = self.http.post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send().await.map_err(network(SERVICE))?;
        let reply: GenerateResponse = check_status(SERVICE, resp).await?
            .json().await.map_err(parse(SERVICE))?;
        reply.text().ok_or(ClientError::Parse { service: SERVICE, message: "empty candidate".into() })
    }
}
