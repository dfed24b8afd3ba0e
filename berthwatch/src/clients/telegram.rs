// berthwatch/src/clients/telegram.rs
//
// Telegram Bot API client.
//
//   sendMessage — Notifier impl, Markdown (legacy) parse mode
//   getUpdates  — long-poll for operator chat messages (bot mode)
//
// Delivery is fire-and-forget: `ok: true` from the API is the only confirmation.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{check_status, http_client, network, parse, MessageFormat, Notifier, UpdateSource};
use crate::error::ClientError;

const SERVICE: &str = "telegram";
pub const API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok:          bool,
    result:      Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat:       Chat,
    #[serde(default)]
    pub text:       Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message:   Option<Message>,
}

pub struct TelegramClient {
    http: reqwest::Client,
    base: String,
}

impl TelegramClient {
    pub fn new(api_base: &str, bot_token: &str, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self {
            http: http_client(SERVICE, timeout)?,
            base: format!("{}/bot{}", api_base.trim_end_matches('/'), bot_token),
        })
    }

    async fn call<T: for<'de> Deserialize<'de>>(&self, method: &str, body: serde_json::Value) -> Result<T, ClientError> {
        let resp = self.http.post(format!("{}/{}", self.base, method))
            .json(&body)
            .send().await.map_err(network(SERVICE))?;
        let api: ApiResponse<T> = check_status(SERVICE, resp).await?
            .json().await.map_err(parse(SERVICE))?;
        unwrap_api(api)
    }

    /// Long-poll for updates after `offset`. `poll_secs` is the server-side
    /// wait; the HTTP client timeout must exceed it.
    pub async fn get_updates(&self, offset: i64, poll_secs: u64) -> Result<Vec<Update>, ClientError> {
        let updates: Vec<Update> = self.call("getUpdates", json!({
            "offset":          offset,
            "timeout":         poll_secs,
            "allowed_updates": ["message"],
        })).await?;
        debug!(n = updates.len(), offset, "telegram getUpdates");
        Ok(updates)
    }
}

fn unwrap_api<T>(api: ApiResponse<T>) -> Result<T, ClientError> {
    match (api.ok, api.result) {
        (true, Some(r)) => Ok(r),
        (true, None)    => Err(ClientError::Parse { service: SERVICE, message: "ok response without result".into() }),
        (false, _)      => Err(ClientError::Status {
            service: SERVICE,
            status:  200,
            body:    api.description.unwrap_or_else(|| "ok=false".into()),
        }),
    }
}

#[async_trait]
impl Notifier for TelegramClient {
    async fn send_message(&self, target: &str, text: &str, format: MessageFormat) -> Result<(), ClientError> {
        let mut body = json!({ "chat_id": target, "text": text });
        if format == MessageFormat::Markdown {
            body["parse_mode"] = json!("Markdown");
        }
        let _: serde_json::Value = self.call("sendMessage", body).await?;
        Ok(())
    }
}

#[async_trait]
impl UpdateSource for TelegramClient {
    async fn poll_updates(&self, offset: i64, poll_secs: u64) -> Result<Vec<Update>, ClientError> {
        self.get_updates(offset, poll_secs).await
    }
}

/// Escape characters that legacy Markdown treats as entity delimiters.
pub fn escape_markdown(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '_' | '*' | '`' | '[') { out.push('\\'); }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn updates_deserialize_with_and_without_text() {
        let raw = r#"{"ok":true,"result":[
            {"update_id":10,"message":{"message_id":1,"chat":{"id":-100},"text":"which vessels are critical?"}},
            {"update_id":11,"message":{"message_id":2,"chat":{"id":-100}}},
            {"update_id":12}
        ]}"#;
        let api: ApiResponse<Vec<Update>> = serde_json::from_str(raw).unwrap();
        let ups = unwrap_api(api).unwrap();
        assert_eq!(ups.len(), 3);
        assert_eq!(ups[0].message.as_ref().and_then(|m| m.text.as_deref()), Some("which vessels are critical?"));
        assert!(ups[1].message.as_ref().unwrap().text.is_none());
        assert!(ups[2].message.is_none());
    }

    #[test]
    fn api_error_surfaces_description() {
        let api: ApiResponse<serde_json::Value> =
            serde_json::from_str(r#"{"ok":false,"error_code":400,"description":"Bad Request: chat not found"}"#).unwrap();
        match unwrap_api(api) {
            Err(ClientError::Status { body, .. }) => assert!(body.contains("chat not found")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn markdown_escaping() {
        assert_eq!(escape_markdown("MSC_ANNA*2"), "MSC\\_ANNA\\*2");
        assert_eq!(escape_markdown("plain 42"), "plain 42");
    }
}
