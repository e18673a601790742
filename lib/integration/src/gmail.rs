//! Gmail REST client used as the event source for "new email" listeners.

use crate::connector::{EventSource, TriggerEvent};
use crate::error::{ClientSetupError, EventSourceError};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

/// Gmail API base URL.
pub const GMAIL_API_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";

/// Client for the Gmail users.messages API.
#[derive(Clone)]
pub struct GmailClient {
    http: reqwest::Client,
    api_base_url: String,
}

impl GmailClient {
    /// Creates a client against the given API base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        api_base_url: impl Into<String>,
        timeout: std::time::Duration,
    ) -> conduit_core::Result<Self, ClientSetupError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientSetupError::HttpClient {
                details: e.to_string(),
            })?;

        Ok(Self {
            http,
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        access_token: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, EventSourceError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .query(query)
            .send()
            .await
            .map_err(|e| EventSourceError::Transport {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(EventSourceError::Authentication {
                reason: format!("gmail returned {status}"),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EventSourceError::Api {
                status: status.as_u16(),
                reason: body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| EventSourceError::Decode {
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl EventSource for GmailClient {
    fn service(&self) -> &str {
        "gmail"
    }

    async fn newest_event_id(
        &self,
        access_token: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<String>, EventSourceError> {
        let url = format!("{}/users/me/messages", self.api_base_url);
        let query = [
            ("q", format!("after:{}", since.timestamp())),
            ("maxResults", "1".to_string()),
        ];
        let list: MessageList = self.get_json(access_token, &url, &query).await?;
        Ok(list.messages.into_iter().next().map(|m| m.id))
    }

    async fn fetch_event(
        &self,
        access_token: &str,
        event_id: &str,
    ) -> Result<TriggerEvent, EventSourceError> {
        let url = format!("{}/users/me/messages/{event_id}", self.api_base_url);
        let query = [("format", "full".to_string())];
        let message: Message = self.get_json(access_token, &url, &query).await?;
        Ok(message.into_trigger_event())
    }
}

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Message {
    id: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    payload: Option<MessagePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    body: Option<PartBody>,
    #[serde(default)]
    parts: Vec<MessagePart>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct PartBody {
    #[serde(default)]
    data: Option<String>,
}

impl Message {
    fn into_trigger_event(self) -> TriggerEvent {
        let part = self.payload.unwrap_or_default();
        let subject = part.header("Subject").unwrap_or_default();
        let from = part.header("From").map(parse_address).unwrap_or_default();
        let body = part.plain_text().unwrap_or(self.snippet);

        TriggerEvent {
            payload: json!({
                "email_subject": subject,
                "email_from": from,
                "email_body": body,
                "id": self.id,
            }),
            id: self.id,
        }
    }
}

impl MessagePart {
    fn header(&self, name: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.clone())
    }

    /// First decodable `text/plain` body, depth first.
    fn plain_text(&self) -> Option<String> {
        if self.mime_type.eq_ignore_ascii_case("text/plain") {
            let decoded = self
                .body
                .as_ref()
                .and_then(|b| b.data.as_deref())
                .and_then(decode_body);
            if decoded.is_some() {
                return decoded;
            }
        }
        self.parts.iter().find_map(MessagePart::plain_text)
    }
}

fn decode_body(data: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')).ok()?;
    String::from_utf8(bytes).ok()
}

/// Extracts the bare address from a `From` header value.
///
/// Returns an empty string when no address can be found.
fn parse_address(value: String) -> String {
    let value = value.trim();
    if let (Some(start), Some(end)) = (value.rfind('<'), value.rfind('>')) {
        if start < end {
            let addr = value[start + 1..end].trim();
            if addr.contains('@') {
                return addr.to_string();
            }
        }
        return String::new();
    }
    if value.contains('@') && !value.contains(char::is_whitespace) {
        return value.to_string();
    }
    String::new()
}
