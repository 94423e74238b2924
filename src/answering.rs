use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::TransportError;
use crate::settings::EffectiveSettings;

/// Reply committed when the service answers without an `output`.
pub const FALLBACK_ANSWER: &str = "I received your message, but couldn't generate a proper response.";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentChatRequest {
    /// Comma-joined backend document identifiers.
    pub file_id: String,
    pub message: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum AnswerRequest {
    Chat(ChatRequest),
    Document(DocumentChatRequest),
}

impl AnswerRequest {
    pub fn message(&self) -> &str {
        match self {
            AnswerRequest::Chat(r) => &r.message,
            AnswerRequest::Document(r) => &r.message,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AnswerItem {
    #[serde(default)]
    pub output: Option<String>,
}

/// The two body shapes the service is known to produce, plus anything else.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum AnswerPayload {
    Batch(Vec<AnswerItem>),
    Single(AnswerItem),
    Unrecognized(serde_json::Value),
}

impl AnswerPayload {
    pub fn from_value(value: serde_json::Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or(AnswerPayload::Unrecognized(value))
    }

    /// The non-empty `output`, if the body carries one.
    pub fn output(&self) -> Option<&str> {
        let item = match self {
            AnswerPayload::Batch(items) => items.first(),
            AnswerPayload::Single(item) => Some(item),
            AnswerPayload::Unrecognized(_) => None,
        };
        item.and_then(|i| i.output.as_deref()).filter(|o| !o.is_empty())
    }
}

#[async_trait]
pub trait AnsweringService: Send + Sync {
    async fn ask(&self, req: &AnswerRequest) -> Result<AnswerPayload, TransportError>;
}

pub(crate) fn parse_endpoint(name: &'static str, raw: Option<&str>) -> Result<Option<Url>, TransportError> {
    raw.map(|r| {
        Url::parse(r).map_err(|source| TransportError::InvalidEndpoint { name, raw: r.to_string(), source })
    })
    .transpose()
}

/// Fails unless the response status is 2xx, keeping a short excerpt of the body.
pub(crate) async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let body: String = body.chars().take(200).collect();
    Err(TransportError::Status { status: status.as_u16(), body })
}

#[derive(Clone)]
pub struct HttpAnsweringService {
    client: reqwest::Client,
    chat_url: Option<Url>,
    document_chat_url: Option<Url>,
    api_key: Option<String>,
}

impl HttpAnsweringService {
    pub fn from_settings(settings: &EffectiveSettings) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(settings.request_timeout).build()?;
        Ok(Self {
            client,
            chat_url: parse_endpoint("chat", settings.endpoints.chat_url.as_deref())?,
            document_chat_url: parse_endpoint("document chat", settings.endpoints.document_chat_url.as_deref())?,
            api_key: settings.api_key.clone(),
        })
    }
}

#[async_trait]
impl AnsweringService for HttpAnsweringService {
    async fn ask(&self, req: &AnswerRequest) -> Result<AnswerPayload, TransportError> {
        let url = match req {
            AnswerRequest::Chat(_) => self.chat_url.as_ref().ok_or(TransportError::NotConfigured("chat"))?,
            AnswerRequest::Document(_) => self
                .document_chat_url
                .as_ref()
                .ok_or(TransportError::NotConfigured("document chat"))?,
        };
        tracing::debug!(%url, chars = req.message().chars().count(), "posting to answering service");
        let mut rb = self.client.post(url.clone()).json(req);
        if let Some(key) = &self.api_key {
            rb = rb.bearer_auth(key);
        }
        let resp = ensure_success(rb.send().await?).await?;
        let bytes = resp.bytes().await?;
        let value: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| TransportError::MalformedBody(e.to_string()))?;
        Ok(AnswerPayload::from_value(value))
    }
}
