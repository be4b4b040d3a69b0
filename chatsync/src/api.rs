//! REST request client for the messaging backend.
//!
//! The backend is an external collaborator reached over plain REST calls.
//! [`ApiClient`] is the seam the stores depend on; [`HttpApiClient`] is the
//! production implementation on top of `reqwest`. Tests substitute in-memory
//! implementations.
//!
//! List endpoints are historically inconsistent: some deployments return a
//! bare JSON array, others an envelope `{ "items": [...] }`. [`parse_list`]
//! normalizes both; any other shape is an error.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use chatsync_proto::ids::{ContextId, ConversationId, MessageId};
use chatsync_proto::message::{Attachment, Message, MessageDraft};

use crate::session::CredentialProvider;

/// Errors from the HTTP request client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request could not be performed (network, DNS, TLS).
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("server returned {code}: {body}")]
    Status {
        /// HTTP status code.
        code: u16,
        /// Response body, for diagnostics.
        body: String,
    },
}

/// Errors raised while loading conversations or message pages.
///
/// A load failure leaves the previous cache intact; the error is surfaced
/// as state for the UI to act on and is never retried automatically.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The underlying request failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The response had neither a bare-array nor an `items` envelope shape.
    #[error("unexpected response shape: {0}")]
    UnexpectedShape(String),
}

/// Normalize a list response to a typed vector.
///
/// Accepts a bare JSON array or an envelope object with an `items` array.
///
/// # Errors
///
/// Returns [`LoadError::UnexpectedShape`] for any other shape, or if an
/// element fails to deserialize.
pub fn parse_list<T: DeserializeOwned>(value: Value) -> Result<Vec<T>, LoadError> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(LoadError::UnexpectedShape(format!(
                    "`items` is not an array (got {})",
                    type_name(&other)
                )));
            }
            None => {
                return Err(LoadError::UnexpectedShape(
                    "object response without an `items` field".into(),
                ));
            }
        },
        other => {
            return Err(LoadError::UnexpectedShape(format!(
                "expected array or envelope, got {}",
                type_name(&other)
            )));
        }
    };

    items
        .into_iter()
        .map(|item| {
            serde_json::from_value(item)
                .map_err(|e| LoadError::UnexpectedShape(format!("bad list element: {e}")))
        })
        .collect()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// REST-style request client for the messaging backend.
///
/// List-returning calls hand back raw [`Value`]s so the caller can run them
/// through [`parse_list`] (the shape tolerance is part of the store
/// contract, not the wire client's).
pub trait ApiClient: Send + Sync {
    /// `GET /conversations?contextId=` — conversation summaries for a scope.
    fn fetch_conversations(
        &self,
        context: Option<&ContextId>,
    ) -> impl std::future::Future<Output = Result<Value, ApiError>> + Send;

    /// `GET /conversations/{id}/messages?before=&limit=` — a page of messages
    /// strictly older than `before` (or the most recent page when `None`).
    fn fetch_messages(
        &self,
        conversation: &ConversationId,
        before: Option<&MessageId>,
        limit: usize,
    ) -> impl std::future::Future<Output = Result<Value, ApiError>> + Send;

    /// `POST /conversations/{id}/messages` — create a message, returning the
    /// confirmed server-side representation.
    fn post_message(
        &self,
        conversation: &ConversationId,
        draft: &MessageDraft,
    ) -> impl std::future::Future<Output = Result<Message, ApiError>> + Send;

    /// `POST /chat/upload` (multipart) — upload a file for later attachment.
    fn upload(
        &self,
        file_name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> impl std::future::Future<Output = Result<Attachment, ApiError>> + Send;
}

/// Production [`ApiClient`] backed by `reqwest`.
///
/// Attaches a bearer token from the injected [`CredentialProvider`] when a
/// session is active; requests go out unauthenticated otherwise and the
/// server's 401 surfaces as [`ApiError::Status`].
pub struct HttpApiClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpApiClient {
    /// Create a client for the given REST base URL (no trailing slash).
    pub fn new(base_url: impl Into<String>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            credentials,
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.credentials.token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            code: status.as_u16(),
            body,
        })
    }
}

impl ApiClient for HttpApiClient {
    async fn fetch_conversations(&self, context: Option<&ContextId>) -> Result<Value, ApiError> {
        let mut request = self
            .authorize(self.http.get(format!("{}/conversations", self.base_url)));
        if let Some(context) = context {
            request = request.query(&[("contextId", context.as_str())]);
        }
        let response = Self::check(request.send().await?).await?;
        Ok(response.json().await?)
    }

    async fn fetch_messages(
        &self,
        conversation: &ConversationId,
        before: Option<&MessageId>,
        limit: usize,
    ) -> Result<Value, ApiError> {
        let url = format!("{}/conversations/{}/messages", self.base_url, conversation);
        let mut request = self
            .authorize(self.http.get(url))
            .query(&[("limit", limit.to_string())]);
        if let Some(before) = before {
            request = request.query(&[("before", before.as_str())]);
        }
        let response = Self::check(request.send().await?).await?;
        Ok(response.json().await?)
    }

    async fn post_message(
        &self,
        conversation: &ConversationId,
        draft: &MessageDraft,
    ) -> Result<Message, ApiError> {
        let url = format!("{}/conversations/{}/messages", self.base_url, conversation);
        let request = self.authorize(self.http.post(url)).json(draft);
        let response = Self::check(request.send().await?).await?;
        Ok(response.json().await?)
    }

    async fn upload(
        &self,
        file_name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<Attachment, ApiError> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime_type)
            .map_err(ApiError::Http)?;
        let form = reqwest::multipart::Form::new().part("file", part);
        let request = self
            .authorize(self.http.post(format!("{}/chat/upload", self.base_url)))
            .multipart(form);
        let response = Self::check(request.send().await?).await?;
        Ok(response.json().await?)
    }
}
