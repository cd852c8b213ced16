//! The AI backend boundary.
//!
//! The pipelines depend on exactly two capabilities: a streaming
//! conversational completion and a schema-constrained structured completion.
//! Neither capability retries; any retry policy belongs to the caller.

mod claude;

pub use self::claude::ClaudeBackend;

use async_trait::async_trait;
use futures::Stream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use thiserror::Error;

/// Lazy, finite, non-restartable sequence of reply text deltas.
///
/// The consumer cancels by dropping the stream.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, BackendError>> + Send>>;

/// Failures at the backend boundary.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("backend returned no payload")]
    EmptyResponse,

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("backend not configured: {0}")]
    NotConfigured(String),
}

impl From<::claude::Error> for BackendError {
    fn from(err: ::claude::Error) -> Self {
        use ::claude::Error;
        match err {
            Error::NoApiKey | Error::Config(_) => BackendError::NotConfigured(err.to_string()),
            Error::MissingToolUse(_) => BackendError::EmptyResponse,
            Error::Parse(msg) => BackendError::Malformed(msg),
            Error::Network(_) | Error::Api { .. } | Error::Stream(_) => {
                BackendError::Transport(err.to_string())
            }
        }
    }
}

/// Speaker of a dialogue turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Model,
}

/// One earlier turn of the conversation, as handed to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorTurn {
    pub role: TurnRole,
    pub text: String,
}

impl PriorTurn {
    pub fn new(role: TurnRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }
}

/// Shape a structured completion must satisfy.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSchema {
    name: String,
    description: String,
    schema: Value,
}

impl ResponseSchema {
    /// A single object described by `schema`.
    pub fn new(name: impl Into<String>, description: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
        }
    }

    /// An array whose elements each satisfy `item_schema`.
    pub fn array_of(
        name: impl Into<String>,
        description: impl Into<String>,
        item_schema: Value,
    ) -> Self {
        Self::new(
            name,
            description,
            serde_json::json!({
                "type": "array",
                "items": item_schema,
            }),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    pub fn is_array(&self) -> bool {
        self.schema.get("type").and_then(Value::as_str) == Some("array")
    }
}

/// The two capabilities every pipeline is written against.
#[async_trait]
pub trait NarrativeBackend: Send + Sync {
    /// Start one streamed assistant reply.
    ///
    /// `prior_turns` are the earlier turns of the conversation in order;
    /// `message` is the new user message.
    async fn stream_complete(
        &self,
        system: &str,
        prior_turns: &[PriorTurn],
        message: &str,
    ) -> Result<TextStream, BackendError>;

    /// Issue one request whose answer must satisfy `schema`.
    async fn structured_complete(
        &self,
        prompt: &str,
        schema: &ResponseSchema,
    ) -> Result<Value, BackendError>;
}

/// Parse a structured completion into `T`.
///
/// `null` counts as a missing payload.
pub fn parse_structured<T: DeserializeOwned>(value: Value) -> Result<T, BackendError> {
    if value.is_null() {
        return Err(BackendError::EmptyResponse);
    }
    serde_json::from_value(value).map_err(|e| BackendError::Malformed(e.to_string()))
}
