//! Testing utilities for the narrative engine.
//!
//! This module provides:
//! - `ScriptedBackend`, a deterministic [`NarrativeBackend`] for tests without API calls
//! - `StreamScript` / `StructuredScript`, the scripted answers it hands out in order
//! - Gated structured answers, released by hand to simulate slow calls

use crate::backend::{BackendError, NarrativeBackend, PriorTurn, ResponseSchema, TextStream};
use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::oneshot;

/// A scripted streamed reply.
#[derive(Debug, Clone)]
pub enum StreamScript {
    /// Yield these deltas, then end.
    Deltas(Vec<String>),
    /// Yield these deltas, then fail with the message.
    FailAfter(Vec<String>, String),
    /// Fail before the stream starts.
    FailToStart(String),
    /// Never finish connecting.
    Stall,
}

/// A scripted structured answer.
#[derive(Debug)]
pub enum StructuredScript {
    /// Return this value.
    Value(Value),
    /// Fail with a transport error carrying the message.
    Fail(String),
    /// Wait until the paired sender releases an answer.
    Gated(oneshot::Receiver<Result<Value, String>>),
}

/// A recorded `stream_complete` call.
#[derive(Debug, Clone)]
pub struct StreamCall {
    pub system: String,
    pub prior_turns: Vec<PriorTurn>,
    pub message: String,
}

/// A backend that answers from scripts, in the order they were queued.
///
/// With an empty queue, streams fail to start and structured calls fail with
/// a transport error.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    streams: Mutex<VecDeque<StreamScript>>,
    answers: Mutex<VecDeque<StructuredScript>>,
    stream_calls: AtomicUsize,
    structured_calls: AtomicUsize,
    stream_log: Mutex<Vec<StreamCall>>,
    prompt_log: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply that streams `deltas`.
    pub fn with_stream<S: Into<String>>(self, deltas: impl IntoIterator<Item = S>) -> Self {
        self.queue_stream(StreamScript::Deltas(deltas.into_iter().map(Into::into).collect()));
        self
    }

    /// Queue a reply that streams `deltas` and then fails.
    pub fn with_failing_stream<S: Into<String>>(
        self,
        deltas: impl IntoIterator<Item = S>,
        error: impl Into<String>,
    ) -> Self {
        self.queue_stream(StreamScript::FailAfter(
            deltas.into_iter().map(Into::into).collect(),
            error.into(),
        ));
        self
    }

    /// Queue a structured answer.
    pub fn with_response(self, value: Value) -> Self {
        self.queue_structured(StructuredScript::Value(value));
        self
    }

    /// Queue a structured transport failure.
    pub fn with_failure(self, error: impl Into<String>) -> Self {
        self.queue_structured(StructuredScript::Fail(error.into()));
        self
    }

    pub fn queue_stream(&self, script: StreamScript) {
        self.streams.lock().push_back(script);
    }

    pub fn queue_structured(&self, script: StructuredScript) {
        self.answers.lock().push_back(script);
    }

    /// Queue a structured answer that resolves only when the returned sender fires.
    ///
    /// Dropping the sender resolves the call as a transport failure.
    pub fn gate(&self) -> oneshot::Sender<Result<Value, String>> {
        let (tx, rx) = oneshot::channel();
        self.queue_structured(StructuredScript::Gated(rx));
        tx
    }

    /// Number of `stream_complete` calls so far.
    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    /// Number of `structured_complete` calls so far.
    pub fn structured_calls(&self) -> usize {
        self.structured_calls.load(Ordering::SeqCst)
    }

    /// Every `stream_complete` call, in order.
    pub fn stream_log(&self) -> Vec<StreamCall> {
        self.stream_log.lock().clone()
    }

    /// Every structured prompt, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompt_log.lock().clone()
    }
}

#[async_trait]
impl NarrativeBackend for ScriptedBackend {
    async fn stream_complete(
        &self,
        system: &str,
        prior_turns: &[PriorTurn],
        message: &str,
    ) -> Result<TextStream, BackendError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.stream_log.lock().push(StreamCall {
            system: system.to_string(),
            prior_turns: prior_turns.to_vec(),
            message: message.to_string(),
        });

        let script = self.streams.lock().pop_front();
        match script {
            Some(StreamScript::Deltas(deltas)) => {
                Ok(Box::pin(stream::iter(deltas.into_iter().map(Ok))))
            }
            Some(StreamScript::FailAfter(deltas, error)) => {
                let items = deltas
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(BackendError::Transport(error))));
                Ok(Box::pin(stream::iter(items)))
            }
            Some(StreamScript::FailToStart(error)) => Err(BackendError::Transport(error)),
            Some(StreamScript::Stall) => futures::future::pending().await,
            None => Err(BackendError::Transport("no scripted stream".to_string())),
        }
    }

    async fn structured_complete(
        &self,
        prompt: &str,
        _schema: &ResponseSchema,
    ) -> Result<Value, BackendError> {
        self.structured_calls.fetch_add(1, Ordering::SeqCst);
        self.prompt_log.lock().push(prompt.to_string());

        let script = self.answers.lock().pop_front();
        match script {
            Some(StructuredScript::Value(value)) => Ok(value),
            Some(StructuredScript::Fail(error)) => Err(BackendError::Transport(error)),
            Some(StructuredScript::Gated(rx)) => match rx.await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(error)) => Err(BackendError::Transport(error)),
                Err(_) => Err(BackendError::Transport("gate dropped".to_string())),
            },
            None => Err(BackendError::Transport("no scripted response".to_string())),
        }
    }
}
