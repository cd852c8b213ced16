//! The Mirror: a streamed, dialogic session.
//!
//! Each user utterance is promoted to a `log_entry` event the moment it is
//! submitted, whatever happens to the reply. The reply streams into a model
//! turn that grows delta by delta and is observable after every delta.
//!
//! The turn list sits behind a lock shared with the [`Reply`] handle, so a
//! streaming reply does not hold a borrow on its session. A second submit
//! while a reply is pending is refused. Dropping a reply, or the `submit`
//! future before it yields one, stops pulling from the backend and returns
//! the session to [`MirrorState::Idle`]; whatever text arrived stays in the
//! turn list.

use crate::backend::{BackendError, NarrativeBackend, PriorTurn, TextStream, TurnRole};
use crate::event::NarrativeEvent;
use crate::id::TurnId;
use crate::language::Language;
use crate::prompts;
use crate::store::EventStore;
use chrono::{DateTime, Utc};
use futures::{future, stream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// One ephemeral message in a Mirror session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueTurn {
    pub id: TurnId,
    pub role: TurnRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl DialogueTurn {
    pub fn new(role: TurnRole, text: impl Into<String>) -> Self {
        Self {
            id: TurnId::new(),
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Where a Mirror session is in its reply cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorState {
    Idle,
    AwaitingReply,
}

#[derive(Debug)]
struct Dialogue {
    turns: Vec<DialogueTurn>,
    state: MirrorState,
}

/// A dialogic session over the shared event store.
pub struct MirrorSession {
    store: Arc<EventStore>,
    backend: Arc<dyn NarrativeBackend>,
    language: Language,
    dialogue: Arc<Mutex<Dialogue>>,
}

impl MirrorSession {
    /// Start a session with the localized welcome turn.
    pub fn new(store: Arc<EventStore>, backend: Arc<dyn NarrativeBackend>, language: Language) -> Self {
        Self {
            store,
            backend,
            language,
            dialogue: Arc::new(Mutex::new(Dialogue {
                turns: vec![DialogueTurn::new(TurnRole::Model, language.mirror_welcome())],
                state: MirrorState::Idle,
            })),
        }
    }

    /// Snapshot of the turn list, welcome first.
    pub fn turns(&self) -> Vec<DialogueTurn> {
        self.dialogue.lock().turns.clone()
    }

    pub fn state(&self) -> MirrorState {
        self.dialogue.lock().state
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Switch the answer language.
    ///
    /// The welcome turn is re-localized only while it is the sole turn. A
    /// reply already streaming keeps the language it started with.
    pub fn set_language(&mut self, language: Language) {
        self.language = language;
        if let [welcome] = self.dialogue.lock().turns.as_mut_slice() {
            if welcome.role == TurnRole::Model {
                welcome.text = language.mirror_welcome().to_string();
            }
        }
    }

    /// Submit one utterance and start streaming the reply.
    ///
    /// Returns `None` without touching the store or the backend when `text`
    /// is empty or whitespace, or while another reply is still pending.
    pub async fn submit(&self, text: &str) -> Option<Reply> {
        if text.trim().is_empty() {
            return None;
        }

        let user_turn = DialogueTurn::new(TurnRole::User, text);
        let timestamp = user_turn.timestamp;
        let (prior_turns, reply_index) = {
            let mut dialogue = self.dialogue.lock();
            if dialogue.state != MirrorState::Idle {
                warn!("Mirror submit while a reply is still pending; ignoring");
                return None;
            }
            let prior_turns: Vec<PriorTurn> = dialogue
                .turns
                .iter()
                .map(|turn| PriorTurn::new(turn.role, turn.text.clone()))
                .collect();
            dialogue.turns.push(user_turn);
            dialogue.turns.push(DialogueTurn::new(TurnRole::Model, ""));
            dialogue.state = MirrorState::AwaitingReply;
            (prior_turns, dialogue.turns.len() - 1)
        };

        let event_id = self
            .store
            .append(NarrativeEvent::log_entry(text).with_timestamp(timestamp));
        debug!(event_id = %event_id, "Promoted utterance to narrative log");

        // Built before the backend call so that cancelling this future while
        // the stream is still connecting releases the session.
        let mut reply = Reply {
            dialogue: self.dialogue.clone(),
            language: self.language,
            deltas: None,
            text: String::new(),
            reply_index,
            open: true,
        };

        let system = prompts::mirror_system(self.language);
        let deltas = match self
            .backend
            .stream_complete(&system, &prior_turns, text)
            .await
        {
            Ok(deltas) => deltas,
            Err(e) => failed_stream(e),
        };
        reply.deltas = Some(deltas);
        Some(reply)
    }
}

fn failed_stream(err: BackendError) -> TextStream {
    Box::pin(stream::once(future::ready(Err(err))))
}

/// A reply streaming into its session's turn list.
///
/// The handle owns its stream and shares the turn list with the session, so
/// the rest of the session stays usable while it is alive.
pub struct Reply {
    dialogue: Arc<Mutex<Dialogue>>,
    language: Language,
    deltas: Option<TextStream>,
    text: String,
    reply_index: usize,
    // Holds the session in `AwaitingReply` until the stream ends or is dropped.
    open: bool,
}

impl Reply {
    /// Pull the next delta and return the reply text so far.
    ///
    /// Returns `None` once the reply is complete. A failed stream ends with
    /// the localized "connection lost" text appended to what had arrived.
    pub async fn next(&mut self) -> Option<&str> {
        let deltas = self.deltas.as_mut()?;
        match deltas.next().await {
            Some(Ok(delta)) => self.push(&delta),
            Some(Err(e)) => {
                warn!(error = %e, "Mirror stream failed");
                let sentinel = self.language.connection_lost();
                self.push(sentinel);
                self.end_stream();
            }
            None => {
                self.end_stream();
                return None;
            }
        }
        Some(&self.text)
    }

    /// Drain the reply and return its full text.
    pub async fn finish(mut self) -> String {
        while self.next().await.is_some() {}
        self.text.clone()
    }

    /// Reply text accumulated so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn turn_id(&self) -> TurnId {
        self.dialogue.lock().turns[self.reply_index].id
    }

    /// True once the stream has ended, normally or not.
    pub fn is_complete(&self) -> bool {
        self.deltas.is_none()
    }

    fn push(&mut self, delta: &str) {
        self.text.push_str(delta);
        self.dialogue.lock().turns[self.reply_index].text.push_str(delta);
    }

    fn end_stream(&mut self) {
        self.deltas = None;
        self.open = false;
        self.dialogue.lock().state = MirrorState::Idle;
    }
}

impl Drop for Reply {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        if self.deltas.take().is_some() {
            debug!(chars = self.text.chars().count(), "Mirror reply dropped mid-stream");
        }
        let mut dialogue = self.dialogue.lock();
        // Nothing arrived: the reply was cancelled before its first delta.
        if self.text.is_empty() && dialogue.turns.len() == self.reply_index + 1 {
            dialogue.turns.pop();
        }
        dialogue.state = MirrorState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedBackend, StreamScript};
    use std::time::Duration;

    fn session(backend: ScriptedBackend) -> (MirrorSession, Arc<EventStore>, Arc<ScriptedBackend>) {
        let store = Arc::new(EventStore::new());
        let backend = Arc::new(backend);
        let mirror = MirrorSession::new(store.clone(), backend.clone(), Language::En);
        (mirror, store, backend)
    }

    #[tokio::test]
    async fn test_partial_text_grows_per_delta() {
        let (mirror, _, _) = session(ScriptedBackend::new().with_stream(["Hel", "lo"]));

        let mut reply = mirror.submit("hi").await.unwrap();
        let mut seen = Vec::new();
        while let Some(text) = reply.next().await {
            seen.push(text.to_string());
        }
        assert!(reply.is_complete());
        drop(reply);

        assert_eq!(seen, vec!["Hel", "Hello"]);
        assert_eq!(mirror.state(), MirrorState::Idle);
        assert_eq!(mirror.turns().last().unwrap().text, "Hello");
    }

    #[tokio::test]
    async fn test_utterance_is_logged_before_reply() {
        let (mirror, store, _) = session(ScriptedBackend::new().with_stream(["ok"]));

        let reply = mirror.submit("I feel stuck").await.unwrap();
        assert_eq!(store.len(), 1);
        drop(reply);

        let events = store.all();
        let event = &events[0];
        assert_eq!(event.log_text(), Some("I feel stuck"));
        assert_eq!(event.timestamp(), mirror.turns()[1].timestamp);
    }

    #[tokio::test]
    async fn test_failure_keeps_partial_and_appends_sentinel() {
        let (mirror, store, _) =
            session(ScriptedBackend::new().with_failing_stream(["I hear"], "reset"));

        let text = mirror.submit("hello").await.unwrap().finish().await;

        assert_eq!(text, "I hearConnection lost.");
        assert_eq!(store.len(), 1);
        assert_eq!(mirror.state(), MirrorState::Idle);
    }

    #[tokio::test]
    async fn test_failure_to_start_still_logs_utterance() {
        let (mirror, store, backend) = session(ScriptedBackend::new());

        let text = mirror.submit("anyone?").await.unwrap().finish().await;

        assert_eq!(text, "Connection lost.");
        assert_eq!(store.len(), 1);
        assert_eq!(backend.stream_calls(), 1);
    }

    #[tokio::test]
    async fn test_chinese_failure_appends_chinese_sentinel() {
        let store = Arc::new(EventStore::new());
        let backend = Arc::new(ScriptedBackend::new().with_failing_stream(["我听到"], "reset"));
        let mirror = MirrorSession::new(store, backend, Language::Zh);

        let text = mirror.submit("你好").await.unwrap().finish().await;

        assert_eq!(text, "我听到连接中断。");
        assert_eq!(mirror.turns().last().unwrap().text, "我听到连接中断。");
    }

    #[tokio::test]
    async fn test_cancelled_submit_releases_session() {
        let backend = ScriptedBackend::new();
        backend.queue_stream(StreamScript::Stall);
        let (mirror, store, _) = session(backend.with_stream(["back"]));

        let pending = tokio::time::timeout(Duration::from_millis(50), mirror.submit("hello")).await;
        assert!(pending.is_err());
        assert_eq!(mirror.state(), MirrorState::Idle);
        assert_eq!(store.len(), 1);

        let roles: Vec<TurnRole> = mirror.turns().iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![TurnRole::Model, TurnRole::User]);

        let text = mirror.submit("still there?").await.unwrap().finish().await;
        assert_eq!(text, "back");
        assert_eq!(mirror.state(), MirrorState::Idle);
    }

    #[tokio::test]
    async fn test_second_submit_refused_while_reply_open() {
        let (mirror, store, backend) =
            session(ScriptedBackend::new().with_stream(["one"]).with_stream(["two"]));

        let reply = mirror.submit("first").await.unwrap();
        assert_eq!(mirror.state(), MirrorState::AwaitingReply);
        assert!(mirror.submit("second").await.is_none());
        assert_eq!(store.len(), 1);
        assert_eq!(backend.stream_calls(), 1);

        assert_eq!(reply.finish().await, "one");
        assert!(mirror.submit("second").await.is_some());
    }

    #[tokio::test]
    async fn test_finished_reply_dropped_late_keeps_next_reply_pending() {
        let (mirror, _, _) =
            session(ScriptedBackend::new().with_stream(["one"]).with_stream(["two"]));

        let mut first = mirror.submit("a").await.unwrap();
        while first.next().await.is_some() {}
        let second = mirror.submit("b").await.unwrap();

        drop(first);
        assert_eq!(mirror.state(), MirrorState::AwaitingReply);
        assert_eq!(second.finish().await, "two");
        assert_eq!(mirror.state(), MirrorState::Idle);
    }

    #[tokio::test]
    async fn test_blank_input_is_ignored() {
        let (mirror, store, backend) = session(ScriptedBackend::new());

        assert!(mirror.submit("   \n").await.is_none());
        assert!(store.is_empty());
        assert_eq!(backend.stream_calls(), 0);
        assert_eq!(mirror.turns().len(), 1);
    }

    #[tokio::test]
    async fn test_dropping_reply_cancels_and_keeps_partial() {
        let (mirror, _, _) = session(ScriptedBackend::new().with_stream(["one ", "two"]));

        let mut reply = mirror.submit("go").await.unwrap();
        assert_eq!(reply.next().await, Some("one "));
        drop(reply);

        assert_eq!(mirror.state(), MirrorState::Idle);
        assert_eq!(mirror.turns().last().unwrap().text, "one ");
    }

    #[tokio::test]
    async fn test_prior_turns_include_welcome_and_history() {
        let (mirror, _, backend) =
            session(ScriptedBackend::new().with_stream(["first"]).with_stream(["second"]));

        mirror.submit("a").await.unwrap().finish().await;
        mirror.submit("b").await.unwrap().finish().await;

        let calls = backend.stream_log();
        assert_eq!(calls[0].prior_turns.len(), 1);
        assert_eq!(calls[0].prior_turns[0].role, TurnRole::Model);

        let roles: Vec<TurnRole> = calls[1].prior_turns.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![TurnRole::Model, TurnRole::User, TurnRole::Model]);
        assert_eq!(calls[1].prior_turns[2].text, "first");
        assert_eq!(calls[1].message, "b");
        assert!(calls[1].system.contains("English"));
    }

    #[tokio::test]
    async fn test_language_switch_relocalizes_only_fresh_welcome() {
        let (mut mirror, _, _) = session(ScriptedBackend::new().with_stream(["ok"]));

        mirror.set_language(Language::Zh);
        assert_eq!(mirror.turns()[0].text, Language::Zh.mirror_welcome());

        mirror.submit("hi").await.unwrap().finish().await;
        mirror.set_language(Language::En);
        assert_eq!(mirror.turns()[0].text, Language::Zh.mirror_welcome());
        assert_eq!(mirror.language(), Language::En);
    }
}
