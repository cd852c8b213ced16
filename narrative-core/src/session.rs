//! The owning narrative session.
//!
//! A `NarrativeSession` owns the event store and hands the same store and
//! backend to all three pipelines. It is the single entry point for a
//! front end: the headless binary, a UI, or a test.

use crate::backend::{ClaudeBackend, NarrativeBackend};
use crate::config::EngineConfig;
use crate::constellation::{ConstellationPipeline, SynthesisOutcome};
use crate::event::{EventContent, NarrativeEvent};
use crate::id::EventId;
use crate::language::Language;
use crate::mirror::{MirrorSession, Reply};
use crate::store::EventStore;
use crate::theater::{TheaterOutcome, TheaterPipeline};
use claude::Claude;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors that can occur in a narrative session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("No API key configured - set ANTHROPIC_API_KEY environment variable")]
    NoApiKey,

    #[error("Client error: {0}")]
    Client(claude::Error),

    #[error("No narrative event with id {0}")]
    UnknownEvent(EventId),

    #[error("Event {0} is a tension analysis; only log entries can be promoted")]
    NotPromotable(EventId),
}

impl From<claude::Error> for SessionError {
    fn from(err: claude::Error) -> Self {
        match err {
            claude::Error::NoApiKey => SessionError::NoApiKey,
            other => SessionError::Client(other),
        }
    }
}

/// One user's narrative: the log and the three pipelines over it.
pub struct NarrativeSession {
    store: Arc<EventStore>,
    language: Language,
    mirror: MirrorSession,
    theater: TheaterPipeline,
    constellation: ConstellationPipeline,
}

impl NarrativeSession {
    /// Create a session with an empty log.
    pub fn new(backend: Arc<dyn NarrativeBackend>, language: Language) -> Self {
        Self::with_store(Arc::new(EventStore::new()), backend, language)
    }

    /// Create a session over an existing store.
    pub fn with_store(
        store: Arc<EventStore>,
        backend: Arc<dyn NarrativeBackend>,
        language: Language,
    ) -> Self {
        Self {
            mirror: MirrorSession::new(store.clone(), backend.clone(), language),
            theater: TheaterPipeline::new(store.clone(), backend.clone()),
            constellation: ConstellationPipeline::new(store.clone(), backend),
            store,
            language,
        }
    }

    /// Create a Claude-backed session. The API key comes from `ANTHROPIC_API_KEY`.
    pub fn from_config(config: EngineConfig) -> Result<Self, SessionError> {
        let mut client = Claude::from_env()?;
        if let Some(model) = &config.model {
            client = client.with_model(model);
        }
        let backend = ClaudeBackend::new(client)
            .with_max_tokens(config.max_tokens)
            .with_temperature(config.temperature);
        info!(model = backend.model(), language = %config.language, "Narrative session ready");

        Ok(Self::new(Arc::new(backend), config.language))
    }

    /// Create a Claude-backed session configured from the environment.
    pub fn from_env() -> Result<Self, SessionError> {
        Self::from_config(EngineConfig::from_env())
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Switch the language for every later prompt.
    ///
    /// In-flight calls keep the language they started with.
    pub fn set_language(&mut self, language: Language) {
        self.language = language;
        self.mirror.set_language(language);
    }

    pub fn mirror(&self) -> &MirrorSession {
        &self.mirror
    }

    pub fn theater(&self) -> &TheaterPipeline {
        &self.theater
    }

    pub fn constellation(&self) -> &ConstellationPipeline {
        &self.constellation
    }

    /// Send one utterance to the Mirror. See [`MirrorSession::submit`].
    ///
    /// The reply does not borrow the session; the Theater and the
    /// Constellation stay usable while it streams.
    pub async fn say(&self, text: &str) -> Option<Reply> {
        self.mirror.submit(text).await
    }

    /// Deconstruct `text` in the Theater.
    pub async fn deconstruct(&self, text: &str) -> Option<TheaterOutcome> {
        self.theater.analyze(text, self.language).await
    }

    /// Copy a logged entry's text into the Theater's input draft.
    ///
    /// The event itself is left untouched.
    pub fn promote(&self, event_id: EventId) -> Result<String, SessionError> {
        let event = self
            .store
            .get(event_id)
            .ok_or(SessionError::UnknownEvent(event_id))?;
        match event.content() {
            EventContent::LogEntry(text) => {
                self.theater.promote_text(text.clone());
                info!(event_id = %event_id, "Promoted log entry to the Theater");
                Ok(text.clone())
            }
            EventContent::TensionAnalysis(_) => Err(SessionError::NotPromotable(event_id)),
        }
    }

    /// Deconstruct whatever is in the Theater's input draft.
    pub async fn deconstruct_draft(&self) -> Option<TheaterOutcome> {
        self.theater.analyze_input(self.language).await
    }

    /// Re-synthesize the constellation from the whole log.
    pub async fn synthesize(&self) -> SynthesisOutcome {
        self.constellation.refresh(self.language).await
    }

    /// Synthesize once for a non-empty log.
    ///
    /// Fires only if no synthesis has been applied since the constellation
    /// was last reset; growth of the log alone does not re-trigger it.
    pub async fn synthesize_if_needed(&self) -> Option<SynthesisOutcome> {
        self.constellation.synthesize_if_needed(self.language).await
    }

    /// Every event, newest first.
    pub fn archive(&self) -> Vec<NarrativeEvent> {
        self.store.by_recency()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TheaterAnalysis;
    use crate::testing::ScriptedBackend;

    #[test]
    fn test_pipelines_share_the_store() {
        let session = NarrativeSession::new(Arc::new(ScriptedBackend::new()), Language::En);
        session.store().append(NarrativeEvent::log_entry("shared"));

        assert!(session.constellation().has_unsynthesized_history());
        assert_eq!(session.archive().len(), 1);
    }

    #[tokio::test]
    async fn test_auto_synthesis_waits_for_reset_not_growth() {
        let backend = ScriptedBackend::new()
            .with_response(serde_json::json!([]))
            .with_response(serde_json::json!([]));
        let session = NarrativeSession::new(Arc::new(backend), Language::En);
        session.store().append(NarrativeEvent::log_entry("first"));

        assert!(session.synthesize_if_needed().await.is_some());
        session.store().append(NarrativeEvent::log_entry("second"));
        assert!(session.synthesize_if_needed().await.is_none());

        session.constellation().reset();
        assert!(session.synthesize_if_needed().await.is_some());
    }

    #[test]
    fn test_promote_copies_log_text() {
        let session = NarrativeSession::new(Arc::new(ScriptedBackend::new()), Language::En);
        let id = session.store().append(NarrativeEvent::log_entry("I always apologize first"));

        let text = session.promote(id).unwrap();

        assert_eq!(text, "I always apologize first");
        assert_eq!(session.theater().draft(), "I always apologize first");
        assert_eq!(session.store().len(), 1);
    }

    #[test]
    fn test_promote_rejects_analyses_and_unknown_ids() {
        let session = NarrativeSession::new(Arc::new(ScriptedBackend::new()), Language::En);
        let id = session
            .store()
            .append(NarrativeEvent::tension_analysis(TheaterAnalysis::failed()));

        assert!(matches!(session.promote(id), Err(SessionError::NotPromotable(_))));
        assert!(matches!(
            session.promote(EventId::new()),
            Err(SessionError::UnknownEvent(_))
        ));
    }

    #[test]
    fn test_language_switch_reaches_mirror() {
        let mut session = NarrativeSession::new(Arc::new(ScriptedBackend::new()), Language::Zh);
        session.set_language(Language::En);

        assert_eq!(session.language(), Language::En);
        assert_eq!(session.mirror().turns()[0].text, Language::En.mirror_welcome());
    }

    #[test]
    fn test_missing_api_key_maps_to_session_error() {
        assert!(matches!(
            SessionError::from(claude::Error::NoApiKey),
            SessionError::NoApiKey
        ));
    }
}
