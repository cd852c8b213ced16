//! The Theater: structured deconstruction of one conflict.
//!
//! A block of free text goes in; a five-voice [`TheaterAnalysis`] comes out.
//! A valid analysis is appended to the event store as soon as it arrives,
//! without asking. A failed one (transport error, malformed payload, or a
//! symptom of `"Error"`) is shown but never stored.

use crate::backend::{parse_structured, NarrativeBackend, ResponseSchema};
use crate::event::{NarrativeEvent, TheaterAnalysis};
use crate::id::EventId;
use crate::language::Language;
use crate::prompts;
use crate::store::EventStore;
use crate::ticket::{InFlight, LatestSlot, Ticket};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where the Theater is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TheaterState {
    /// Nothing analyzed yet.
    Idle,
    /// At least one analysis is in flight.
    Analyzing,
    /// A result is on display.
    Result,
}

/// Result of one deconstruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TheaterOutcome {
    pub analysis: TheaterAnalysis,
    /// Whether the analysis was appended to the narrative log.
    pub saved: bool,
    pub event_id: Option<EventId>,
    pub ticket: Ticket,
    /// A newer invocation was issued before this one resolved.
    pub superseded: bool,
}

impl TheaterOutcome {
    pub fn is_failed(&self) -> bool {
        self.analysis.is_failed()
    }
}

/// Conflict deconstruction over the shared event store.
pub struct TheaterPipeline {
    store: Arc<EventStore>,
    backend: Arc<dyn NarrativeBackend>,
    draft: Mutex<String>,
    latest: LatestSlot<TheaterOutcome>,
    in_flight: AtomicUsize,
}

impl TheaterPipeline {
    pub fn new(store: Arc<EventStore>, backend: Arc<dyn NarrativeBackend>) -> Self {
        Self {
            store,
            backend,
            draft: Mutex::new(String::new()),
            latest: LatestSlot::new(),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Schema every analysis response must satisfy.
    pub fn schema() -> ResponseSchema {
        ResponseSchema::new(
            TheaterAnalysis::schema_name(),
            "Deconstruct a conflict into five voices.",
            TheaterAnalysis::response_schema(),
        )
    }

    /// Place previously logged text into the input draft.
    pub fn promote_text(&self, text: impl Into<String>) {
        *self.draft.lock() = text.into();
    }

    /// Current input draft.
    pub fn draft(&self) -> String {
        self.draft.lock().clone()
    }

    pub fn state(&self) -> TheaterState {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            TheaterState::Analyzing
        } else if self.latest.get().is_some() {
            TheaterState::Result
        } else {
            TheaterState::Idle
        }
    }

    /// The result on display: the latest-issued invocation's outcome.
    pub fn latest(&self) -> Option<TheaterOutcome> {
        self.latest.get()
    }

    /// Analyze the input draft, consuming it.
    pub async fn analyze_input(&self, language: Language) -> Option<TheaterOutcome> {
        let input = std::mem::take(&mut *self.draft.lock());
        self.analyze(&input, language).await
    }

    /// Deconstruct `text`. Blank input is a no-op and returns `None`.
    pub async fn analyze(&self, text: &str, language: Language) -> Option<TheaterOutcome> {
        if text.trim().is_empty() {
            return None;
        }

        let ticket = self.latest.issue();
        let _in_flight = InFlight::enter(&self.in_flight);
        debug!(%ticket, chars = text.chars().count(), "Theater analysis started");

        let prompt = prompts::theater(text, language);
        let response = self
            .backend
            .structured_complete(&prompt, &Self::schema())
            .await
            .and_then(parse_structured::<TheaterAnalysis>);

        let (analysis, event_id) = match response {
            Ok(analysis) if analysis.is_failed() => {
                warn!(%ticket, "Theater analysis came back as the error sentinel");
                (analysis, None)
            }
            Ok(analysis) => {
                let id = self
                    .store
                    .append(NarrativeEvent::tension_analysis(analysis.clone()));
                info!(%ticket, event_id = %id, symptom = %analysis.symptom, "Theater analysis saved");
                (analysis, Some(id))
            }
            Err(e) => {
                warn!(%ticket, error = %e, "Theater analysis failed");
                (TheaterAnalysis::failed(), None)
            }
        };

        let mut outcome = TheaterOutcome {
            analysis,
            saved: event_id.is_some(),
            event_id,
            ticket,
            superseded: false,
        };

        if !self.latest.apply(ticket, outcome.clone()) {
            debug!(%ticket, "Theater result superseded; not displayed");
            outcome.superseded = true;
        }
        Some(outcome)
    }
}
