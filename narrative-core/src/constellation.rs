//! The Core: whole-history synthesis into a constellation of signifiers.
//!
//! The pipeline reads the entire narrative log, serializes it into a
//! bounded context window, and asks the backend for 5 to 7 recurring
//! themes. It never writes to the log. Results are ephemeral; the two
//! layout coordinates are fresh random values on every run.

use crate::backend::{parse_structured, NarrativeBackend, ResponseSchema};
use crate::context;
use crate::id::SignifierId;
use crate::language::Language;
use crate::prompts;
use crate::store::EventStore;
use crate::ticket::{InFlight, LatestSlot, Ticket};
use narrative_macros::Schema;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const MIN_WEIGHT: u8 = 1;
pub const MAX_WEIGHT: u8 = 3;

/// Layout coordinates are drawn uniformly from this closed range.
pub const COORDINATE_RANGE: std::ops::RangeInclusive<f64> = 15.0..=85.0;

/// A weighted theme extracted from the whole history. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signifier {
    pub id: SignifierId,
    /// Short theme label.
    pub text: String,
    /// Observation grounding the theme in the history.
    pub insight: String,
    /// Salience, 1 (minor) to 3 (core).
    pub weight: u8,
    /// Decorative layout hint in `[0, 100]`. Carries no meaning.
    pub x: f64,
    /// Decorative layout hint in `[0, 100]`. Carries no meaning.
    pub y: f64,
}

/// One recurring theme that governs the user's current life structure
#[derive(Debug, Clone, Schema, Deserialize)]
#[schema(name = "signifier")]
pub struct SignifierDraft {
    /// The keyword itself, e.g. "Control", "Father", "Void"
    pub text: String,
    /// A non-judgmental observation linking the history to this theme
    pub insight: String,
    /// 1 (minor theme) to 3 (major core theme)
    pub weight: f64,
}

/// Result of one synthesis invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisOutcome {
    /// The log is empty; the backend was not called.
    EmptyHistory,
    Synthesized(Vec<Signifier>),
    /// The backend failed or answered with something unusable.
    Failed,
    /// A newer invocation was issued before this one resolved; its result was discarded.
    Superseded,
}

impl SynthesisOutcome {
    /// Signifiers to display; empty for every variant but `Synthesized`.
    pub fn signifiers(&self) -> &[Signifier] {
        match self {
            SynthesisOutcome::Synthesized(signifiers) => signifiers,
            _ => &[],
        }
    }
}

/// Round and clamp a raw weight into `MIN_WEIGHT..=MAX_WEIGHT`.
pub fn normalize_weight(raw: f64) -> u8 {
    let weight = if raw.is_nan() {
        MIN_WEIGHT
    } else {
        raw.round().clamp(f64::from(MIN_WEIGHT), f64::from(MAX_WEIGHT)) as u8
    };
    if f64::from(weight) != raw {
        debug!(raw, weight, "Normalized signifier weight");
    }
    weight
}

fn place<R: Rng + ?Sized>(draft: SignifierDraft, rng: &mut R) -> Signifier {
    Signifier {
        id: SignifierId::new(),
        weight: normalize_weight(draft.weight),
        text: draft.text,
        insight: draft.insight,
        x: rng.gen_range(COORDINATE_RANGE),
        y: rng.gen_range(COORDINATE_RANGE),
    }
}

/// Whole-history synthesis over the shared event store.
pub struct ConstellationPipeline {
    store: Arc<EventStore>,
    backend: Arc<dyn NarrativeBackend>,
    latest: LatestSlot<SynthesisOutcome>,
    generated: AtomicBool,
    in_flight: AtomicUsize,
}

impl ConstellationPipeline {
    pub fn new(store: Arc<EventStore>, backend: Arc<dyn NarrativeBackend>) -> Self {
        Self {
            store,
            backend,
            latest: LatestSlot::new(),
            generated: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Schema of one synthesis response: an array of signifier drafts.
    pub fn schema() -> ResponseSchema {
        ResponseSchema::array_of(
            "constellation",
            "Extract 5 to 7 master signifiers from the narrative history.",
            SignifierDraft::response_schema(),
        )
    }

    /// The applied result of the latest-issued invocation, if any.
    pub fn latest(&self) -> Option<SynthesisOutcome> {
        self.latest.get()
    }

    pub fn is_synthesizing(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    /// True when the log has events and nothing has been synthesized since the last reset.
    pub fn has_unsynthesized_history(&self) -> bool {
        !self.store.is_empty() && !self.generated.load(Ordering::SeqCst) && !self.is_synthesizing()
    }

    /// Forget the applied result so the next automatic trigger fires again.
    pub fn reset(&self) {
        self.latest.clear();
        self.generated.store(false, Ordering::SeqCst);
    }

    /// Run once if there is unsynthesized history; `None` otherwise.
    pub async fn synthesize_if_needed(&self, language: Language) -> Option<SynthesisOutcome> {
        if !self.has_unsynthesized_history() {
            return None;
        }
        Some(self.refresh(language).await)
    }

    /// Synthesize from the current log, unconditionally.
    ///
    /// If a newer invocation is issued while this one is waiting, this one
    /// returns [`SynthesisOutcome::Superseded`] and applies nothing.
    pub async fn refresh(&self, language: Language) -> SynthesisOutcome {
        let ticket = self.latest.issue();
        let snapshot = self.store.all();

        if snapshot.is_empty() {
            debug!(%ticket, "Constellation skipped: empty history");
            return self.settle(ticket, SynthesisOutcome::EmptyHistory);
        }

        let in_flight = InFlight::enter(&self.in_flight);
        let history = context::serialize(&snapshot);
        debug!(%ticket, events = snapshot.len(), chars = history.chars().count(), "Constellation synthesis started");

        let prompt = prompts::constellation(&history, language);
        let response = self
            .backend
            .structured_complete(&prompt, &Self::schema())
            .await
            .and_then(parse_structured::<Vec<SignifierDraft>>);
        drop(in_flight);

        let outcome = match response {
            Ok(drafts) => {
                let mut rng = rand::thread_rng();
                let signifiers: Vec<Signifier> =
                    drafts.into_iter().map(|draft| place(draft, &mut rng)).collect();
                info!(%ticket, signifiers = signifiers.len(), "Constellation synthesized");
                SynthesisOutcome::Synthesized(signifiers)
            }
            Err(e) => {
                warn!(%ticket, error = %e, "Constellation synthesis failed");
                SynthesisOutcome::Failed
            }
        };
        self.settle(ticket, outcome)
    }

    fn settle(&self, ticket: Ticket, outcome: SynthesisOutcome) -> SynthesisOutcome {
        if self.latest.apply(ticket, outcome.clone()) {
            if outcome != SynthesisOutcome::EmptyHistory {
                self.generated.store(true, Ordering::SeqCst);
            }
            outcome
        } else {
            debug!(%ticket, "Constellation result superseded; discarded");
            SynthesisOutcome::Superseded
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NarrativeEvent;
    use crate::testing::ScriptedBackend;
    use serde_json::json;

    fn pipeline(
        backend: ScriptedBackend,
    ) -> (ConstellationPipeline, Arc<EventStore>, Arc<ScriptedBackend>) {
        let store = Arc::new(EventStore::new());
        let backend = Arc::new(backend);
        (ConstellationPipeline::new(store.clone(), backend.clone()), store, backend)
    }

    #[test]
    fn test_weight_normalization() {
        assert_eq!(normalize_weight(2.0), 2);
        assert_eq!(normalize_weight(2.6), 3);
        assert_eq!(normalize_weight(0.0), 1);
        assert_eq!(normalize_weight(9.0), 3);
        assert_eq!(normalize_weight(f64::NAN), 1);
    }

    #[test]
    fn test_schema_is_array_of_required_fields() {
        let schema = ConstellationPipeline::schema();
        assert!(schema.is_array());
        let items = &schema.schema()["items"];
        assert_eq!(items["properties"]["weight"]["type"], "number");
        assert_eq!(items["required"], json!(["text", "insight", "weight"]));
    }

    #[tokio::test]
    async fn test_empty_history_skips_backend() {
        let (core, _, backend) = pipeline(ScriptedBackend::new());

        assert_eq!(core.refresh(Language::En).await, SynthesisOutcome::EmptyHistory);
        assert_eq!(backend.structured_calls(), 0);
        assert!(!core.has_unsynthesized_history());
    }

    #[tokio::test]
    async fn test_signifiers_get_ids_and_coordinates() {
        let (core, store, backend) = pipeline(ScriptedBackend::new().with_response(json!([
            {"text": "Control", "insight": "You narrate every plan twice.", "weight": 2},
            {"text": "Void", "insight": "Rest reads as failure.", "weight": 1},
        ])));
        store.append(NarrativeEvent::log_entry("I feel stuck"));

        let outcome = core.refresh(Language::En).await;
        let signifiers = outcome.signifiers();

        assert_eq!(signifiers.len(), 2);
        assert_ne!(signifiers[0].id, signifiers[1].id);
        assert_eq!(signifiers[0].weight, 2);
        for s in signifiers {
            assert!(COORDINATE_RANGE.contains(&s.x));
            assert!(COORDINATE_RANGE.contains(&s.y));
        }
        assert!(backend.prompts()[0].contains("[LOG]: I feel stuck"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_distinct_from_empty_history() {
        let (core, store, _) = pipeline(
            ScriptedBackend::new()
                .with_failure("unreachable")
                .with_response(json!({"not": "an array"})),
        );
        store.append(NarrativeEvent::log_entry("something"));

        assert_eq!(core.refresh(Language::En).await, SynthesisOutcome::Failed);
        assert_eq!(core.refresh(Language::En).await, SynthesisOutcome::Failed);
        assert!(core.refresh(Language::En).await.signifiers().is_empty());
    }

    #[tokio::test]
    async fn test_auto_trigger_runs_once_until_reset() {
        let (core, store, backend) = pipeline(
            ScriptedBackend::new()
                .with_response(json!([]))
                .with_response(json!([])),
        );
        assert!(core.synthesize_if_needed(Language::En).await.is_none());

        store.append(NarrativeEvent::log_entry("entry"));
        assert!(core.has_unsynthesized_history());
        assert!(core.synthesize_if_needed(Language::En).await.is_some());
        assert!(core.synthesize_if_needed(Language::En).await.is_none());
        assert_eq!(backend.structured_calls(), 1);

        core.reset();
        assert!(core.synthesize_if_needed(Language::En).await.is_some());
        assert_eq!(backend.structured_calls(), 2);
    }
}
