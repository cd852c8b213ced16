//! Narrative events: the durable records of the narrative log.
//!
//! An event is either a raw log entry (free text the user wrote) or a
//! structured tension analysis produced by the Theater pipeline. Events are
//! immutable once created; the only way to change the log is to append.

use crate::id::EventId;
use chrono::{DateTime, Utc};
use narrative_macros::Schema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Field value the model (or the pipeline) uses to mark a failed analysis.
pub const ERROR_SENTINEL: &str = "Error";

/// Structural reading of one conflict, split into five voices.
#[derive(Debug, Clone, PartialEq, Eq, Schema, Serialize, Deserialize)]
#[schema(name = "theater_analysis", rename_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub struct TheaterAnalysis {
    /// The voice of impulse or avoidance.
    pub id_voice: String,
    /// The voice of mandate or guilt.
    pub superego_voice: String,
    /// The repetitive knot or pattern the two voices produce.
    pub symptom: String,
    /// The structural or environmental shift that would rewrite the pattern.
    pub authorship: String,
    /// The emotional state underneath.
    pub emotional_state: String,
}

impl TheaterAnalysis {
    /// The all-`"Error"` record substituted when an analysis cannot be produced.
    pub fn failed() -> Self {
        Self {
            id_voice: ERROR_SENTINEL.to_string(),
            superego_voice: ERROR_SENTINEL.to_string(),
            symptom: ERROR_SENTINEL.to_string(),
            authorship: ERROR_SENTINEL.to_string(),
            emotional_state: ERROR_SENTINEL.to_string(),
        }
    }

    /// A record whose symptom is the sentinel counts as failed.
    pub fn is_failed(&self) -> bool {
        self.symptom == ERROR_SENTINEL
    }
}

/// Discriminant of an event's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    LogEntry,
    TensionAnalysis,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::LogEntry => write!(f, "log_entry"),
            EventKind::TensionAnalysis => write!(f, "tension_analysis"),
        }
    }
}

/// Payload of a narrative event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventContent {
    /// Raw text the user logged.
    LogEntry(String),
    /// A completed conflict deconstruction.
    TensionAnalysis(TheaterAnalysis),
}

impl EventContent {
    pub fn kind(&self) -> EventKind {
        match self {
            EventContent::LogEntry(_) => EventKind::LogEntry,
            EventContent::TensionAnalysis(_) => EventKind::TensionAnalysis,
        }
    }
}

/// One durable, immutable record in the narrative log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "WireEvent", try_from = "WireEvent")]
pub struct NarrativeEvent {
    id: EventId,
    timestamp: DateTime<Utc>,
    content: EventContent,
    summary: Option<String>,
}

impl NarrativeEvent {
    /// Create an event with a fresh id, stamped now.
    pub fn new(content: EventContent) -> Self {
        Self {
            id: EventId::new(),
            timestamp: Utc::now(),
            content,
            summary: None,
        }
    }

    /// Create a log entry event.
    pub fn log_entry(text: impl Into<String>) -> Self {
        Self::new(EventContent::LogEntry(text.into()))
    }

    /// Create a tension analysis event.
    pub fn tension_analysis(analysis: TheaterAnalysis) -> Self {
        Self::new(EventContent::TensionAnalysis(analysis))
    }

    /// Create an event whose id is left for the store to assign.
    pub fn unassigned(content: EventContent) -> Self {
        Self {
            id: EventId::nil(),
            ..Self::new(content)
        }
    }

    /// Override the creation time.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Override the creation time with milliseconds since the epoch.
    ///
    /// Out-of-range values leave the timestamp unchanged.
    pub fn with_timestamp_millis(mut self, millis: i64) -> Self {
        if let Some(timestamp) = DateTime::from_timestamp_millis(millis) {
            self.timestamp = timestamp;
        }
        self
    }

    /// Attach a condensed representation.
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn kind(&self) -> EventKind {
        self.content.kind()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    pub fn content(&self) -> &EventContent {
        &self.content
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    /// Text of a log entry, `None` for analyses.
    pub fn log_text(&self) -> Option<&str> {
        match &self.content {
            EventContent::LogEntry(text) => Some(text),
            EventContent::TensionAnalysis(_) => None,
        }
    }

    /// Analysis payload, `None` for log entries.
    pub fn analysis(&self) -> Option<&TheaterAnalysis> {
        match &self.content {
            EventContent::TensionAnalysis(analysis) => Some(analysis),
            EventContent::LogEntry(_) => None,
        }
    }

    pub(crate) fn assign_id_if_missing(&mut self) {
        if self.id.is_nil() {
            self.id = EventId::new();
        }
    }
}

/// Errors decoding a serialized event.
#[derive(Debug, Error)]
pub enum EventDecodeError {
    #[error("event of type {kind} carries mismatched content")]
    ContentMismatch { kind: EventKind },
}

// Serialized shape: `{ id, type, timestamp (ms), content, summary? }`.
#[derive(Serialize, Deserialize)]
struct WireEvent {
    id: EventId,
    #[serde(rename = "type")]
    kind: EventKind,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    timestamp: DateTime<Utc>,
    content: WireContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Analysis(TheaterAnalysis),
}

impl From<NarrativeEvent> for WireEvent {
    fn from(event: NarrativeEvent) -> Self {
        let kind = event.kind();
        let content = match event.content {
            EventContent::LogEntry(text) => WireContent::Text(text),
            EventContent::TensionAnalysis(analysis) => WireContent::Analysis(analysis),
        };
        Self {
            id: event.id,
            kind,
            timestamp: event.timestamp,
            content,
            summary: event.summary,
        }
    }
}

impl TryFrom<WireEvent> for NarrativeEvent {
    type Error = EventDecodeError;

    fn try_from(wire: WireEvent) -> Result<Self, Self::Error> {
        let content = match (wire.kind, wire.content) {
            (EventKind::LogEntry, WireContent::Text(text)) => EventContent::LogEntry(text),
            (EventKind::TensionAnalysis, WireContent::Analysis(analysis)) => {
                EventContent::TensionAnalysis(analysis)
            }
            (kind, _) => return Err(EventDecodeError::ContentMismatch { kind }),
        };
        Ok(Self {
            id: wire.id,
            timestamp: wire.timestamp,
            content,
            summary: wire.summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_analysis() -> TheaterAnalysis {
        TheaterAnalysis {
            id_voice: "Stay in bed".to_string(),
            superego_voice: "You must finish the thesis".to_string(),
            symptom: "Procrastination loop".to_string(),
            authorship: "Work in the library".to_string(),
            emotional_state: "Anxious".to_string(),
        }
    }

    #[test]
    fn test_failed_analysis_is_all_sentinel() {
        let failed = TheaterAnalysis::failed();
        assert!(failed.is_failed());
        assert_eq!(failed.id_voice, "Error");
        assert_eq!(failed.superego_voice, "Error");
        assert_eq!(failed.authorship, "Error");
        assert_eq!(failed.emotional_state, "Error");
        assert!(!sample_analysis().is_failed());
    }

    #[test]
    fn test_analysis_schema_lists_five_required_strings() {
        let schema = TheaterAnalysis::response_schema();
        assert_eq!(TheaterAnalysis::schema_name(), "theater_analysis");
        assert_eq!(schema["type"], "object");

        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(
            required,
            vec!["idVoice", "superegoVoice", "symptom", "authorship", "emotionalState"]
        );
        for field in required {
            assert_eq!(schema["properties"][field]["type"], "string");
        }
    }

    #[test]
    fn test_log_entry_wire_format() {
        let event = NarrativeEvent::log_entry("I feel stuck").with_timestamp_millis(1_700_000_000_000);
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "log_entry");
        assert_eq!(value["content"], "I feel stuck");
        assert_eq!(value["timestamp"], 1_700_000_000_000i64);
        assert!(value.get("summary").is_none());
    }

    #[test]
    fn test_analysis_round_trips_with_summary() {
        let event = NarrativeEvent::tension_analysis(sample_analysis()).with_summary("thesis knot");
        let json = serde_json::to_string(&event).unwrap();
        let parsed: NarrativeEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, event);
        assert_eq!(parsed.summary(), Some("thesis knot"));
        assert_eq!(parsed.analysis().unwrap().symptom, "Procrastination loop");
        assert!(json.contains("\"idVoice\""));
    }

    #[test]
    fn test_mismatched_content_is_rejected() {
        let value = json!({
            "id": "550e8400-e29b-41d4-a716-446655440000",
            "type": "tension_analysis",
            "timestamp": 100,
            "content": "just text"
        });
        assert!(serde_json::from_value::<NarrativeEvent>(value).is_err());
    }

    #[test]
    fn test_accessors_follow_variant() {
        let log = NarrativeEvent::log_entry("hello");
        assert_eq!(log.kind(), EventKind::LogEntry);
        assert_eq!(log.log_text(), Some("hello"));
        assert!(log.analysis().is_none());

        let analysis = NarrativeEvent::tension_analysis(sample_analysis());
        assert_eq!(analysis.kind(), EventKind::TensionAnalysis);
        assert!(analysis.log_text().is_none());
    }

    #[test]
    fn test_unassigned_id_gets_filled() {
        let mut event = NarrativeEvent::unassigned(EventContent::LogEntry("x".to_string()));
        assert!(event.id().is_nil());
        event.assign_id_if_missing();
        assert!(!event.id().is_nil());
    }
}
