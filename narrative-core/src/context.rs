//! Context window serialization.
//!
//! Turns the narrative log into the bounded textual digest handed to the
//! synthesis prompt. Only the symptom and the two opposing voices of an
//! analysis are surfaced; authorship and emotional state stay out so the
//! prompt dwells on tension rather than resolution.

use crate::event::{EventContent, NarrativeEvent};

/// Maximum number of characters in a serialized context window.
///
/// The cut is a plain prefix and may fall mid-line.
pub const CONTEXT_CHAR_BUDGET: usize = 10_000;

/// Serialize events (insertion order) into at most [`CONTEXT_CHAR_BUDGET`] characters.
///
/// An empty slice yields an empty string, meaning "no context".
pub fn serialize(events: &[NarrativeEvent]) -> String {
    let full = serialize_unbounded(events);
    match full.char_indices().nth(CONTEXT_CHAR_BUDGET) {
        Some((cut, _)) => full[..cut].to_string(),
        None => full,
    }
}

/// Serialize without applying the character budget.
pub fn serialize_unbounded(events: &[NarrativeEvent]) -> String {
    events
        .iter()
        .map(render_line)
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_line(event: &NarrativeEvent) -> String {
    match event.content() {
        EventContent::LogEntry(text) => format!("[LOG]: {text}"),
        EventContent::TensionAnalysis(analysis) => format!(
            "[ANALYSIS]: Symptom: {}, Knot: {} vs {}",
            analysis.symptom, analysis.id_voice, analysis.superego_voice
        ),
    }
}
