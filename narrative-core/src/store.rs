//! The append-only narrative event store.
//!
//! The store is the single source of truth for the narrative log. It is
//! owned by the session and shared by `Arc` with every pipeline. Reads hand
//! out an immutable snapshot, so a reader always sees either the state
//! before an append or the state after it.

use crate::event::NarrativeEvent;
use crate::id::EventId;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Append-only, in-memory sequence of narrative events.
#[derive(Debug, Default)]
pub struct EventStore {
    events: RwLock<Arc<Vec<NarrativeEvent>>>,
}

impl EventStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one event, assigning an id if it has none.
    ///
    /// Returns the id the event was stored under.
    pub fn append(&self, mut event: NarrativeEvent) -> EventId {
        event.assign_id_if_missing();
        let id = event.id();
        let kind = event.kind();

        // Copies only while a reader still holds the previous snapshot.
        let mut guard = self.events.write();
        let events = Arc::make_mut(&mut *guard);
        events.push(event);
        let len = events.len();
        drop(guard);

        debug!(event_id = %id, %kind, events = len, "Appended narrative event");
        id
    }

    /// Snapshot of every event in insertion order (oldest first).
    pub fn all(&self) -> Arc<Vec<NarrativeEvent>> {
        self.events.read().clone()
    }

    /// Events ordered for display: newest timestamp first.
    ///
    /// Equal timestamps put the later insertion first.
    pub fn by_recency(&self) -> Vec<NarrativeEvent> {
        let snapshot = self.all();
        let mut indexed: Vec<(usize, &NarrativeEvent)> = snapshot.iter().enumerate().collect();
        indexed.sort_by(|(ia, a), (ib, b)| {
            b.timestamp()
                .cmp(&a.timestamp())
                .then_with(|| ib.cmp(ia))
        });
        indexed.into_iter().map(|(_, event)| event.clone()).collect()
    }

    /// Look up one event by id.
    pub fn get(&self, id: EventId) -> Option<NarrativeEvent> {
        self.all().iter().find(|event| event.id() == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventContent;

    fn timestamps(events: &[NarrativeEvent]) -> Vec<i64> {
        events.iter().map(|e| e.timestamp_millis()).collect()
    }

    #[test]
    fn test_append_preserves_insertion_order() {
        let store = EventStore::new();
        for ts in [100, 50, 200] {
            store.append(NarrativeEvent::log_entry(format!("at {ts}")).with_timestamp_millis(ts));
        }

        assert_eq!(timestamps(&store.all()), vec![100, 50, 200]);
        assert_eq!(timestamps(&store.by_recency()), vec![200, 100, 50]);
    }

    #[test]
    fn test_recency_ties_put_later_insertion_first() {
        let store = EventStore::new();
        let first = store.append(NarrativeEvent::log_entry("first").with_timestamp_millis(10));
        let second = store.append(NarrativeEvent::log_entry("second").with_timestamp_millis(10));

        let ordered: Vec<EventId> = store.by_recency().iter().map(|e| e.id()).collect();
        assert_eq!(ordered, vec![second, first]);
    }

    #[test]
    fn test_snapshot_is_unaffected_by_later_append() {
        let store = EventStore::new();
        store.append(NarrativeEvent::log_entry("one"));
        let before = store.all();

        store.append(NarrativeEvent::log_entry("two"));

        assert_eq!(before.len(), 1);
        assert_eq!(store.all().len(), 2);
    }

    #[test]
    fn test_unshared_log_grows_in_place() {
        let store = EventStore::new();
        store.append(NarrativeEvent::log_entry("one"));
        let before = Arc::as_ptr(&store.all()) as usize;

        store.append(NarrativeEvent::log_entry("two"));

        assert_eq!(Arc::as_ptr(&store.all()) as usize, before);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_append_assigns_missing_id() {
        let store = EventStore::new();
        let id = store.append(NarrativeEvent::unassigned(EventContent::LogEntry(
            "anonymous".to_string(),
        )));

        assert!(!id.is_nil());
        let stored = store.get(id).unwrap();
        assert_eq!(stored.log_text(), Some("anonymous"));
    }

    #[test]
    fn test_get_unknown_id() {
        let store = EventStore::new();
        assert!(store.is_empty());
        assert!(store.get(EventId::new()).is_none());
    }
}
