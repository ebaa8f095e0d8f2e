//! Event publication.

use std::sync::Mutex;

use custody_types::TreasuryEvent;
use tracing::info;

/// Receives domain events after their transaction has committed.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &TreasuryEvent);
}

/// Logs every event as a structured `tracing` record.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn publish(&self, event: &TreasuryEvent) {
        let payload = serde_json::to_string(event).unwrap_or_default();
        info!(target: "custody::events", event = event.name(), payload = %payload, "Treasury event");
    }
}

/// Collects events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<TreasuryEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TreasuryEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(TreasuryEvent::name).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl EventSink for MemorySink {
    fn publish(&self, event: &TreasuryEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
