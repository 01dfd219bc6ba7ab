//! Event Log
//!
//! Append-only audit timeline of every state change, numbered per token.
//! Components append while still holding the locks of the rows they are
//! about to mutate, so a storage failure aborts the operation before any
//! state changes.

pub mod types;
pub mod store;
pub mod query;

use std::sync::Arc;
use tracing::error;

pub use query::{EventFilter, EventQuery};
pub use store::{EventStore, MemoryEventStore, SledEventStore};
pub use types::{Event, EventKind, NewEvent};

use crate::clock::Clock;
use crate::config::{EventBackend, EventsConfig};
use crate::error::{LedgerError, LedgerResult};

pub struct EventLog {
    store: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
}

impl EventLog {
    pub fn new(store: Arc<dyn EventStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn from_config(config: &EventsConfig, clock: Arc<dyn Clock>) -> LedgerResult<Self> {
        let store: Arc<dyn EventStore> = match config.backend {
            EventBackend::Memory => Arc::new(MemoryEventStore::new()),
            EventBackend::Sled => Arc::new(SledEventStore::open(&config.path)?),
        };
        Ok(Self::new(store, clock))
    }

    pub fn append(&self, token: &str, event: NewEvent) -> LedgerResult<Event> {
        self.append_all(token, vec![event])?
            .pop()
            .ok_or_else(|| LedgerError::StorageUnavailable("append returned no event".to_string()))
    }

    /// Append several events atomically, in order.
    pub fn append_all(&self, token: &str, events: Vec<NewEvent>) -> LedgerResult<Vec<Event>> {
        let now = self.clock.now();
        let stamped = events.into_iter().map(|e| e.stamp(token, now)).collect();
        self.store.append(token, stamped).map_err(|e| {
            error!(token, error = %e, "event append failed");
            e
        })
    }

    pub fn query(&self, token: &str, filter: EventFilter) -> LedgerResult<EventQuery> {
        EventQuery::new(self.store.clone(), token, filter)
    }

    pub fn head(&self, token: &str) -> LedgerResult<u64> {
        self.store.head(token)
    }

    pub fn flush(&self) -> LedgerResult<()> {
        self.store.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_append_stamps_with_clock() {
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let log = EventLog::new(Arc::new(MemoryEventStore::new()), Arc::new(ManualClock::new(at)));
        let e = log.append("T1", NewEvent::new(EventKind::Freeze, "compliance").counterparty("alice")).unwrap();
        assert_eq!(e.sequence, 1);
        assert_eq!(e.timestamp, at);
        assert_eq!(e.token, "T1");

        let batch = log
            .append_all(
                "T1",
                vec![
                    NewEvent::new(EventKind::Transfer, "alice"),
                    NewEvent::new(EventKind::Transfer, "alice"),
                ],
            )
            .unwrap();
        assert_eq!(batch.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(log.head("T1").unwrap(), 3);
    }

    #[test]
    fn test_sled_backend_from_config() {
        let dir = std::env::temp_dir().join(format!("ledger-events-{}", uuid::Uuid::new_v4()));
        let config = EventsConfig {
            backend: EventBackend::Sled,
            path: dir.to_string_lossy().to_string(),
        };
        let clock = Arc::new(crate::clock::SystemClock);
        {
            let log = EventLog::from_config(&config, clock.clone()).unwrap();
            log.append("T1", NewEvent::new(EventKind::Mint, "root")).unwrap();
            log.flush().unwrap();
        }
        let reopened = EventLog::from_config(&config, clock).unwrap();
        assert_eq!(reopened.head("T1").unwrap(), 1);
        let _ = std::fs::remove_dir_all(dir);
    }
}
