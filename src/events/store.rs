//! Event storage backends

use std::collections::HashMap;
use std::sync::Mutex;

use super::types::Event;
use crate::error::{LedgerError, LedgerResult};

/// Append-only per-token event storage.
///
/// Sequence numbers start at 1 and increase by one per event within a token.
pub trait EventStore: Send + Sync {
    /// Assign consecutive sequence numbers to `events` and persist them
    /// all-or-nothing.
    fn append(&self, token: &str, events: Vec<Event>) -> LedgerResult<Vec<Event>>;

    /// Up to `limit` events with `sequence > after`, ascending.
    fn read(&self, token: &str, after: u64, limit: usize) -> LedgerResult<Vec<Event>>;

    /// Highest sequence appended for `token`, 0 when empty.
    fn head(&self, token: &str) -> LedgerResult<u64>;

    /// Make appended events durable.
    fn flush(&self) -> LedgerResult<()> {
        Ok(())
    }
}

fn poisoned() -> LedgerError {
    LedgerError::StorageUnavailable("event store poisoned".to_string())
}

#[derive(Default)]
pub struct MemoryEventStore {
    streams: Mutex<HashMap<String, Vec<Event>>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventStore for MemoryEventStore {
    fn append(&self, token: &str, events: Vec<Event>) -> LedgerResult<Vec<Event>> {
        let mut streams = self.streams.lock().map_err(|_| poisoned())?;
        let stream = streams.entry(token.to_string()).or_default();
        let mut next = stream.len() as u64 + 1;
        let mut stored = Vec::with_capacity(events.len());
        for mut event in events {
            event.sequence = next;
            next += 1;
            stored.push(event);
        }
        stream.extend(stored.iter().cloned());
        Ok(stored)
    }

    fn read(&self, token: &str, after: u64, limit: usize) -> LedgerResult<Vec<Event>> {
        let streams = self.streams.lock().map_err(|_| poisoned())?;
        Ok(streams
            .get(token)
            .map(|s| s.iter().skip(after as usize).take(limit).cloned().collect())
            .unwrap_or_default())
    }

    fn head(&self, token: &str) -> LedgerResult<u64> {
        let streams = self.streams.lock().map_err(|_| poisoned())?;
        Ok(streams.get(token).map(|s| s.len() as u64).unwrap_or(0))
    }
}

/// Sled-backed store: one tree per token, big-endian sequence keys, bincode values.
pub struct SledEventStore {
    db: sled::Db,
    append_lock: Mutex<()>,
}

impl SledEventStore {
    pub fn open(path: &str) -> LedgerResult<Self> {
        let db = sled::open(path)?;
        Ok(Self::with_db(db))
    }

    pub fn with_db(db: sled::Db) -> Self {
        Self {
            db,
            append_lock: Mutex::new(()),
        }
    }

    fn tree(&self, token: &str) -> LedgerResult<sled::Tree> {
        Ok(self.db.open_tree(format!("events/{}", token))?)
    }

    fn last_sequence(tree: &sled::Tree) -> LedgerResult<u64> {
        match tree.last()? {
            Some((key, _)) => decode_key(&key),
            None => Ok(0),
        }
    }
}

fn decode_key(key: &[u8]) -> LedgerResult<u64> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| LedgerError::StorageUnavailable("malformed event key".to_string()))?;
    Ok(u64::from_be_bytes(bytes))
}

impl EventStore for SledEventStore {
    fn append(&self, token: &str, events: Vec<Event>) -> LedgerResult<Vec<Event>> {
        let _guard = self.append_lock.lock().map_err(|_| poisoned())?;
        let tree = self.tree(token)?;
        let mut next = Self::last_sequence(&tree)? + 1;
        let mut batch = sled::Batch::default();
        let mut stored = Vec::with_capacity(events.len());
        for mut event in events {
            event.sequence = next;
            batch.insert(next.to_be_bytes().to_vec(), bincode::serialize(&event)?);
            stored.push(event);
            next += 1;
        }
        tree.apply_batch(batch)?;
        Ok(stored)
    }

    fn read(&self, token: &str, after: u64, limit: usize) -> LedgerResult<Vec<Event>> {
        let tree = self.tree(token)?;
        let start = after.saturating_add(1).to_be_bytes();
        let mut out = Vec::new();
        for item in tree.range(start..).take(limit) {
            let (_, value) = item?;
            out.push(bincode::deserialize(&value)?);
        }
        Ok(out)
    }

    fn head(&self, token: &str) -> LedgerResult<u64> {
        Self::last_sequence(&self.tree(token)?)
    }

    fn flush(&self) -> LedgerResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

/// Store that can be switched offline to exercise fatal storage failures.
#[cfg(test)]
pub(crate) struct FlakyEventStore {
    inner: MemoryEventStore,
    pub(crate) offline: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl FlakyEventStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: MemoryEventStore::new(),
            offline: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, std::sync::atomic::Ordering::SeqCst);
    }

    fn check(&self) -> LedgerResult<()> {
        if self.offline.load(std::sync::atomic::Ordering::SeqCst) {
            Err(LedgerError::StorageUnavailable("event store offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
impl EventStore for FlakyEventStore {
    fn append(&self, token: &str, events: Vec<Event>) -> LedgerResult<Vec<Event>> {
        self.check()?;
        self.inner.append(token, events)
    }

    fn read(&self, token: &str, after: u64, limit: usize) -> LedgerResult<Vec<Event>> {
        self.check()?;
        self.inner.read(token, after, limit)
    }

    fn head(&self, token: &str) -> LedgerResult<u64> {
        self.check()?;
        self.inner.head(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::{EventKind, NewEvent};
    use chrono::Utc;

    fn events(n: usize) -> Vec<Event> {
        (0..n)
            .map(|i| NewEvent::new(EventKind::Transfer, &format!("a{}", i)).stamp("T1", Utc::now()))
            .collect()
    }

    fn exercise(store: &dyn EventStore) {
        let first = store.append("T1", events(2)).unwrap();
        assert_eq!(first.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![1, 2]);
        let second = store.append("T1", events(3)).unwrap();
        assert_eq!(second[0].sequence, 3);
        assert_eq!(store.head("T1").unwrap(), 5);

        // Independent per-token numbering.
        let other = store.append("T2", events(1)).unwrap();
        assert_eq!(other[0].sequence, 1);

        let page = store.read("T1", 2, 2).unwrap();
        assert_eq!(page.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![3, 4]);
        assert_eq!(page[0].actor, "a0");
        assert!(store.read("T1", 5, 10).unwrap().is_empty());
        assert_eq!(store.head("missing").unwrap(), 0);
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryEventStore::new());
    }

    #[test]
    fn test_sled_store() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        exercise(&SledEventStore::with_db(db));
    }

    #[test]
    fn test_sled_store_persists_amounts() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let store = SledEventStore::with_db(db);
        let big = crate::encoding::parse_amount("123456789012345678901234567890").unwrap();
        let e = NewEvent::new(EventKind::Mint, "root")
            .counterparty("alice")
            .amount(&big)
            .stamp("T1", Utc::now());
        store.append("T1", vec![e]).unwrap();
        let back = store.read("T1", 0, 1).unwrap();
        assert_eq!(back[0].amount, Some(big));
        assert_eq!(back[0].counterparty.as_deref(), Some("alice"));
    }

    #[test]
    fn test_flaky_store_reports_unavailable() {
        let store = FlakyEventStore::new();
        store.set_offline(true);
        let err = store.append("T1", events(1)).unwrap_err();
        assert!(err.is_fatal());
        store.set_offline(false);
        assert_eq!(store.append("T1", events(1)).unwrap()[0].sequence, 1);
    }
}
