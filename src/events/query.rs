use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;

use super::store::EventStore;
use super::types::{Event, EventKind};
use crate::account::types::{Address, TokenId};
use crate::error::LedgerResult;

const PAGE_SIZE: usize = 256;

/// Match criteria; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    pub kinds: Vec<EventKind>,
    /// Matches the actor or the counterparty.
    pub address: Option<Address>,
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: EventKind) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn address(mut self, address: &str) -> Self {
        self.address = Some(address.to_string());
        self
    }

    pub fn between(mut self, from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.until = Some(until);
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind) {
            return false;
        }
        if let Some(address) = &self.address {
            if !event.involves(address) {
                return false;
            }
        }
        if self.from.map_or(false, |from| event.timestamp < from) {
            return false;
        }
        if self.until.map_or(false, |until| event.timestamp > until) {
            return false;
        }
        true
    }
}

/// Lazy, finite, restartable scan over one token's events.
///
/// The upper bound is the log head observed when the query was built, so
/// events appended afterwards are not yielded. Pages are fetched on demand.
/// A storage failure is yielded once as `Err` and ends the scan.
#[derive(Clone)]
pub struct EventQuery {
    store: Arc<dyn EventStore>,
    token: TokenId,
    filter: EventFilter,
    upper: u64,
    cursor: u64,
    buffer: VecDeque<Event>,
    done: bool,
}

impl EventQuery {
    pub(crate) fn new(store: Arc<dyn EventStore>, token: &str, filter: EventFilter) -> LedgerResult<Self> {
        let upper = store.head(token)?;
        Ok(Self {
            store,
            token: token.to_string(),
            filter,
            upper,
            cursor: 0,
            buffer: VecDeque::new(),
            done: false,
        })
    }

    /// Rewind to the first event, keeping the original upper bound.
    pub fn restart(&mut self) {
        self.cursor = 0;
        self.buffer.clear();
        self.done = false;
    }

    pub fn upper_bound(&self) -> u64 {
        self.upper
    }

    fn fill(&mut self) -> LedgerResult<()> {
        while self.buffer.is_empty() && self.cursor < self.upper {
            let page = self.store.read(&self.token, self.cursor, PAGE_SIZE)?;
            if page.is_empty() {
                self.cursor = self.upper;
                break;
            }
            for event in page {
                if event.sequence > self.upper {
                    self.cursor = self.upper;
                    break;
                }
                self.cursor = event.sequence;
                if self.filter.matches(&event) {
                    self.buffer.push_back(event);
                }
            }
        }
        Ok(())
    }
}

impl Iterator for EventQuery {
    type Item = LedgerResult<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Err(e) = self.fill() {
            self.done = true;
            return Some(Err(e));
        }
        match self.buffer.pop_front() {
            Some(event) => Some(Ok(event)),
            None => {
                self.done = true;
                None
            }
        }
    }
}
