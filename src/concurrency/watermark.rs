use crate::common::config::Timestamp;
use std::collections::HashSet;

/// Tracks the start timestamps of all running transactions.
///
/// The watermark is the oldest active start timestamp; it is the reclamation
/// boundary below which no future read can reach a version.
#[derive(Debug, Default)]
pub struct Watermark {
    active_txns: HashSet<Timestamp>,
}

impl Watermark {
    pub fn new() -> Self {
        Self {
            active_txns: HashSet::new(),
        }
    }

    /// Registers a transaction's start timestamp as active.
    pub fn add_txn(&mut self, start: Timestamp) {
        let inserted = self.active_txns.insert(start);
        debug_assert!(inserted, "start timestamp registered twice");
    }

    /// Removes a transaction's start timestamp from the active set.
    pub fn remove_txn(&mut self, start: Timestamp) {
        let removed = self.active_txns.remove(&start);
        debug_assert!(removed, "removing an unregistered start timestamp");
    }

    /// Returns the oldest active start timestamp, or `default_ts` when no
    /// transaction is running.
    pub fn oldest(&self, default_ts: Timestamp) -> Timestamp {
        self.active_txns.iter().min().copied().unwrap_or(default_ts)
    }

    pub fn is_empty(&self) -> bool {
        self.active_txns.is_empty()
    }
}
