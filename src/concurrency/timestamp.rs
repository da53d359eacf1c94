use crate::common::config::{Timestamp, TxnId};
use std::sync::atomic::{AtomicU64, Ordering};

/// High bit distinguishing a running transaction's id from a commit
/// timestamp. A record stamped with a flagged id is visible only to its
/// owner; flipping the stamp to an unflagged commit timestamp publishes it.
pub const TXN_FLAG: Timestamp = 1 << 63;

/// Returns true if `ts` is a commit timestamp rather than a transaction id.
pub const fn committed(ts: Timestamp) -> bool {
    ts & TXN_FLAG == 0
}

/// Returns true if `a` is strictly newer than `b`.
///
/// Timestamps compare as plain unsigned integers, so transaction ids (which
/// carry the high bit) order above every commit timestamp: the garbage
/// collector can never mistake a running transaction's records for
/// reclaimable ones.
pub const fn newer_than(a: Timestamp, b: Timestamp) -> bool {
    a > b
}

/// Converts a start timestamp into the owning transaction's id.
pub const fn start_to_txn_id(start: Timestamp) -> TxnId {
    start | TXN_FLAG
}

/// Monotonic 64-bit timestamp generator.
///
/// Starts at 0, so the first transaction in a fresh engine begins at
/// timestamp 0 — the bootstrap transaction that log readers skip.
#[derive(Debug)]
pub struct TimestampSource {
    time: AtomicU64,
}

impl TimestampSource {
    pub fn new() -> Self {
        Self {
            time: AtomicU64::new(0),
        }
    }

    /// Returns the current time without advancing it.
    pub fn peek(&self) -> Timestamp {
        self.time.load(Ordering::SeqCst)
    }

    /// Returns the current time and advances it.
    pub fn next(&self) -> Timestamp {
        self.time.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for TimestampSource {
    fn default() -> Self {
        Self::new()
    }
}
