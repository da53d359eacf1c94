use crate::common::config::{Timestamp, TxnId};
use crate::concurrency::timestamp::{committed, newer_than, start_to_txn_id};
use crate::storage::record_buffer::{RecordBufferSegmentPool, RedoBuffer, UndoBuffer};
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Per-transaction state.
///
/// A context is mutated only by its owning thread until the transaction
/// finishes; afterwards it is read by commit publication, the log serializer
/// and the garbage collector, which is why the mutable pieces sit behind
/// field-level locks and atomics. The garbage collector drops the last
/// long-lived handle, and only once the undo chain entries are unlinked and
/// the redo records are durably persisted.
pub struct TransactionContext {
    start_time: Timestamp,
    txn_id: TxnId,
    /// Commit or abort timestamp once finished; the txn id while running.
    finish_time: AtomicU64,
    undo_buffer: Mutex<UndoBuffer>,
    redo_buffer: Mutex<RedoBuffer>,
    /// Varlen heap buffers surrendered by reclaimed slots, freed when this
    /// context is deallocated.
    loose_ptrs: Mutex<Vec<Box<[u8]>>>,
    aborted: AtomicBool,
    log_processed: AtomicBool,
}

impl TransactionContext {
    pub(crate) fn new(
        start_time: Timestamp,
        pool: Arc<RecordBufferSegmentPool>,
        logging_enabled: bool,
    ) -> Self {
        let txn_id = start_to_txn_id(start_time);
        Self {
            start_time,
            txn_id,
            finish_time: AtomicU64::new(txn_id),
            undo_buffer: Mutex::new(UndoBuffer::new(Arc::clone(&pool))),
            redo_buffer: Mutex::new(RedoBuffer::new(pool)),
            loose_ptrs: Mutex::new(Vec::new()),
            aborted: AtomicBool::new(false),
            // Without a log manager there is nothing to wait for.
            log_processed: AtomicBool::new(!logging_enabled),
        }
    }

    /// The snapshot timestamp this transaction reads as of.
    pub fn start_time(&self) -> Timestamp {
        self.start_time
    }

    /// The unique writer stamp (start timestamp with the high bit set).
    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    /// Commit or abort timestamp; the txn id while still running.
    pub fn finish_time(&self) -> Timestamp {
        self.finish_time.load(Ordering::SeqCst)
    }

    pub(crate) fn set_finish_time(&self, ts: Timestamp) {
        self.finish_time.store(ts, Ordering::SeqCst);
    }

    pub fn aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub(crate) fn set_aborted(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    /// True once this transaction's redo records are durably flushed (or
    /// were never needed). Gates deallocation by the garbage collector.
    pub fn log_processed(&self) -> bool {
        self.log_processed.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_log_processed(&self) {
        self.log_processed.store(true, Ordering::SeqCst);
    }

    /// A transaction with no undo records never wrote anything.
    pub fn is_read_only(&self) -> bool {
        self.undo_buffer.lock().is_empty()
    }

    pub(crate) fn undo_buffer(&self) -> MutexGuard<'_, UndoBuffer> {
        self.undo_buffer.lock()
    }

    pub(crate) fn redo_buffer(&self) -> MutexGuard<'_, RedoBuffer> {
        self.redo_buffer.lock()
    }

    pub(crate) fn add_loose_ptr(&self, bytes: Box<[u8]>) {
        self.loose_ptrs.lock().push(bytes);
    }

    pub(crate) fn loose_ptr_count(&self) -> usize {
        self.loose_ptrs.lock().len()
    }

    /// Visibility rule: this transaction sees a version stamped `ts` iff the
    /// stamp is its own txn id, or a commit timestamp older than its start.
    pub fn can_see(&self, ts: Timestamp) -> bool {
        ts == self.txn_id || (committed(ts) && newer_than(self.start_time, ts))
    }
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("start_time", &self.start_time)
            .field("txn_id", &self.txn_id)
            .field("finish_time", &self.finish_time())
            .field("aborted", &self.aborted())
            .field("log_processed", &self.log_processed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::tuple_slot::TupleSlot;
    use crate::concurrency::timestamp::TXN_FLAG;
    use crate::storage::undo_record::{null_version, UndoPayload, UndoRecord};

    fn test_txn(start: Timestamp) -> TransactionContext {
        TransactionContext::new(start, Arc::new(RecordBufferSegmentPool::new()), false)
    }

    #[test]
    fn test_basic_properties() {
        let txn = test_txn(10);
        assert_eq!(txn.start_time(), 10);
        assert_eq!(txn.txn_id(), 10 | TXN_FLAG);
        assert_eq!(txn.finish_time(), txn.txn_id());
        assert!(!txn.aborted());
        assert!(txn.log_processed());
        assert!(txn.is_read_only());
    }

    #[test]
    fn test_log_processed_pending_with_logging() {
        let txn =
            TransactionContext::new(3, Arc::new(RecordBufferSegmentPool::new()), true);
        assert!(!txn.log_processed());
        txn.mark_log_processed();
        assert!(txn.log_processed());
    }

    #[test]
    fn test_visibility_rules() {
        let txn = test_txn(10);

        // Own writes are always visible.
        assert!(txn.can_see(txn.txn_id()));
        // Committed versions older than the start are visible.
        assert!(txn.can_see(9));
        assert!(txn.can_see(0));
        // The start timestamp itself and anything newer are not.
        assert!(!txn.can_see(10));
        assert!(!txn.can_see(11));
        // Other transactions' uncommitted stamps are not.
        assert!(!txn.can_see(5 | TXN_FLAG));
    }

    #[test]
    fn test_read_only_tracks_undo_buffer() {
        let txn = test_txn(1);
        assert!(txn.is_read_only());
        txn.undo_buffer().append(UndoRecord::new(
            txn.txn_id(),
            None,
            TupleSlot::new(0, 0),
            UndoPayload::Insert,
            null_version(),
        ));
        assert!(!txn.is_read_only());
    }

    #[test]
    fn test_finish_time_publication() {
        let txn = test_txn(4);
        txn.set_finish_time(12);
        assert_eq!(txn.finish_time(), 12);
    }
}
