use crate::common::config::Timestamp;
use crate::concurrency::timestamp::TimestampSource;
use crate::concurrency::transaction::TransactionContext;
use crate::concurrency::watermark::Watermark;
use crate::recovery::log_manager::{LogManager, TxnHandoff};
use crate::recovery::log_record::LogRecord;
use crate::storage::record_buffer::RecordBufferSegmentPool;
use crate::storage::undo_record::UndoRecord;
use log::debug;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::Arc;

/// An action whose execution is gated on a timestamp: the garbage collector
/// runs it once every transaction that predates the gate has finished.
pub type DeferredAction = Box<dyn FnOnce() + Send + 'static>;

/// Assigns timestamps, publishes commits, and feeds finished transactions to
/// the garbage collector.
///
/// Commits are serialized through a latch that `begin` takes shared and
/// `commit` takes exclusive: commit timestamps are handed out in latch
/// order, redo buffers reach the serializer in the same order, and no
/// snapshot can observe a half-published commit.
pub struct TransactionManager {
    time: TimestampSource,
    commit_latch: RwLock<()>,
    active_txns: Mutex<Watermark>,
    completed_txns: Mutex<VecDeque<Arc<TransactionContext>>>,
    deferred_actions: Mutex<VecDeque<(Timestamp, DeferredAction)>>,
    buffer_pool: Arc<RecordBufferSegmentPool>,
    log_manager: Option<Arc<LogManager>>,
    gc_enabled: bool,
}

impl TransactionManager {
    pub fn new(
        buffer_pool: Arc<RecordBufferSegmentPool>,
        gc_enabled: bool,
        log_manager: Option<Arc<LogManager>>,
    ) -> Self {
        Self {
            time: TimestampSource::new(),
            commit_latch: RwLock::new(()),
            active_txns: Mutex::new(Watermark::new()),
            completed_txns: Mutex::new(VecDeque::new()),
            deferred_actions: Mutex::new(VecDeque::new()),
            buffer_pool,
            log_manager,
            gc_enabled,
        }
    }

    /// Begins a transaction: assigns its snapshot timestamp and registers it
    /// in the active set.
    pub fn begin(&self) -> Arc<TransactionContext> {
        let _guard = self.commit_latch.read();
        let start_time = self.time.next();
        let txn = Arc::new(TransactionContext::new(
            start_time,
            Arc::clone(&self.buffer_pool),
            self.log_manager.is_some(),
        ));
        self.active_txns.lock().add_txn(start_time);
        debug!("txn {} began", start_time);
        txn
    }

    /// Commits a transaction and returns its commit timestamp.
    ///
    /// `callback` fires exactly once, after the commit record is durable
    /// (immediately for read-only transactions or when logging is disabled).
    /// The version publication step — storing the commit timestamp into
    /// every undo record — is what flips the writes from owner-only-visible
    /// to snapshot-visible.
    pub fn commit<F>(&self, txn: &Arc<TransactionContext>, callback: F) -> Timestamp
    where
        F: FnOnce() + Send + 'static,
    {
        debug_assert!(!txn.aborted(), "committing an aborted transaction");
        let _guard = self.commit_latch.write();
        let commit_ts = self.time.next();

        if txn.is_read_only() {
            // Nothing written, nothing to log or publish.
            txn.set_finish_time(commit_ts);
            txn.mark_log_processed();
            callback();
        } else {
            match &self.log_manager {
                Some(log_manager) => {
                    let segments = {
                        let mut redo = txn.redo_buffer();
                        redo.append(LogRecord::new_commit(txn.start_time(), commit_ts));
                        redo.take_segments()
                    };
                    log_manager.add_txn_to_flush_queue(TxnHandoff {
                        txn: Arc::clone(txn),
                        segments,
                        commit_callback: Some(Box::new(callback)),
                    });
                }
                None => callback(),
            }

            for record in txn.undo_buffer().iter() {
                record.set_timestamp(commit_ts);
            }
            txn.set_finish_time(commit_ts);
        }

        self.active_txns.lock().remove_txn(txn.start_time());
        if self.gc_enabled {
            self.completed_txns.lock().push_back(Arc::clone(txn));
        }
        debug!("txn {} committed at {}", txn.start_time(), commit_ts);
        commit_ts
    }

    /// Aborts a transaction: rewinds its in-place images newest-first,
    /// resets the version chain heads past its records, and enqueues it for
    /// reclamation.
    pub fn abort(&self, txn: &Arc<TransactionContext>) {
        txn.set_aborted();

        {
            let undo_buffer = txn.undo_buffer();
            let records: Vec<*const UndoRecord> = undo_buffer
                .iter()
                .map(|record| record.as_ptr() as *const UndoRecord)
                .collect();
            for &ptr in records.iter().rev() {
                // SAFETY: the records live in this transaction's undo
                // buffer, which outlives the abort.
                let record = unsafe { &*ptr };
                if let Some(table) = record.table() {
                    table.rollback(record);
                }
            }
        }

        // An abort timestamp (unflagged) lets the GC treat the rewound
        // records as collectable once every concurrent transaction finishes.
        let abort_ts = self.time.next();
        txn.set_finish_time(abort_ts);

        if let Some(log_manager) = &self.log_manager {
            // Segments already staged may carry REDO records into the log;
            // that is harmless without a commit record, and handing them over
            // lets the serializer mark the transaction log-processed.
            let segments = txn.redo_buffer().take_segments();
            if segments.is_empty() {
                txn.mark_log_processed();
            } else {
                log_manager.add_txn_to_flush_queue(TxnHandoff {
                    txn: Arc::clone(txn),
                    segments,
                    commit_callback: None,
                });
            }
        }

        self.active_txns.lock().remove_txn(txn.start_time());
        if self.gc_enabled {
            self.completed_txns.lock().push_back(Arc::clone(txn));
        }
        debug!("txn {} aborted at {}", txn.start_time(), abort_ts);
    }

    /// The oldest active start timestamp, or the current time when no
    /// transaction is running. Everything strictly older is unreachable by
    /// any future read.
    pub fn oldest_transaction_start_time(&self) -> Timestamp {
        let active = self.active_txns.lock();
        active.oldest(self.time.peek())
    }

    /// A fresh, strictly advancing timestamp. The GC stamps its unlink
    /// watermark with this so quiescence is always reachable.
    pub fn get_timestamp(&self) -> Timestamp {
        self.time.next()
    }

    /// The current time without advancing it.
    pub fn current_time(&self) -> Timestamp {
        self.time.peek()
    }

    /// Defers `action` until every transaction that predates this call has
    /// finished.
    pub fn defer_action<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let gate_ts = self.time.next();
        self.deferred_actions
            .lock()
            .push_back((gate_ts, Box::new(action)));
    }

    /// Drains the completed-transaction queue for the garbage collector.
    pub fn completed_transactions_for_gc(&self) -> VecDeque<Arc<TransactionContext>> {
        std::mem::take(&mut *self.completed_txns.lock())
    }

    /// Drains the deferred-action queue for the garbage collector. Gates are
    /// assigned off the monotone clock, so FIFO order is priority order.
    pub fn deferred_actions_for_gc(&self) -> VecDeque<(Timestamp, DeferredAction)> {
        std::mem::take(&mut *self.deferred_actions.lock())
    }

    pub fn gc_enabled(&self) -> bool {
        self.gc_enabled
    }

    pub fn log_manager(&self) -> Option<&Arc<LogManager>> {
        self.log_manager.as_ref()
    }
}
