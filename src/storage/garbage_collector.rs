use crate::common::config::Timestamp;
use crate::common::tuple_slot::TupleSlot;
use crate::concurrency::timestamp::{committed, newer_than};
use crate::concurrency::transaction::TransactionContext;
use crate::concurrency::transaction_manager::{DeferredAction, TransactionManager};
use crate::storage::data_table::DataTable;
use crate::storage::index::IndexRef;
use crate::storage::undo_record::{DeltaRecordType, UndoRecord};
use log::trace;
use parking_lot::RwLock;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// Two-phase reclamation of finished transactions.
///
/// The unlink phase cuts a transaction's undo records out of their version
/// chains once no active transaction can still see its writes. The
/// deallocate phase frees the transaction only after a further quiescence
/// epoch — every transaction alive at unlink time has since finished — so a
/// reader that raced the unlink can still safely dereference the records it
/// already reached. This is the grace-period discipline of RCU.
///
/// Runs on a single dedicated thread; single-threadedness is what licenses
/// the non-CAS pointer updates below chain heads.
pub struct GarbageCollector {
    txn_manager: Arc<TransactionManager>,
    last_unlinked: Timestamp,
    txns_to_unlink: VecDeque<Arc<TransactionContext>>,
    txns_to_deallocate: VecDeque<Arc<TransactionContext>>,
    deferred_actions: VecDeque<(Timestamp, DeferredAction)>,
    indexes: RwLock<Vec<IndexRef>>,
}

impl GarbageCollector {
    pub fn new(txn_manager: Arc<TransactionManager>) -> Self {
        Self {
            txn_manager,
            last_unlinked: 0,
            txns_to_unlink: VecDeque::new(),
            txns_to_deallocate: VecDeque::new(),
            deferred_actions: VecDeque::new(),
            indexes: RwLock::new(Vec::new()),
        }
    }

    /// One full collection cycle. Returns `(txns_deallocated, txns_unlinked)`.
    pub fn perform_garbage_collection(&mut self) -> (u32, u32) {
        self.process_deferred_actions();
        let txns_deallocated = self.process_deallocate_queue();
        trace!("garbage collector deallocated {} txns", txns_deallocated);
        let txns_unlinked = self.process_unlink_queue();
        trace!("garbage collector unlinked {} txns", txns_unlinked);
        if txns_unlinked > 0 {
            // Only advance the watermark when something was actually
            // unlinked; otherwise the deallocate gate would open too early
            // for records unlinked in a later pass.
            self.last_unlinked = self.txn_manager.get_timestamp();
        }
        self.process_indexes();
        (txns_deallocated, txns_unlinked)
    }

    /// Runs every deferred action whose gate has passed below the oldest
    /// active transaction.
    fn process_deferred_actions(&mut self) {
        let mut new_actions = self.txn_manager.deferred_actions_for_gc();
        self.deferred_actions.append(&mut new_actions);

        let oldest_txn = self.txn_manager.oldest_transaction_start_time();
        while let Some((gate_ts, _)) = self.deferred_actions.front() {
            if *gate_ts > oldest_txn {
                break;
            }
            let (_, action) = self.deferred_actions.pop_front().unwrap();
            action();
        }
    }

    /// Frees transactions whose unlink epoch has fully quiesced and whose
    /// redo records are durable.
    fn process_deallocate_queue(&mut self) -> u32 {
        let oldest_txn = self.txn_manager.oldest_transaction_start_time();
        let mut txns_processed = 0;

        if newer_than(oldest_txn, self.last_unlinked) {
            // Everything in the queue was unlinked before the oldest running
            // transaction began: no running transaction holds a reference.
            let mut requeue = VecDeque::new();
            while let Some(txn) = self.txns_to_deallocate.pop_front() {
                if txn.log_processed() {
                    drop(txn);
                    txns_processed += 1;
                } else {
                    // The log serializer may still read this transaction's
                    // records; try again next cycle.
                    requeue.push_back(txn);
                }
            }
            self.txns_to_deallocate = requeue;
        }

        txns_processed
    }

    /// Unlinks the undo records of transactions no active reader can see.
    fn process_unlink_queue(&mut self) -> u32 {
        let oldest_txn = self.txn_manager.oldest_transaction_start_time();

        let mut completed = self.txn_manager.completed_transactions_for_gc();
        self.txns_to_unlink.append(&mut completed);

        let mut txns_processed = 0;
        let mut requeue = VecDeque::new();
        // Each version chain needs truncating at most once per cycle: the
        // safe boundary is read once, and chains are timestamp-sorted.
        let mut visited_slots: HashSet<TupleSlot> = HashSet::new();

        while let Some(txn) = self.txns_to_unlink.pop_front() {
            if txn.is_read_only() {
                // Read-only transactions left nothing behind.
                drop(txn);
                txns_processed += 1;
            } else if newer_than(oldest_txn, txn.finish_time()) {
                {
                    let undo_buffer = txn.undo_buffer();
                    for record in undo_buffer.iter() {
                        // The table can be absent on records that were staged
                        // but never installed on a chain.
                        if let Some(table) = record.table() {
                            if visited_slots.insert(record.slot()) {
                                self.truncate_version_chain(table, record.slot(), oldest_txn);
                            }
                            // Deleted slots and their varlen buffers are
                            // reclaimed for committed transactions only; an
                            // aborted record may guard a version that is
                            // still the live one.
                            if !txn.aborted() {
                                self.reclaim_slot_if_deleted(&txn, table, record);
                            }
                        }
                    }
                }
                self.txns_to_deallocate.push_back(txn);
                txns_processed += 1;
            } else {
                // Still visible to some running transaction.
                requeue.push_back(txn);
            }
        }

        self.txns_to_unlink = requeue;
        txns_processed
    }

    /// Cuts every record invisible to the oldest active transaction out of
    /// `slot`'s version chain.
    ///
    /// Only the head can race with writers, so it alone is CASed; nodes
    /// below the head are updated with plain stores. If the head was an
    /// uncommitted record that a concurrent abort rewound from under us, the
    /// whole truncation restarts.
    fn truncate_version_chain(
        &self,
        table: &Arc<DataTable>,
        slot: TupleSlot,
        oldest: Timestamp,
    ) {
        let version_ptr = table.atomically_read_version_ptr(slot);
        // Legitimate: a previous restart already truncated the chain.
        if version_ptr.is_null() {
            return;
        }
        // SAFETY: records reachable from a chain outlive the grace period,
        // and this GC is the only thread that deallocates them.
        let head = unsafe { &*version_ptr };

        if newer_than(oldest, head.timestamp()) {
            // The whole chain is invisible: prune it at the head with a CAS,
            // retrying on contention with writers.
            if !table.compare_and_swap_version_ptr(slot, version_ptr, std::ptr::null_mut()) {
                self.truncate_version_chain(table, slot, oldest);
            }
            return;
        }

        let mut curr: &UndoRecord = head;
        loop {
            let next_ptr = curr.next();
            // Legitimate: the chain was truncated concurrently with an abort
            // rewind and nothing below remains.
            if next_ptr.is_null() {
                return;
            }
            // SAFETY: as above.
            let next = unsafe { &*next_ptr };
            if newer_than(oldest, next.timestamp()) {
                break;
            }
            curr = next;
        }
        // Everything below `curr` is older than the oldest active
        // transaction, and chains are newest-to-oldest sorted.
        curr.set_next(std::ptr::null_mut());

        // If the head was uncommitted it may have been aborted and rewound
        // concurrently; restart to re-examine the new head.
        if std::ptr::eq(curr, head)
            && !committed(head.timestamp())
            && table.atomically_read_version_ptr(slot) != version_ptr
        {
            self.truncate_version_chain(table, slot, oldest);
        }
    }

    /// Physically reclaims the slot behind a committed DELETE record and
    /// queues the gutted varlen buffers on the owning transaction, to be
    /// freed at deallocation time.
    fn reclaim_slot_if_deleted(
        &self,
        txn: &Arc<TransactionContext>,
        table: &Arc<DataTable>,
        record: &UndoRecord,
    ) {
        if record.record_type() != DeltaRecordType::Delete {
            return;
        }
        for varlen in table.deallocate_slot(record.slot()) {
            txn.add_loose_ptr(varlen);
        }
    }

    /// Registers an index for the per-cycle GC notification.
    pub fn register_index_for_gc(&self, index: IndexRef) {
        let mut indexes = self.indexes.write();
        debug_assert!(
            !indexes.iter().any(|i| Arc::ptr_eq(i, &index)),
            "index registered twice"
        );
        indexes.push(index);
    }

    pub fn unregister_index_for_gc(&self, index: &IndexRef) {
        let mut indexes = self.indexes.write();
        indexes.retain(|i| !Arc::ptr_eq(i, index));
    }

    fn process_indexes(&self) {
        let indexes = self.indexes.read();
        for index in indexes.iter() {
            index.perform_garbage_collection();
        }
    }
}
