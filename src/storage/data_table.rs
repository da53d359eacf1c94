use crate::common::config::{DatabaseOid, TableOid};
use crate::common::tuple_slot::TupleSlot;
use crate::concurrency::timestamp::{committed, newer_than};
use crate::concurrency::transaction::TransactionContext;
use crate::recovery::log_record::LogRecord;
use crate::storage::block::{Block, BlockStore, Slot};
use crate::storage::layout::BlockLayout;
use crate::storage::projected_row::ProjectedRow;
use crate::storage::undo_record::{DeltaRecordType, UndoPayload, UndoRecord};
use log::debug;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Versioned tuple storage for one table.
///
/// Every tuple slot carries an atomic pointer to the head of its version
/// chain, a newest-to-oldest singly-linked list of undo records. Writers
/// claim a slot by compare-and-swapping a new record onto the head; at most
/// one uncommitted writer can hold a slot at a time, which is the entire
/// write-write conflict protocol. Readers reconstruct the version visible at
/// their snapshot by copying the master tuple and applying before-images off
/// the chain.
pub struct DataTable {
    db_oid: DatabaseOid,
    table_oid: TableOid,
    layout: Arc<BlockLayout>,
    block_store: Arc<BlockStore>,
    blocks: RwLock<HashMap<u32, Arc<Block>>>,
    insertion_block: RwLock<Arc<Block>>,
}

impl DataTable {
    pub fn new(
        block_store: Arc<BlockStore>,
        layout: Arc<BlockLayout>,
        db_oid: DatabaseOid,
        table_oid: TableOid,
    ) -> Arc<Self> {
        let first = block_store.allocate(layout.num_columns());
        let mut blocks = HashMap::new();
        blocks.insert(first.id(), Arc::clone(&first));
        Arc::new(Self {
            db_oid,
            table_oid,
            layout,
            block_store,
            blocks: RwLock::new(blocks),
            insertion_block: RwLock::new(first),
        })
    }

    pub fn db_oid(&self) -> DatabaseOid {
        self.db_oid
    }

    pub fn table_oid(&self) -> TableOid {
        self.table_oid
    }

    pub fn layout(&self) -> &Arc<BlockLayout> {
        &self.layout
    }

    /// Inserts a full row on behalf of `txn` and returns its slot.
    ///
    /// The insert undo record is installed on the fresh slot's chain before
    /// the tuple is made present, so a concurrent snapshot reader always
    /// finds the before-image that hides the uncommitted row.
    pub fn insert(self: &Arc<Self>, txn: &TransactionContext, redo: ProjectedRow) -> TupleSlot {
        debug_assert_eq!(redo.num_columns(), self.layout.num_columns());
        debug_assert!(redo.conforms_to(&self.layout));

        let (block, offset) = self.allocate_slot();
        let slot = TupleSlot::new(block.id(), offset);
        let slot_ref = block.slot(offset);

        let record = UndoRecord::new(
            txn.txn_id(),
            Some(Arc::clone(self)),
            slot,
            UndoPayload::Insert,
            std::ptr::null_mut(),
        );
        let record_ptr = txn.undo_buffer().append(record);
        slot_ref.store_version_ptr(record_ptr.as_ptr());

        {
            let mut data = slot_ref.data.write();
            for (idx, &col) in redo.col_ids().iter().enumerate() {
                data.columns[col as usize] = redo.value(idx).map(|v| v.to_vec());
            }
            data.present = true;
        }

        txn.redo_buffer().append(LogRecord::new_redo(
            txn.start_time(),
            self.db_oid,
            self.table_oid,
            slot,
            Arc::clone(&self.layout),
            redo,
        ));
        debug!("txn {} inserted {}", txn.start_time(), slot);
        slot
    }

    /// Applies `delta` to the tuple at `slot` on behalf of `txn`.
    ///
    /// Returns false on a write-write conflict (another transaction owns the
    /// slot, or a newer version committed after `txn` began) and on attempts
    /// to update a deleted tuple; the caller is expected to abort.
    pub fn update(
        self: &Arc<Self>,
        txn: &TransactionContext,
        slot: TupleSlot,
        delta: ProjectedRow,
    ) -> bool {
        debug_assert!(delta.conforms_to(&self.layout));
        let Some(block) = self.block(slot.block_id()) else {
            return false;
        };
        let slot_ref = block.slot(slot.offset());

        let head = slot_ref.version_ptr();
        if !self.writable_by(txn, head) {
            debug!("txn {} write-write conflict on {}", txn.start_time(), slot);
            return false;
        }

        // Capture the before-image of exactly the columns the delta touches.
        let before = {
            let data = slot_ref.data.read();
            if !data.present {
                return false;
            }
            let mut before = ProjectedRow::new(delta.col_ids().to_vec());
            for (idx, &col) in delta.col_ids().iter().enumerate() {
                before.set_value(idx, data.columns[col as usize].clone());
            }
            before
        };

        let record = UndoRecord::new(
            txn.txn_id(),
            Some(Arc::clone(self)),
            slot,
            UndoPayload::Update(before),
            head,
        );
        let mut undo_buffer = txn.undo_buffer();
        let record_ptr = undo_buffer.append(record);
        if !slot_ref.compare_and_swap_version_ptr(head, record_ptr.as_ptr()) {
            // Another writer won the race; the staged record was never
            // installed and can be dropped.
            undo_buffer.pop_newest();
            debug!("txn {} lost version CAS on {}", txn.start_time(), slot);
            return false;
        }
        drop(undo_buffer);

        {
            let mut data = slot_ref.data.write();
            for (idx, &col) in delta.col_ids().iter().enumerate() {
                data.columns[col as usize] = delta.value(idx).map(|v| v.to_vec());
            }
        }

        txn.redo_buffer().append(LogRecord::new_redo(
            txn.start_time(),
            self.db_oid,
            self.table_oid,
            slot,
            Arc::clone(&self.layout),
            delta,
        ));
        true
    }

    /// Logically deletes the tuple at `slot`. Same conflict protocol as
    /// [`DataTable::update`]; physical reclamation happens at GC time.
    pub fn delete(self: &Arc<Self>, txn: &TransactionContext, slot: TupleSlot) -> bool {
        let Some(block) = self.block(slot.block_id()) else {
            return false;
        };
        let slot_ref = block.slot(slot.offset());

        let head = slot_ref.version_ptr();
        if !self.writable_by(txn, head) {
            debug!("txn {} write-write conflict on {}", txn.start_time(), slot);
            return false;
        }
        if !slot_ref.data.read().present {
            return false;
        }

        let record = UndoRecord::new(
            txn.txn_id(),
            Some(Arc::clone(self)),
            slot,
            UndoPayload::Delete,
            head,
        );
        let mut undo_buffer = txn.undo_buffer();
        let record_ptr = undo_buffer.append(record);
        if !slot_ref.compare_and_swap_version_ptr(head, record_ptr.as_ptr()) {
            undo_buffer.pop_newest();
            debug!("txn {} lost version CAS on {}", txn.start_time(), slot);
            return false;
        }
        drop(undo_buffer);

        slot_ref.data.write().present = false;

        txn.redo_buffer().append(LogRecord::new_delete(
            txn.start_time(),
            self.db_oid,
            self.table_oid,
            slot,
        ));
        true
    }

    /// Reconstructs the version of `slot` visible to `txn` into `out`.
    ///
    /// Returns false when no version is visible (never inserted for this
    /// snapshot, or deleted). `out`'s column selection determines which
    /// columns are materialized.
    pub fn select(&self, txn: &TransactionContext, slot: TupleSlot, out: &mut ProjectedRow) -> bool {
        let Some(block) = self.block(slot.block_id()) else {
            return false;
        };
        let slot_ref = block.slot(slot.offset());

        // Copy the master tuple with a stable chain head: abort rollbacks
        // unlink records after rewinding the data, so a head that changed
        // mid-copy may no longer explain what we copied.
        let (mut present, mut columns, head) = loop {
            let before = slot_ref.version_ptr();
            let (present, columns) = {
                let data = slot_ref.data.read();
                (data.present, data.columns.clone())
            };
            let after = slot_ref.version_ptr();
            if before == after {
                break (present, columns, after);
            }
        };

        // Walk newest-to-oldest, applying before-images of versions this
        // transaction is not allowed to see. Application is idempotent, so a
        // delta applied to the master concurrently with our copy is repaired
        // by its own undo record.
        let mut cur = head;
        while !cur.is_null() {
            // SAFETY: records reachable from a version chain are deallocated
            // only after every transaction alive at unlink time has finished
            // (the GC's quiescence grace period), and `txn` is still alive.
            let record = unsafe { &*cur };
            if txn.can_see(record.timestamp()) {
                break;
            }
            match record.record_type() {
                DeltaRecordType::Update => {
                    let delta = record.delta().unwrap();
                    for (idx, &col) in delta.col_ids().iter().enumerate() {
                        columns[col as usize] = delta.value(idx).map(|v| v.to_vec());
                    }
                }
                DeltaRecordType::Delete => present = true,
                DeltaRecordType::Insert => present = false,
            }
            cur = record.next();
        }

        if !present {
            return false;
        }
        for idx in 0..out.num_columns() as usize {
            let col = out.col_id(idx);
            out.set_value(idx, columns[col as usize].clone());
        }
        true
    }

    /// Rewinds one of `txn`'s own undo records during abort: re-applies the
    /// before-image and unlinks the record from the chain head.
    pub(crate) fn rollback(&self, record: &UndoRecord) {
        let slot = record.slot();
        let Some(block) = self.block(slot.block_id()) else {
            return;
        };
        let slot_ref = block.slot(slot.offset());

        // The aborting transaction's records occupy the head of the chain
        // (at most one uncommitted writer per slot), and neither the GC nor
        // other writers ever replace an uncommitted head.
        if slot_ref.version_ptr() != record.as_ptr() {
            debug_assert!(false, "aborted record is not the chain head");
            return;
        }

        match record.record_type() {
            DeltaRecordType::Update => {
                let before = record.delta().unwrap();
                let mut data = slot_ref.data.write();
                for (idx, &col) in before.col_ids().iter().enumerate() {
                    data.columns[col as usize] = before.value(idx).map(|v| v.to_vec());
                }
            }
            DeltaRecordType::Delete => {
                slot_ref.data.write().present = true;
            }
            DeltaRecordType::Insert => {
                let mut data = slot_ref.data.write();
                data.present = false;
                for column in data.columns.iter_mut() {
                    *column = None;
                }
            }
        }

        slot_ref.store_version_ptr(record.next());
    }

    /// Physically reclaims a logically deleted slot: clears it and
    /// surrenders its heap varlen buffers to the caller. Invoked by the GC
    /// once no running transaction can reach the pre-delete version.
    pub(crate) fn deallocate_slot(&self, slot: TupleSlot) -> Vec<Box<[u8]>> {
        let Some(block) = self.block(slot.block_id()) else {
            return Vec::new();
        };
        let slot_ref = block.slot(slot.offset());
        let mut varlens = Vec::new();
        let mut data = slot_ref.data.write();
        data.present = false;
        for (col, column) in data.columns.iter_mut().enumerate() {
            if let Some(value) = column.take() {
                if self.layout.is_varlen(col as u16) {
                    varlens.push(value.into_boxed_slice());
                }
            }
        }
        varlens
    }

    pub(crate) fn atomically_read_version_ptr(&self, slot: TupleSlot) -> *mut UndoRecord {
        match self.block(slot.block_id()) {
            Some(block) => block.slot(slot.offset()).version_ptr(),
            None => std::ptr::null_mut(),
        }
    }

    pub(crate) fn compare_and_swap_version_ptr(
        &self,
        slot: TupleSlot,
        expected: *mut UndoRecord,
        desired: *mut UndoRecord,
    ) -> bool {
        match self.block(slot.block_id()) {
            Some(block) => block
                .slot(slot.offset())
                .compare_and_swap_version_ptr(expected, desired),
            None => false,
        }
    }

    /// True when `txn` may install a new version over chain head `head`:
    /// the slot is unwritten, owned by `txn` itself, or its newest version
    /// committed before `txn` began (first-committer-wins).
    fn writable_by(&self, txn: &TransactionContext, head: *mut UndoRecord) -> bool {
        if head.is_null() {
            return true;
        }
        // SAFETY: same grace-period argument as in `select`.
        let ts = unsafe { &*head }.timestamp();
        ts == txn.txn_id() || (committed(ts) && newer_than(txn.start_time(), ts))
    }

    fn block(&self, block_id: u32) -> Option<Arc<Block>> {
        self.blocks.read().get(&block_id).cloned()
    }

    fn allocate_slot(&self) -> (Arc<Block>, u32) {
        loop {
            let block = Arc::clone(&self.insertion_block.read());
            if let Some(offset) = block.reserve_slot() {
                return (block, offset);
            }
            // Block full: swap in a fresh one unless someone else already did.
            let mut insertion = self.insertion_block.write();
            if Arc::ptr_eq(&insertion, &block) {
                let fresh = self.block_store.allocate(self.layout.num_columns());
                self.blocks.write().insert(fresh.id(), Arc::clone(&fresh));
                *insertion = fresh;
            }
        }
    }
}

impl std::fmt::Debug for DataTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataTable")
            .field("db_oid", &self.db_oid)
            .field("table_oid", &self.table_oid)
            .field("num_blocks", &self.blocks.read().len())
            .finish()
    }
}
