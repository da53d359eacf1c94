use crate::common::config::{Timestamp, TxnId};
use crate::common::tuple_slot::TupleSlot;
use crate::storage::data_table::DataTable;
use crate::storage::projected_row::ProjectedRow;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use std::sync::Arc;

/// Closed set of undo record kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaRecordType {
    Insert,
    Update,
    Delete,
}

/// Payload of an undo record. Only updates carry a before-image; inserts and
/// deletes are rolled back by flipping slot state.
#[derive(Debug)]
pub enum UndoPayload {
    Insert,
    /// Before-image of exactly the columns the update touched.
    Update(ProjectedRow),
    Delete,
}

/// A node on a tuple's version chain: the delta that, applied in reverse,
/// reconstructs the previous version.
///
/// Created stamped with the writing transaction's id; commit publication
/// atomically flips `timestamp` to the commit timestamp. `next` points at
/// the older record on the same slot's chain (null terminates). Both fields
/// are the only parts of an installed record that ever change; everything
/// else is immutable after install.
///
/// The `table` back-reference is non-owning in spirit (tables outlive every
/// undo record that points at them; table drop is a deferred action) and may
/// be absent on records that were staged but never installed.
#[derive(Debug)]
pub struct UndoRecord {
    timestamp: AtomicU64,
    next: AtomicPtr<UndoRecord>,
    table: Option<Arc<DataTable>>,
    slot: TupleSlot,
    payload: UndoPayload,
}

impl UndoRecord {
    pub fn new(
        txn_id: TxnId,
        table: Option<Arc<DataTable>>,
        slot: TupleSlot,
        payload: UndoPayload,
        next: *mut UndoRecord,
    ) -> Self {
        Self {
            timestamp: AtomicU64::new(txn_id),
            next: AtomicPtr::new(next),
            table,
            slot,
            payload,
        }
    }

    pub fn record_type(&self) -> DeltaRecordType {
        match self.payload {
            UndoPayload::Insert => DeltaRecordType::Insert,
            UndoPayload::Update(_) => DeltaRecordType::Update,
            UndoPayload::Delete => DeltaRecordType::Delete,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp.load(Ordering::SeqCst)
    }

    /// Publishes a new timestamp on this record (commit publication).
    pub fn set_timestamp(&self, ts: Timestamp) {
        self.timestamp.store(ts, Ordering::SeqCst);
    }

    pub fn next(&self) -> *mut UndoRecord {
        self.next.load(Ordering::SeqCst)
    }

    /// Cuts the chain below this record. Non-head records may be updated
    /// without CAS: the single-threaded GC is the only mutator below a head.
    pub fn set_next(&self, next: *mut UndoRecord) {
        self.next.store(next, Ordering::SeqCst);
    }

    pub fn table(&self) -> Option<&Arc<DataTable>> {
        self.table.as_ref()
    }

    pub fn slot(&self) -> TupleSlot {
        self.slot
    }

    /// The update before-image, if this is an update record.
    pub fn delta(&self) -> Option<&ProjectedRow> {
        match &self.payload {
            UndoPayload::Update(delta) => Some(delta),
            _ => None,
        }
    }

    /// Self-pointer usable as a version chain head candidate.
    pub fn as_ptr(&self) -> *mut UndoRecord {
        self as *const UndoRecord as *mut UndoRecord
    }
}

/// Null chain terminator.
pub fn null_version() -> *mut UndoRecord {
    ptr::null_mut()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::timestamp::{committed, start_to_txn_id};

    #[test]
    fn test_record_type_tags() {
        let txn_id = start_to_txn_id(3);
        let slot = TupleSlot::new(0, 0);

        let insert = UndoRecord::new(txn_id, None, slot, UndoPayload::Insert, null_version());
        assert_eq!(insert.record_type(), DeltaRecordType::Insert);
        assert!(insert.delta().is_none());
        assert!(insert.table().is_none());

        let delta = ProjectedRow::with_values(vec![1], vec![Some(vec![9])]);
        let update = UndoRecord::new(
            txn_id,
            None,
            slot,
            UndoPayload::Update(delta.clone()),
            null_version(),
        );
        assert_eq!(update.record_type(), DeltaRecordType::Update);
        assert_eq!(update.delta(), Some(&delta));

        let delete = UndoRecord::new(txn_id, None, slot, UndoPayload::Delete, null_version());
        assert_eq!(delete.record_type(), DeltaRecordType::Delete);
    }

    #[test]
    fn test_timestamp_publication() {
        let txn_id = start_to_txn_id(7);
        let record = UndoRecord::new(
            txn_id,
            None,
            TupleSlot::new(0, 0),
            UndoPayload::Insert,
            null_version(),
        );
        assert_eq!(record.timestamp(), txn_id);
        assert!(!committed(record.timestamp()));

        record.set_timestamp(8);
        assert_eq!(record.timestamp(), 8);
        assert!(committed(record.timestamp()));
    }

    #[test]
    fn test_chain_linking() {
        let txn_id = start_to_txn_id(1);
        let slot = TupleSlot::new(0, 0);
        let older = UndoRecord::new(txn_id, None, slot, UndoPayload::Insert, null_version());
        let newer = UndoRecord::new(txn_id, None, slot, UndoPayload::Delete, older.as_ptr());

        assert_eq!(newer.next(), older.as_ptr());
        newer.set_next(null_version());
        assert!(newer.next().is_null());
    }
}
