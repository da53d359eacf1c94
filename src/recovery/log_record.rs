use crate::common::config::{DatabaseOid, TableOid, Timestamp};
use crate::common::tuple_slot::TupleSlot;
use crate::storage::layout::BlockLayout;
use crate::storage::projected_row::ProjectedRow;
use std::sync::Arc;

/// The type tag of a log record, as encoded on disk.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRecordType {
    Redo = 1,
    Delete = 2,
    Commit = 3,
}

impl LogRecordType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(LogRecordType::Redo),
            2 => Some(LogRecordType::Delete),
            3 => Some(LogRecordType::Commit),
            _ => None,
        }
    }
}

/// Body of a log record.
///
/// Redo records carry the table's layout so the serializer can tell fixed
/// columns (raw bytes) from varlen columns (length-prefixed) without a
/// catalog lookup.
#[derive(Debug, Clone)]
pub enum LogRecordBody {
    Redo {
        db_oid: DatabaseOid,
        table_oid: TableOid,
        slot: TupleSlot,
        layout: Arc<BlockLayout>,
        delta: ProjectedRow,
    },
    Delete {
        db_oid: DatabaseOid,
        table_oid: TableOid,
        slot: TupleSlot,
    },
    Commit {
        commit_ts: Timestamp,
    },
}

/// Unit of logging: the after-image (or deletion / commit marker) of one
/// operation, stamped with the owning transaction's begin timestamp.
///
/// On-disk encoding (little-endian):
///
/// ```text
/// record := u32 size            (bytes after this prefix)
///           u8  type            (REDO=1, DELETE=2, COMMIT=3)
///           u64 txn_begin
///           body
/// body(COMMIT) := u64 commit_ts
/// body(DELETE) := u32 db_oid; u32 table_oid; u64 slot
/// body(REDO)   := u32 db_oid; u32 table_oid; u64 slot;
///                 u16 num_cols; num_cols x u16 col_id;
///                 null bitmap (ceil(num_cols/8) bytes, 1 = present, LSB first);
///                 per present column: varlen -> u32 len + bytes,
///                                     fixed  -> attr_size bytes
/// ```
#[derive(Debug, Clone)]
pub struct LogRecord {
    txn_begin: Timestamp,
    body: LogRecordBody,
}

impl LogRecord {
    pub fn new_redo(
        txn_begin: Timestamp,
        db_oid: DatabaseOid,
        table_oid: TableOid,
        slot: TupleSlot,
        layout: Arc<BlockLayout>,
        delta: ProjectedRow,
    ) -> Self {
        Self {
            txn_begin,
            body: LogRecordBody::Redo {
                db_oid,
                table_oid,
                slot,
                layout,
                delta,
            },
        }
    }

    pub fn new_delete(
        txn_begin: Timestamp,
        db_oid: DatabaseOid,
        table_oid: TableOid,
        slot: TupleSlot,
    ) -> Self {
        Self {
            txn_begin,
            body: LogRecordBody::Delete {
                db_oid,
                table_oid,
                slot,
            },
        }
    }

    pub fn new_commit(txn_begin: Timestamp, commit_ts: Timestamp) -> Self {
        Self {
            txn_begin,
            body: LogRecordBody::Commit { commit_ts },
        }
    }

    pub fn txn_begin(&self) -> Timestamp {
        self.txn_begin
    }

    pub fn body(&self) -> &LogRecordBody {
        &self.body
    }

    pub fn record_type(&self) -> LogRecordType {
        match self.body {
            LogRecordBody::Redo { .. } => LogRecordType::Redo,
            LogRecordBody::Delete { .. } => LogRecordType::Delete,
            LogRecordBody::Commit { .. } => LogRecordType::Commit,
        }
    }

    pub fn is_commit(&self) -> bool {
        self.record_type() == LogRecordType::Commit
    }

    /// Serializes the record, size prefix included, onto `out`.
    pub fn serialize_into(&self, out: &mut Vec<u8>) {
        let mut payload = Vec::with_capacity(32);
        payload.push(self.record_type() as u8);
        payload.extend_from_slice(&self.txn_begin.to_le_bytes());

        match &self.body {
            LogRecordBody::Commit { commit_ts } => {
                payload.extend_from_slice(&commit_ts.to_le_bytes());
            }
            LogRecordBody::Delete {
                db_oid,
                table_oid,
                slot,
            } => {
                payload.extend_from_slice(&db_oid.to_le_bytes());
                payload.extend_from_slice(&table_oid.to_le_bytes());
                payload.extend_from_slice(&slot.to_bytes_le());
            }
            LogRecordBody::Redo {
                db_oid,
                table_oid,
                slot,
                layout,
                delta,
            } => {
                payload.extend_from_slice(&db_oid.to_le_bytes());
                payload.extend_from_slice(&table_oid.to_le_bytes());
                payload.extend_from_slice(&slot.to_bytes_le());
                payload.extend_from_slice(&delta.num_columns().to_le_bytes());
                for &col_id in delta.col_ids() {
                    payload.extend_from_slice(&col_id.to_le_bytes());
                }
                payload.extend_from_slice(&delta.null_bitmap());
                for idx in 0..delta.num_columns() as usize {
                    let col = delta.col_id(idx);
                    let Some(value) = delta.value(idx) else {
                        continue;
                    };
                    if layout.is_varlen(col) {
                        payload.extend_from_slice(&(value.len() as u32).to_le_bytes());
                        payload.extend_from_slice(value);
                    } else {
                        debug_assert_eq!(value.len(), layout.attr_size(col) as usize);
                        payload.extend_from_slice(value);
                    }
                }
            }
        }

        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&payload);
    }

    /// Serialized length of this record, size prefix included.
    pub fn serialized_size(&self) -> usize {
        let mut scratch = Vec::new();
        self.serialize_into(&mut scratch);
        scratch.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::layout::AttrSize;

    fn test_layout() -> Arc<BlockLayout> {
        Arc::new(BlockLayout::new(vec![
            AttrSize::Fixed(8),
            AttrSize::Varlen,
            AttrSize::Fixed(4),
        ]))
    }

    #[test]
    fn test_commit_record_encoding() {
        let record = LogRecord::new_commit(5, 9);
        let mut bytes = Vec::new();
        record.serialize_into(&mut bytes);

        // size prefix = type (1) + txn_begin (8) + commit_ts (8)
        assert_eq!(u32::from_le_bytes(bytes[0..4].try_into().unwrap()), 17);
        assert_eq!(bytes[4], LogRecordType::Commit as u8);
        assert_eq!(u64::from_le_bytes(bytes[5..13].try_into().unwrap()), 5);
        assert_eq!(u64::from_le_bytes(bytes[13..21].try_into().unwrap()), 9);
        assert_eq!(bytes.len(), record.serialized_size());
    }

    #[test]
    fn test_delete_record_encoding() {
        let slot = TupleSlot::new(3, 17);
        let record = LogRecord::new_delete(2, 1, 42, slot);
        let mut bytes = Vec::new();
        record.serialize_into(&mut bytes);

        assert_eq!(u32::from_le_bytes(bytes[0..4].try_into().unwrap()), 25);
        assert_eq!(bytes[4], LogRecordType::Delete as u8);
        assert_eq!(u64::from_le_bytes(bytes[5..13].try_into().unwrap()), 2);
        assert_eq!(u32::from_le_bytes(bytes[13..17].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(bytes[17..21].try_into().unwrap()), 42);
        assert_eq!(
            u64::from_le_bytes(bytes[21..29].try_into().unwrap()),
            slot.to_u64()
        );
    }

    #[test]
    fn test_redo_record_encoding() {
        let layout = test_layout();
        let delta = ProjectedRow::with_values(
            vec![0, 1, 2],
            vec![
                Some(vec![1, 2, 3, 4, 5, 6, 7, 8]),
                Some(vec![0xAA, 0xBB]),
                None,
            ],
        );
        let slot = TupleSlot::new(1, 9);
        let record = LogRecord::new_redo(4, 1, 7, slot, layout, delta);
        let mut bytes = Vec::new();
        record.serialize_into(&mut bytes);

        let mut pos = 4; // skip size prefix
        assert_eq!(bytes[pos], LogRecordType::Redo as u8);
        pos += 1;
        assert_eq!(
            u64::from_le_bytes(bytes[pos..pos + 8].try_into().unwrap()),
            4
        );
        pos += 8;
        pos += 4 + 4; // oids
        assert_eq!(
            u64::from_le_bytes(bytes[pos..pos + 8].try_into().unwrap()),
            slot.to_u64()
        );
        pos += 8;
        assert_eq!(
            u16::from_le_bytes(bytes[pos..pos + 2].try_into().unwrap()),
            3
        );
        pos += 2;
        pos += 3 * 2; // col ids
        assert_eq!(bytes[pos], 0b0000_0011); // cols 0 and 1 present, 2 null
        pos += 1;
        // fixed column 0: raw 8 bytes
        assert_eq!(&bytes[pos..pos + 8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        pos += 8;
        // varlen column 1: u32 length prefix then bytes
        assert_eq!(
            u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()),
            2
        );
        pos += 4;
        assert_eq!(&bytes[pos..pos + 2], &[0xAA, 0xBB]);
        pos += 2;
        assert_eq!(pos, bytes.len());
    }

    #[test]
    fn test_record_type_round_trip() {
        assert_eq!(LogRecordType::from_u8(1), Some(LogRecordType::Redo));
        assert_eq!(LogRecordType::from_u8(2), Some(LogRecordType::Delete));
        assert_eq!(LogRecordType::from_u8(3), Some(LogRecordType::Commit));
        assert_eq!(LogRecordType::from_u8(0), None);
        assert_eq!(LogRecordType::from_u8(4), None);
    }
}
