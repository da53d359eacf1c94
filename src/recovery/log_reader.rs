use crate::common::config::{ColId, DatabaseOid, TableOid};
use crate::common::exception::LogError;
use crate::common::tuple_slot::TupleSlot;
use crate::recovery::log_record::{LogRecord, LogRecordType};
use crate::storage::layout::BlockLayout;
use crate::storage::projected_row::ProjectedRow;
use log::debug;
use std::path::Path;
use std::sync::Arc;

/// Reads a log file back into [`LogRecord`]s.
///
/// REDO bodies do not encode column widths, so parsing needs the table's
/// [`BlockLayout`] to size fixed columns and recognize varlens, mirroring
/// what a recovery pass would obtain from the catalog.
pub struct BufferedLogReader {
    data: Vec<u8>,
    pos: usize,
}

impl BufferedLogReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let data = std::fs::read(path)?;
        debug!("opened log file with {} bytes", data.len());
        Ok(Self { data, pos: 0 })
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    pub fn has_more(&self) -> bool {
        self.pos < self.data.len()
    }

    /// Parses the next record off the stream.
    pub fn read_record(&mut self, layout: &Arc<BlockLayout>) -> Result<LogRecord, LogError> {
        let record_start = self.pos as u64;
        let size = self.read_u32()? as usize;
        let body_start = self.pos;

        let type_byte = self.read_u8()?;
        let record_type = LogRecordType::from_u8(type_byte)
            .ok_or(LogError::UnknownRecordType(type_byte))?;
        let txn_begin = self.read_u64()?;

        let record = match record_type {
            LogRecordType::Commit => {
                let commit_ts = self.read_u64()?;
                LogRecord::new_commit(txn_begin, commit_ts)
            }
            LogRecordType::Delete => {
                let db_oid = self.read_u32()? as DatabaseOid;
                let table_oid = self.read_u32()? as TableOid;
                let slot = TupleSlot::from_u64(self.read_u64()?);
                LogRecord::new_delete(txn_begin, db_oid, table_oid, slot)
            }
            LogRecordType::Redo => {
                let db_oid = self.read_u32()? as DatabaseOid;
                let table_oid = self.read_u32()? as TableOid;
                let slot = TupleSlot::from_u64(self.read_u64()?);

                let num_cols = self.read_u16()?;
                let mut col_ids = Vec::with_capacity(num_cols as usize);
                for _ in 0..num_cols {
                    col_ids.push(self.read_u16()? as ColId);
                }

                let bitmap =
                    self.read_bytes(ProjectedRow::bitmap_num_bytes(num_cols))?.to_vec();
                let mut delta = ProjectedRow::new(col_ids.clone());
                for i in 0..num_cols as usize {
                    if bitmap[i / 8] & (1 << (i % 8)) == 0 {
                        continue;
                    }
                    let col = col_ids[i];
                    let value = if layout.is_varlen(col) {
                        let len = self.read_u32()? as usize;
                        self.read_bytes(len)?.to_vec()
                    } else {
                        self.read_bytes(layout.attr_size(col) as usize)?.to_vec()
                    };
                    delta.set_value(i, Some(value));
                }
                LogRecord::new_redo(txn_begin, db_oid, table_oid, slot, Arc::clone(layout), delta)
            }
        };

        let consumed = self.pos - body_start;
        if consumed != size {
            return Err(LogError::Corrupt {
                offset: record_start,
                reason: format!("size prefix {} but parsed {} bytes", size, consumed),
            });
        }
        Ok(record)
    }

    /// Collects all remaining records.
    pub fn read_all(&mut self, layout: &Arc<BlockLayout>) -> Result<Vec<LogRecord>, LogError> {
        let mut records = Vec::new();
        while self.has_more() {
            records.push(self.read_record(layout)?);
        }
        Ok(records)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&[u8], LogError> {
        if self.pos + len > self.data.len() {
            return Err(LogError::UnexpectedEof(self.pos as u64));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> Result<u8, LogError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, LogError> {
        Ok(u16::from_le_bytes(self.read_bytes(2)?.try_into().unwrap()))
    }

    fn read_u32(&mut self) -> Result<u32, LogError> {
        Ok(u32::from_le_bytes(self.read_bytes(4)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64, LogError> {
        Ok(u64::from_le_bytes(self.read_bytes(8)?.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::layout::AttrSize;

    fn test_layout() -> Arc<BlockLayout> {
        Arc::new(BlockLayout::new(vec![AttrSize::Fixed(8), AttrSize::Varlen]))
    }

    fn round_trip(records: &[LogRecord], layout: &Arc<BlockLayout>) -> Vec<LogRecord> {
        let mut bytes = Vec::new();
        for record in records {
            record.serialize_into(&mut bytes);
        }
        let mut reader = BufferedLogReader::from_bytes(bytes);
        let result = reader.read_all(layout).unwrap();
        assert!(!reader.has_more());
        result
    }

    #[test]
    fn test_empty_stream() {
        let mut reader = BufferedLogReader::from_bytes(Vec::new());
        assert!(!reader.has_more());
        assert!(reader.read_all(&test_layout()).unwrap().is_empty());
    }

    #[test]
    fn test_commit_round_trip() {
        let layout = test_layout();
        let records = round_trip(&[LogRecord::new_commit(3, 8)], &layout);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].txn_begin(), 3);
        match records[0].body() {
            crate::recovery::log_record::LogRecordBody::Commit { commit_ts } => {
                assert_eq!(*commit_ts, 8)
            }
            _ => panic!("expected commit record"),
        }
    }

    #[test]
    fn test_redo_delete_round_trip() {
        let layout = test_layout();
        let slot = TupleSlot::new(2, 5);
        let delta = ProjectedRow::with_values(
            vec![0, 1],
            vec![Some(vec![1, 2, 3, 4, 5, 6, 7, 8]), Some(b"varlen-value".to_vec())],
        );
        let original = vec![
            LogRecord::new_redo(1, 10, 20, slot, Arc::clone(&layout), delta.clone()),
            LogRecord::new_delete(1, 10, 20, slot),
            LogRecord::new_commit(1, 4),
        ];
        let records = round_trip(&original, &layout);
        assert_eq!(records.len(), 3);

        match records[0].body() {
            crate::recovery::log_record::LogRecordBody::Redo {
                db_oid,
                table_oid,
                slot: read_slot,
                delta: read_delta,
                ..
            } => {
                assert_eq!(*db_oid, 10);
                assert_eq!(*table_oid, 20);
                assert_eq!(*read_slot, slot);
                assert_eq!(*read_delta, delta);
            }
            _ => panic!("expected redo record"),
        }
        assert_eq!(records[1].record_type(), LogRecordType::Delete);
        assert_eq!(records[2].record_type(), LogRecordType::Commit);
    }

    #[test]
    fn test_null_columns_round_trip() {
        let layout = test_layout();
        let delta = ProjectedRow::with_values(vec![0, 1], vec![None, Some(b"x".to_vec())]);
        let records = round_trip(
            &[LogRecord::new_redo(
                2,
                1,
                1,
                TupleSlot::new(0, 0),
                Arc::clone(&layout),
                delta.clone(),
            )],
            &layout,
        );
        match records[0].body() {
            crate::recovery::log_record::LogRecordBody::Redo { delta: read, .. } => {
                assert_eq!(*read, delta);
            }
            _ => panic!("expected redo record"),
        }
    }

    #[test]
    fn test_unknown_record_type() {
        // size=9, type=7 (invalid), txn_begin
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&9u32.to_le_bytes());
        bytes.push(7);
        bytes.extend_from_slice(&0u64.to_le_bytes());
        let mut reader = BufferedLogReader::from_bytes(bytes);
        assert!(matches!(
            reader.read_record(&test_layout()),
            Err(LogError::UnknownRecordType(7))
        ));
    }

    #[test]
    fn test_truncated_record() {
        let mut bytes = Vec::new();
        LogRecord::new_commit(1, 2).serialize_into(&mut bytes);
        bytes.truncate(bytes.len() - 3);
        let mut reader = BufferedLogReader::from_bytes(bytes);
        assert!(matches!(
            reader.read_record(&test_layout()),
            Err(LogError::UnexpectedEof(_))
        ));
    }
}
