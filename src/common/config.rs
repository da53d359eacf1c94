use serde::Deserialize;
use std::time::Duration;

pub const INVALID_TIMESTAMP: Timestamp = u64::MAX;
pub const INVALID_BLOCK_ID: BlockId = u32::MAX;

pub type Timestamp = u64; // logical timestamp type
pub type TxnId = u64; // transaction id type (timestamp with the high bit set)
pub type BlockId = u32; // block id type
pub type SlotOffset = u32; // slot offset within a block
pub type DatabaseOid = u32; // database object id type
pub type TableOid = u32; // table object id type
pub type ColId = u16; // column id type

/// Number of tuple slots per block.
pub const BLOCK_SLOT_CAPACITY: usize = 4096;

/// Number of undo records per undo buffer segment.
pub const UNDO_SEGMENT_CAPACITY: usize = 64;

/// Number of log records per redo buffer segment.
pub const REDO_SEGMENT_CAPACITY: usize = 64;

/// Byte capacity of a single log output buffer.
pub const LOG_BUFFER_SIZE: usize = 64 * 1024;

/// Maximum number of recycled segments the buffer pool retains per kind.
pub const SEGMENT_POOL_RETENTION: usize = 256;

/// Operational configuration for the storage engine.
///
/// All intervals are in milliseconds so the struct can be deserialized from
/// flat config files. Use the accessor methods to obtain [`Duration`]s.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Capacity of the log output buffer ring.
    pub num_log_buffers: usize,
    /// How often the serializer task drains the flush queue.
    pub log_serialization_interval_ms: u64,
    /// How often the disk writer persists in the absence of other triggers.
    pub log_persist_interval_ms: u64,
    /// Force a persist once this many bytes have been written since the last.
    pub log_persist_threshold_bytes: u64,
    /// Garbage collection period.
    pub gc_period_ms: u64,
    /// When false, the caller is responsible for freeing committed
    /// transaction contexts and undo retention grows unbounded.
    pub gc_enabled: bool,
    /// Path of the write-ahead log file. `None` disables logging entirely.
    pub log_file_path: Option<String>,
}

impl StorageConfig {
    pub fn log_serialization_interval(&self) -> Duration {
        Duration::from_millis(self.log_serialization_interval_ms)
    }

    pub fn log_persist_interval(&self) -> Duration {
        Duration::from_millis(self.log_persist_interval_ms)
    }

    pub fn gc_period(&self) -> Duration {
        Duration::from_millis(self.gc_period_ms)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            num_log_buffers: 100,
            log_serialization_interval_ms: 10,
            log_persist_interval_ms: 20,
            log_persist_threshold_bytes: 1 << 20,
            gc_period_ms: 10,
            gc_enabled: true,
            log_file_path: None,
        }
    }
}
