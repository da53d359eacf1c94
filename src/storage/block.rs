use crate::common::config::{BlockId, SlotOffset, BLOCK_SLOT_CAPACITY};
use crate::storage::undo_record::UndoRecord;
use parking_lot::RwLock;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};
use std::sync::Arc;

/// Latched contents of one tuple slot: the logical presence bit and the
/// column values. Presence participates in the same copy-then-repair
/// discipline as the columns, so deletes and insert rollbacks are observed
/// atomically with the data.
pub(crate) struct SlotData {
    pub present: bool,
    pub columns: Vec<Option<Vec<u8>>>,
}

/// Physical home of one tuple: the atomic version chain head plus the
/// latched slot contents.
pub(crate) struct Slot {
    version_ptr: AtomicPtr<UndoRecord>,
    pub(crate) data: RwLock<SlotData>,
}

impl Slot {
    fn new(num_columns: u16) -> Self {
        Self {
            version_ptr: AtomicPtr::new(ptr::null_mut()),
            data: RwLock::new(SlotData {
                present: false,
                columns: vec![None; num_columns as usize],
            }),
        }
    }

    pub(crate) fn version_ptr(&self) -> *mut UndoRecord {
        self.version_ptr.load(Ordering::SeqCst)
    }

    pub(crate) fn store_version_ptr(&self, record: *mut UndoRecord) {
        self.version_ptr.store(record, Ordering::SeqCst);
    }

    pub(crate) fn compare_and_swap_version_ptr(
        &self,
        expected: *mut UndoRecord,
        desired: *mut UndoRecord,
    ) -> bool {
        self.version_ptr
            .compare_exchange(expected, desired, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// A fixed-capacity run of tuple slots. Slot reservation is a monotone
/// cursor; freed slots are not reused before compaction, which this engine
/// does not perform.
pub struct Block {
    id: BlockId,
    insert_head: AtomicU32,
    slots: Box<[Slot]>,
}

impl Block {
    fn new(id: BlockId, num_columns: u16) -> Self {
        let slots = (0..BLOCK_SLOT_CAPACITY)
            .map(|_| Slot::new(num_columns))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            id,
            insert_head: AtomicU32::new(0),
            slots,
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Reserves the next free slot, or `None` when the block is full.
    pub(crate) fn reserve_slot(&self) -> Option<SlotOffset> {
        let offset = self.insert_head.fetch_add(1, Ordering::SeqCst);
        if (offset as usize) < BLOCK_SLOT_CAPACITY {
            Some(offset)
        } else {
            None
        }
    }

    pub(crate) fn slot(&self, offset: SlotOffset) -> &Slot {
        &self.slots[offset as usize]
    }
}

/// Hands out blocks with process-unique ids.
pub struct BlockStore {
    next_block_id: AtomicU32,
}

impl BlockStore {
    pub fn new() -> Self {
        Self {
            next_block_id: AtomicU32::new(0),
        }
    }

    pub fn allocate(&self, num_columns: u16) -> Arc<Block> {
        let id = self.next_block_id.fetch_add(1, Ordering::SeqCst);
        Arc::new(Block::new(id, num_columns))
    }
}

impl Default for BlockStore {
    fn default() -> Self {
        Self::new()
    }
}
