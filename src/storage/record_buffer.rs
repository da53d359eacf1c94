use crate::common::config::{REDO_SEGMENT_CAPACITY, SEGMENT_POOL_RETENTION, UNDO_SEGMENT_CAPACITY};
use crate::recovery::log_record::LogRecord;
use crate::storage::undo_record::UndoRecord;
use parking_lot::Mutex;
use std::mem::MaybeUninit;
use std::ptr::NonNull;
use std::sync::Arc;

/// Fixed-capacity arena for undo records.
///
/// Records are written in place and never move: version chains hold raw
/// pointers into segments, which stay valid until the owning transaction
/// context is deallocated by the garbage collector.
pub struct UndoBufferSegment {
    records: Box<[MaybeUninit<UndoRecord>]>,
    len: usize,
}

impl UndoBufferSegment {
    fn new() -> Self {
        let records = (0..UNDO_SEGMENT_CAPACITY)
            .map(|_| MaybeUninit::uninit())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { records, len: 0 }
    }

    pub fn is_full(&self) -> bool {
        self.len == self.records.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Writes `record` into the next slot and returns its stable address.
    fn append(&mut self, record: UndoRecord) -> NonNull<UndoRecord> {
        debug_assert!(!self.is_full());
        let slot = &mut self.records[self.len];
        let ptr = slot.write(record) as *mut UndoRecord;
        self.len += 1;
        // SAFETY: just written into the arena; never null.
        unsafe { NonNull::new_unchecked(ptr) }
    }

    /// Drops the most recently appended record. Only legal while the record
    /// has not been installed on any version chain.
    fn pop(&mut self) {
        debug_assert!(self.len > 0);
        self.len -= 1;
        // SAFETY: slots below `len` were initialized by `append`.
        unsafe { self.records[self.len].assume_init_drop() };
    }

    pub fn iter(&self) -> impl Iterator<Item = &UndoRecord> {
        // SAFETY: slots below `len` were initialized by `append`.
        self.records[..self.len]
            .iter()
            .map(|slot| unsafe { slot.assume_init_ref() })
    }

    fn clear(&mut self) {
        for slot in &mut self.records[..self.len] {
            // SAFETY: slots below `len` were initialized by `append`.
            unsafe { slot.assume_init_drop() };
        }
        self.len = 0;
    }
}

impl Drop for UndoBufferSegment {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Fixed-capacity segment of staged log records.
pub struct RedoBufferSegment {
    records: Vec<LogRecord>,
}

impl RedoBufferSegment {
    fn new() -> Self {
        Self {
            records: Vec::with_capacity(REDO_SEGMENT_CAPACITY),
        }
    }

    pub fn is_full(&self) -> bool {
        self.records.len() == REDO_SEGMENT_CAPACITY
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn push(&mut self, record: LogRecord) {
        debug_assert!(!self.is_full());
        self.records.push(record);
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogRecord> {
        self.records.iter()
    }

    fn clear(&mut self) {
        self.records.clear();
    }
}

/// Pool of recycled buffer segments, shared by every transaction.
///
/// Deallocation of a transaction returns its segments here in bulk; the pool
/// retains a bounded number and lets the rest drop.
pub struct RecordBufferSegmentPool {
    undo_segments: Mutex<Vec<UndoBufferSegment>>,
    redo_segments: Mutex<Vec<RedoBufferSegment>>,
}

impl RecordBufferSegmentPool {
    pub fn new() -> Self {
        Self {
            undo_segments: Mutex::new(Vec::new()),
            redo_segments: Mutex::new(Vec::new()),
        }
    }

    pub fn get_undo_segment(&self) -> UndoBufferSegment {
        self.undo_segments
            .lock()
            .pop()
            .unwrap_or_else(UndoBufferSegment::new)
    }

    pub fn release_undo_segment(&self, mut segment: UndoBufferSegment) {
        segment.clear();
        let mut pool = self.undo_segments.lock();
        if pool.len() < SEGMENT_POOL_RETENTION {
            pool.push(segment);
        }
    }

    pub fn get_redo_segment(&self) -> RedoBufferSegment {
        self.redo_segments
            .lock()
            .pop()
            .unwrap_or_else(RedoBufferSegment::new)
    }

    pub fn release_redo_segment(&self, mut segment: RedoBufferSegment) {
        segment.clear();
        let mut pool = self.redo_segments.lock();
        if pool.len() < SEGMENT_POOL_RETENTION {
            pool.push(segment);
        }
    }

    /// Number of undo segments currently available for reuse.
    pub fn undo_segments_available(&self) -> usize {
        self.undo_segments.lock().len()
    }

    /// Number of redo segments currently available for reuse.
    pub fn redo_segments_available(&self) -> usize {
        self.redo_segments.lock().len()
    }
}

impl Default for RecordBufferSegmentPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-transaction append-only segmented list of undo records.
pub struct UndoBuffer {
    pool: Arc<RecordBufferSegmentPool>,
    segments: Vec<UndoBufferSegment>,
}

impl UndoBuffer {
    pub fn new(pool: Arc<RecordBufferSegmentPool>) -> Self {
        Self {
            pool,
            segments: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|s| s.is_empty())
    }

    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.len()).sum()
    }

    /// Appends a record, chaining a fresh segment from the pool when the
    /// tail is full, and returns the record's stable address.
    pub fn append(&mut self, record: UndoRecord) -> NonNull<UndoRecord> {
        if self.segments.last().map_or(true, |s| s.is_full()) {
            self.segments.push(self.pool.get_undo_segment());
        }
        self.segments.last_mut().unwrap().append(record)
    }

    /// Removes the most recently appended record (a staged record whose
    /// chain installation lost its CAS and was never published).
    pub fn pop_newest(&mut self) {
        let segment = self
            .segments
            .last_mut()
            .expect("pop_newest on empty undo buffer");
        segment.pop();
        if segment.is_empty() {
            let empty = self.segments.pop().unwrap();
            self.pool.release_undo_segment(empty);
        }
    }

    /// Records in append (oldest-first) order.
    pub fn iter(&self) -> impl Iterator<Item = &UndoRecord> {
        self.segments.iter().flat_map(|s| s.iter())
    }
}

impl Drop for UndoBuffer {
    fn drop(&mut self) {
        for segment in self.segments.drain(..) {
            self.pool.release_undo_segment(segment);
        }
    }
}

/// Per-transaction append-only segmented list of staged log records.
pub struct RedoBuffer {
    pool: Arc<RecordBufferSegmentPool>,
    segments: Vec<RedoBufferSegment>,
}

impl RedoBuffer {
    pub fn new(pool: Arc<RecordBufferSegmentPool>) -> Self {
        Self {
            pool,
            segments: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|s| s.is_empty())
    }

    pub fn append(&mut self, record: LogRecord) {
        if self.segments.last().map_or(true, |s| s.is_full()) {
            self.segments.push(self.pool.get_redo_segment());
        }
        self.segments.last_mut().unwrap().push(record);
    }

    /// Moves all staged segments out for handoff to the log serializer.
    pub fn take_segments(&mut self) -> Vec<RedoBufferSegment> {
        std::mem::take(&mut self.segments)
    }
}

impl Drop for RedoBuffer {
    fn drop(&mut self) {
        for segment in self.segments.drain(..) {
            self.pool.release_redo_segment(segment);
        }
    }
}
