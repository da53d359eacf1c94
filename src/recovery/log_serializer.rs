use crate::recovery::log_manager::{
    CommitEntry, DiskLogMessage, LogOutputBuffer, SerializedLogs, TxnHandoff,
};
use crate::storage::record_buffer::RecordBufferSegmentPool;
use crossbeam_channel::{Receiver, Sender};
use log::{debug, trace};
use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::hint;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Spin-latched FIFO carrying finished transactions' staged records from
/// committing threads to the serializer.
///
/// The only two operations are a producer-side push and the consumer's
/// wholesale swap of the backlog; both critical sections are a few pointer
/// moves, which is why a test-and-set spin beats a full mutex here. Commits
/// already arrive in commit-timestamp order (they push while holding the
/// transaction manager's commit latch), so FIFO order is log order.
pub(crate) struct FlushQueue {
    latch: AtomicBool,
    handoffs: UnsafeCell<VecDeque<TxnHandoff>>,
}

// SAFETY: `handoffs` is only touched between acquire/release pairs.
unsafe impl Send for FlushQueue {}
unsafe impl Sync for FlushQueue {}

impl FlushQueue {
    pub(crate) fn new() -> Self {
        Self {
            latch: AtomicBool::new(false),
            handoffs: UnsafeCell::new(VecDeque::new()),
        }
    }

    fn acquire(&self) {
        while self
            .latch
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            hint::spin_loop();
        }
    }

    fn release(&self) {
        self.latch.store(false, Ordering::Release);
    }

    pub(crate) fn push(&self, handoff: TxnHandoff) {
        self.acquire();
        // SAFETY: the latch is held.
        unsafe { (*self.handoffs.get()).push_back(handoff) };
        self.release();
    }

    /// Takes the entire backlog in one critical section, leaving the queue
    /// empty for the next producers.
    pub(crate) fn swap(&self) -> VecDeque<TxnHandoff> {
        self.acquire();
        // SAFETY: the latch is held.
        let backlog = unsafe { std::mem::take(&mut *self.handoffs.get()) };
        self.release();
        backlog
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.acquire();
        // SAFETY: the latch is held.
        let empty = unsafe { (*self.handoffs.get()).is_empty() };
        self.release();
        empty
    }
}

/// Dedicated task that drains the flush queue every serialization interval
/// and converts handed-off record segments into the ordered on-disk byte
/// stream.
///
/// Only this single thread serializes, so a transaction's records stay
/// contiguous and the stream order matches handoff (= commit) order without
/// any further coordination.
pub(crate) struct LogSerializerTask {
    serialization_interval: Duration,
    flush_queue: Arc<FlushQueue>,
    buffer_pool: Arc<RecordBufferSegmentPool>,
    empty_buffer_rx: Receiver<LogOutputBuffer>,
    disk_writer_tx: Sender<DiskLogMessage>,
    stop: Arc<AtomicBool>,
}

impl LogSerializerTask {
    pub(crate) fn new(
        serialization_interval: Duration,
        flush_queue: Arc<FlushQueue>,
        buffer_pool: Arc<RecordBufferSegmentPool>,
        empty_buffer_rx: Receiver<LogOutputBuffer>,
        disk_writer_tx: Sender<DiskLogMessage>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            serialization_interval,
            flush_queue,
            buffer_pool,
            empty_buffer_rx,
            disk_writer_tx,
            stop,
        }
    }

    pub(crate) fn run(self) {
        while !self.stop.load(Ordering::SeqCst) {
            self.process();
            thread::park_timeout(self.serialization_interval);
        }
        // Final drain so persist_and_stop leaves nothing unserialized.
        self.process();
    }

    /// Swaps the flush queue and serializes every handoff in order. The
    /// partial output buffer is handed to the disk writer at the end of the
    /// pass so commit latency is bounded by the serialization interval, not
    /// by buffer granularity.
    fn process(&self) {
        let handoffs = self.flush_queue.swap();
        if handoffs.is_empty() {
            return;
        }
        trace!("serializing {} transaction handoffs", handoffs.len());

        let mut current: Option<LogOutputBuffer> = None;
        let mut commits: Vec<CommitEntry> = Vec::new();

        for handoff in handoffs {
            let TxnHandoff {
                txn,
                segments,
                commit_callback,
            } = handoff;

            let mut scratch = Vec::new();
            for segment in &segments {
                for record in segment.iter() {
                    scratch.clear();
                    record.serialize_into(&mut scratch);
                    self.write_bytes(&scratch, &mut current, &mut commits);
                }
            }
            for segment in segments {
                self.buffer_pool.release_redo_segment(segment);
            }

            match commit_callback {
                Some(callback) => {
                    // The commit record just landed in `current`; resolve the
                    // callback once that buffer is durable.
                    commits.push(CommitEntry { txn, callback });
                }
                None => {
                    // Aborted transaction: its records are serialized and its
                    // varlen payloads copied out, so deallocation may proceed
                    // without waiting for durability.
                    txn.mark_log_processed();
                }
            }
        }

        if let Some(buffer) = current.take() {
            self.hand_filled_buffer(buffer, std::mem::take(&mut commits));
        } else {
            debug_assert!(commits.is_empty());
        }
    }

    /// Appends `bytes` to the current output buffer, cycling to a fresh one
    /// when full. Records never span buffers; a record larger than a whole
    /// buffer keeps its buffer oversized for one handoff.
    fn write_bytes(
        &self,
        bytes: &[u8],
        current: &mut Option<LogOutputBuffer>,
        commits: &mut Vec<CommitEntry>,
    ) {
        if let Some(buffer) = current.as_ref() {
            if !buffer.has_room_for(bytes.len()) && !buffer.is_empty() {
                let full = current.take().unwrap();
                self.hand_filled_buffer(full, std::mem::take(commits));
            }
        }
        if current.is_none() {
            let fresh = self
                .empty_buffer_rx
                .recv()
                .expect("empty buffer queue disconnected");
            *current = Some(fresh);
        }
        current
            .as_mut()
            .unwrap()
            .buffer_mut()
            .extend_from_slice(bytes);
    }

    fn hand_filled_buffer(&self, buffer: LogOutputBuffer, commits: Vec<CommitEntry>) {
        debug!(
            "handing {} bytes and {} commits to disk writer",
            buffer.len(),
            commits.len()
        );
        let _ = self
            .disk_writer_tx
            .send(DiskLogMessage::Logs(SerializedLogs { buffer, commits }));
    }
}
