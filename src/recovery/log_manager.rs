use crate::common::config::LOG_BUFFER_SIZE;
use crate::common::exception::LogError;
use crate::concurrency::transaction::TransactionContext;
use crate::recovery::disk_log_writer::DiskLogConsumerTask;
use crate::recovery::log_serializer::{FlushQueue, LogSerializerTask};
use crate::storage::record_buffer::{RecordBufferSegmentPool, RedoBufferSegment};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, error, info};
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Invoked by the disk writer after the commit record is durable.
pub type CommitCallback = Box<dyn FnOnce() + Send + 'static>;

/// A finished transaction's staged log records, handed to the serializer.
///
/// Commits carry the callback to run after durability; aborts hand their
/// segments bare (their REDO records may legally reach the log, but nothing
/// about an abort needs to be awaited).
pub struct TxnHandoff {
    pub txn: Arc<TransactionContext>,
    pub segments: Vec<RedoBufferSegment>,
    pub commit_callback: Option<CommitCallback>,
}

/// One output buffer of the ring cycling between the serializer (fills) and
/// the disk writer (drains).
pub(crate) struct LogOutputBuffer {
    bytes: Vec<u8>,
}

impl LogOutputBuffer {
    fn new() -> Self {
        Self {
            bytes: Vec::with_capacity(LOG_BUFFER_SIZE),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.bytes.len()
    }

    pub(crate) fn has_room_for(&self, additional: usize) -> bool {
        self.bytes.len() + additional <= LOG_BUFFER_SIZE
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.bytes
    }

    pub(crate) fn data(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn clear(&mut self) {
        self.bytes.clear();
    }
}

/// A commit whose record landed in a particular output buffer; resolved by
/// the disk writer once that buffer is durable.
pub(crate) struct CommitEntry {
    pub txn: Arc<TransactionContext>,
    pub callback: CommitCallback,
}

/// A filled output buffer together with the commits it carries.
pub(crate) struct SerializedLogs {
    pub buffer: LogOutputBuffer,
    pub commits: Vec<CommitEntry>,
}

/// Messages consumed by the disk writer thread.
pub(crate) enum DiskLogMessage {
    Logs(SerializedLogs),
    ForcePersist(Sender<()>),
    Shutdown,
}

/// Owns the write-ahead log pipeline: the flush queue filled by committing
/// transactions, the ring of output buffers, and the two dedicated threads
/// (serializer and disk writer).
///
/// Because commits are serialized through the transaction manager's latch
/// and handed off in commit order, the on-disk record order matches commit
/// timestamp order.
pub struct LogManager {
    log_file_path: String,
    num_log_buffers: usize,
    serialization_interval: Duration,
    persist_interval: Duration,
    persist_threshold: u64,

    flush_queue: Arc<FlushQueue>,
    buffer_pool: Arc<RecordBufferSegmentPool>,

    empty_buffer_tx: Sender<LogOutputBuffer>,
    empty_buffer_rx: Receiver<LogOutputBuffer>,
    disk_writer_tx: Sender<DiskLogMessage>,
    disk_writer_rx: Receiver<DiskLogMessage>,

    run_log_manager: AtomicBool,
    serializer_stop: Arc<AtomicBool>,
    io_error: Arc<AtomicBool>,
    serializer_handle: Mutex<Option<thread::JoinHandle<()>>>,
    disk_writer_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl LogManager {
    pub fn new(
        log_file_path: impl Into<String>,
        num_log_buffers: usize,
        serialization_interval: Duration,
        persist_interval: Duration,
        persist_threshold: u64,
        buffer_pool: Arc<RecordBufferSegmentPool>,
    ) -> Self {
        let (empty_buffer_tx, empty_buffer_rx) = bounded(num_log_buffers);
        let (disk_writer_tx, disk_writer_rx) = unbounded();
        Self {
            log_file_path: log_file_path.into(),
            num_log_buffers,
            serialization_interval,
            persist_interval,
            persist_threshold,
            flush_queue: Arc::new(FlushQueue::new()),
            buffer_pool,
            empty_buffer_tx,
            empty_buffer_rx,
            disk_writer_tx,
            disk_writer_rx,
            run_log_manager: AtomicBool::new(false),
            serializer_stop: Arc::new(AtomicBool::new(false)),
            io_error: Arc::new(AtomicBool::new(false)),
            serializer_handle: Mutex::new(None),
            disk_writer_handle: Mutex::new(None),
        }
    }

    /// Spawns the serializer and disk writer threads and primes the output
    /// buffer ring.
    pub fn start(&self) -> Result<(), LogError> {
        assert!(
            !self.run_log_manager.load(Ordering::SeqCst),
            "LogManager already started"
        );
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file_path)?;

        for _ in 0..self.num_log_buffers {
            self.empty_buffer_tx
                .send(LogOutputBuffer::new())
                .expect("empty buffer queue rejected priming");
        }

        let disk_writer = DiskLogConsumerTask::new(
            file,
            self.persist_interval,
            self.persist_threshold,
            self.disk_writer_rx.clone(),
            self.empty_buffer_tx.clone(),
            Arc::clone(&self.io_error),
        );
        *self.disk_writer_handle.lock() = Some(
            thread::Builder::new()
                .name("disk-log-writer".into())
                .spawn(move || disk_writer.run())
                .expect("failed to spawn disk log writer"),
        );

        let serializer = LogSerializerTask::new(
            self.serialization_interval,
            Arc::clone(&self.flush_queue),
            Arc::clone(&self.buffer_pool),
            self.empty_buffer_rx.clone(),
            self.disk_writer_tx.clone(),
            Arc::clone(&self.serializer_stop),
        );
        *self.serializer_handle.lock() = Some(
            thread::Builder::new()
                .name("log-serializer".into())
                .spawn(move || serializer.run())
                .expect("failed to spawn log serializer"),
        );

        self.run_log_manager.store(true, Ordering::SeqCst);
        info!("log manager started on {}", self.log_file_path);
        Ok(())
    }

    /// Hands a finished transaction's staged records to the serializer.
    pub fn add_txn_to_flush_queue(&self, handoff: TxnHandoff) {
        debug_assert!(
            self.run_log_manager.load(Ordering::SeqCst),
            "must call start on log manager before handing it buffers"
        );
        self.flush_queue.push(handoff);
    }

    /// Forces everything already serialized out to disk and waits for the
    /// fsync to finish.
    pub fn force_flush(&self) {
        let (ack_tx, ack_rx) = bounded(1);
        if self
            .disk_writer_tx
            .send(DiskLogMessage::ForcePersist(ack_tx))
            .is_ok()
        {
            let _ = ack_rx.recv();
        }
    }

    /// Serializes and persists all outstanding records, then stops both
    /// threads: serializer first, disk writer second (reverse of start).
    pub fn persist_and_stop(&self) {
        assert!(
            self.run_log_manager.load(Ordering::SeqCst),
            "can't call persist_and_stop on an un-started LogManager"
        );
        self.run_log_manager.store(false, Ordering::SeqCst);

        self.serializer_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.serializer_handle.lock().take() {
            if handle.join().is_err() {
                error!("log serializer thread panicked");
            }
        }

        let _ = self.disk_writer_tx.send(DiskLogMessage::Shutdown);
        if let Some(handle) = self.disk_writer_handle.lock().take() {
            if handle.join().is_err() {
                error!("disk log writer thread panicked");
            }
        }

        debug_assert!(
            self.flush_queue.is_empty(),
            "serializer should have drained the flush queue"
        );
        debug!("log manager stopped");
    }

    /// True once a log write or fsync has failed; commits stop becoming
    /// durable and their callbacks are never fired.
    pub fn io_error(&self) -> bool {
        self.io_error.load(Ordering::SeqCst)
    }

    pub fn log_file_path(&self) -> &str {
        &self.log_file_path
    }
}
