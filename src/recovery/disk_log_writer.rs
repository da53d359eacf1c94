use crate::recovery::log_manager::{CommitEntry, DiskLogMessage, LogOutputBuffer};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, error, trace};
use std::fs::File;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Dedicated task that drains filled output buffers to the log file,
/// recycles them to the empty-buffer ring, and periodically persists.
///
/// A persist happens when the persist interval elapses, when the bytes
/// written since the last persist exceed the threshold, when a force-persist
/// is requested, and on shutdown. Commit callbacks fire only after their
/// buffer is known durable; on an I/O error they are dropped unfired and the
/// subsystem goes fail-stop.
pub(crate) struct DiskLogConsumerTask {
    file: File,
    persist_interval: Duration,
    persist_threshold: u64,
    filled_rx: Receiver<DiskLogMessage>,
    empty_tx: Sender<LogOutputBuffer>,
    io_error: Arc<AtomicBool>,
}

impl DiskLogConsumerTask {
    pub(crate) fn new(
        file: File,
        persist_interval: Duration,
        persist_threshold: u64,
        filled_rx: Receiver<DiskLogMessage>,
        empty_tx: Sender<LogOutputBuffer>,
        io_error: Arc<AtomicBool>,
    ) -> Self {
        Self {
            file,
            persist_interval,
            persist_threshold,
            filled_rx,
            empty_tx,
            io_error,
        }
    }

    pub(crate) fn run(mut self) {
        let mut pending_commits: Vec<CommitEntry> = Vec::new();
        let mut written_since_persist: u64 = 0;

        loop {
            match self.filled_rx.recv_timeout(self.persist_interval) {
                Ok(DiskLogMessage::Logs(logs)) => {
                    self.consume_logs(logs, &mut pending_commits, &mut written_since_persist);
                    if written_since_persist > self.persist_threshold {
                        self.persist(&mut pending_commits, &mut written_since_persist);
                    }
                }
                Ok(DiskLogMessage::ForcePersist(ack)) => {
                    self.persist(&mut pending_commits, &mut written_since_persist);
                    let _ = ack.send(());
                }
                Ok(DiskLogMessage::Shutdown) => break,
                Err(RecvTimeoutError::Timeout) => {
                    if written_since_persist > 0 || !pending_commits.is_empty() {
                        self.persist(&mut pending_commits, &mut written_since_persist);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        // Be extra sure everything queued before shutdown is processed.
        while let Ok(message) = self.filled_rx.try_recv() {
            if let DiskLogMessage::Logs(logs) = message {
                self.consume_logs(logs, &mut pending_commits, &mut written_since_persist);
            }
        }
        self.persist(&mut pending_commits, &mut written_since_persist);
        debug!("disk log writer exiting");
    }

    fn consume_logs(
        &mut self,
        logs: crate::recovery::log_manager::SerializedLogs,
        pending_commits: &mut Vec<CommitEntry>,
        written_since_persist: &mut u64,
    ) {
        let mut buffer = logs.buffer;
        if !self.io_error.load(Ordering::SeqCst) {
            match self.file.write_all(buffer.data()) {
                Ok(()) => {
                    *written_since_persist += buffer.len() as u64;
                    trace!("wrote {} log bytes", buffer.len());
                }
                Err(e) => {
                    error!("failed to write log to disk: {}", e);
                    self.io_error.store(true, Ordering::SeqCst);
                }
            }
        }
        pending_commits.extend(logs.commits);
        buffer.clear();
        let _ = self.empty_tx.send(buffer);
    }

    fn persist(&mut self, pending_commits: &mut Vec<CommitEntry>, written_since_persist: &mut u64) {
        if self.io_error.load(Ordering::SeqCst) {
            // Fail-stop: the log is no longer trustworthy, so the callbacks
            // must never report durability. Dropping them leaves the affected
            // transactions un-deallocatable, which is the observable leak the
            // diagnostics look for.
            pending_commits.clear();
            return;
        }
        if let Err(e) = self.file.sync_data() {
            error!("failed to persist log file: {}", e);
            self.io_error.store(true, Ordering::SeqCst);
            pending_commits.clear();
            return;
        }
        *written_since_persist = 0;
        for entry in pending_commits.drain(..) {
            entry.txn.mark_log_processed();
            (entry.callback)();
        }
    }
}
