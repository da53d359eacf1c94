use crate::storage::garbage_collector::GarbageCollector;
use log::{debug, error};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Dedicated thread running the garbage collector at a fixed period.
///
/// Termination finishes the current iteration before exiting, and must not
/// be requested before the thread has observably started; `terminate`
/// spin-yields until the first tick. Dropping the handle stops the thread
/// and runs two final collection cycles so the unlink and deallocate phases
/// both get a last chance.
pub struct GarbageCollectorThread {
    gc: Arc<Mutex<GarbageCollector>>,
    stop: Arc<AtomicBool>,
    started: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl GarbageCollectorThread {
    pub fn new(gc: Arc<Mutex<GarbageCollector>>, gc_period: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let started = Arc::new(AtomicBool::new(false));

        let thread_gc = Arc::clone(&gc);
        let thread_stop = Arc::clone(&stop);
        let thread_started = Arc::clone(&started);
        let handle = thread::Builder::new()
            .name("garbage-collector".into())
            .spawn(move || {
                thread_started.store(true, Ordering::SeqCst);
                while !thread_stop.load(Ordering::SeqCst) {
                    thread::park_timeout(gc_period);
                    let (deallocated, unlinked) =
                        thread_gc.lock().perform_garbage_collection();
                    if deallocated > 0 || unlinked > 0 {
                        debug!(
                            "gc cycle: deallocated {}, unlinked {}",
                            deallocated, unlinked
                        );
                    }
                }
            })
            .expect("failed to spawn garbage collector thread");

        Self {
            gc,
            stop,
            started,
            handle: Some(handle),
        }
    }

    /// Signals the thread to stop after its current iteration and joins it.
    pub fn terminate(&mut self) {
        // Yield until the task has actually started running.
        while !self.started.load(Ordering::SeqCst) {
            thread::yield_now();
        }
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                error!("garbage collector thread panicked");
            }
        }
    }

    pub fn gc(&self) -> &Arc<Mutex<GarbageCollector>> {
        &self.gc
    }
}

impl Drop for GarbageCollectorThread {
    fn drop(&mut self) {
        self.terminate();
        // Final unlink and deallocate passes.
        let mut gc = self.gc.lock();
        gc.perform_garbage_collection();
        gc.perform_garbage_collection();
    }
}
