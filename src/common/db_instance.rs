use crate::common::config::{DatabaseOid, StorageConfig, TableOid};
use crate::common::exception::LogError;
use crate::concurrency::transaction_manager::TransactionManager;
use crate::recovery::log_manager::LogManager;
use crate::storage::block::BlockStore;
use crate::storage::data_table::DataTable;
use crate::storage::garbage_collector::GarbageCollector;
use crate::storage::gc_thread::GarbageCollectorThread;
use crate::storage::layout::BlockLayout;
use crate::storage::record_buffer::RecordBufferSegmentPool;
use log::info;
use parking_lot::Mutex;
use std::sync::Arc;

/// Top-level owner of the engine's moving parts: the buffer pool, the
/// optional write-ahead log pipeline, the transaction manager, and the
/// garbage collector with its dedicated thread.
///
/// There are no process-wide singletons; the timestamp source lives inside
/// the transaction manager and every thread handle is owned here.
pub struct StorageInstance {
    config: StorageConfig,
    buffer_pool: Arc<RecordBufferSegmentPool>,
    block_store: Arc<BlockStore>,
    log_manager: Option<Arc<LogManager>>,
    txn_manager: Arc<TransactionManager>,
    garbage_collector: Option<Arc<Mutex<GarbageCollector>>>,
    gc_thread: Option<GarbageCollectorThread>,
}

impl StorageInstance {
    pub fn new(config: StorageConfig) -> Result<Self, LogError> {
        let buffer_pool = Arc::new(RecordBufferSegmentPool::new());
        let block_store = Arc::new(BlockStore::new());

        let log_manager = match &config.log_file_path {
            Some(path) => {
                let log_manager = Arc::new(LogManager::new(
                    path.clone(),
                    config.num_log_buffers,
                    config.log_serialization_interval(),
                    config.log_persist_interval(),
                    config.log_persist_threshold_bytes,
                    Arc::clone(&buffer_pool),
                ));
                log_manager.start()?;
                Some(log_manager)
            }
            None => None,
        };

        let txn_manager = Arc::new(TransactionManager::new(
            Arc::clone(&buffer_pool),
            config.gc_enabled,
            log_manager.clone(),
        ));

        let (garbage_collector, gc_thread) = if config.gc_enabled {
            let gc = Arc::new(Mutex::new(GarbageCollector::new(Arc::clone(&txn_manager))));
            let gc_thread = GarbageCollectorThread::new(Arc::clone(&gc), config.gc_period());
            (Some(gc), Some(gc_thread))
        } else {
            (None, None)
        };

        info!(
            "storage instance up (logging: {}, gc: {})",
            log_manager.is_some(),
            config.gc_enabled
        );
        Ok(Self {
            config,
            buffer_pool,
            block_store,
            log_manager,
            txn_manager,
            garbage_collector,
            gc_thread,
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn txn_manager(&self) -> &Arc<TransactionManager> {
        &self.txn_manager
    }

    pub fn log_manager(&self) -> Option<&Arc<LogManager>> {
        self.log_manager.as_ref()
    }

    pub fn garbage_collector(&self) -> Option<&Arc<Mutex<GarbageCollector>>> {
        self.garbage_collector.as_ref()
    }

    pub fn buffer_pool(&self) -> &Arc<RecordBufferSegmentPool> {
        &self.buffer_pool
    }

    pub fn create_table(
        &self,
        db_oid: DatabaseOid,
        table_oid: TableOid,
        layout: Arc<BlockLayout>,
    ) -> Arc<DataTable> {
        DataTable::new(Arc::clone(&self.block_store), layout, db_oid, table_oid)
    }

    /// Persists every outstanding commit, then tears the background threads
    /// down: log pipeline first, garbage collector last, so the final GC
    /// passes can deallocate the now log-processed transactions.
    pub fn shutdown(mut self) {
        if let Some(log_manager) = &self.log_manager {
            log_manager.persist_and_stop();
        }
        self.gc_thread.take(); // drop terminates and runs final passes
        info!("storage instance shut down");
    }
}
