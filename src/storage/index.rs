use std::sync::Arc;

/// Capability interface the garbage collector requires of an index: a hook
/// to reclaim its own epoch-retired nodes, invoked once per GC cycle.
pub trait Index: Send + Sync {
    fn perform_garbage_collection(&self);
}

/// Convenience for tests and simple in-memory indexes.
impl<F: Fn() + Send + Sync> Index for F {
    fn perform_garbage_collection(&self) {
        self()
    }
}

pub type IndexRef = Arc<dyn Index>;
