use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Coordination point between recovery and the background file paths. While
/// a bootstrap run is active, flushes and other disk work stand down so
/// recovery I/O has the device to itself.
pub trait Mediator: Send + Sync {
    /// Idempotent; pairs with [`Mediator::enable_file_ops`].
    fn disable_file_ops(&self);
    fn enable_file_ops(&self);
    fn file_ops_enabled(&self) -> bool;
}

#[derive(Debug, Default)]
pub struct FileOpsMediator {
    disabled: AtomicBool,
}

impl FileOpsMediator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Mediator for FileOpsMediator {
    fn disable_file_ops(&self) {
        self.disabled.store(true, Ordering::SeqCst);
    }

    fn enable_file_ops(&self) {
        self.disabled.store(false, Ordering::SeqCst);
    }

    fn file_ops_enabled(&self) -> bool {
        !self.disabled.load(Ordering::SeqCst)
    }
}

/// Scoped file-ops pause: disables on construction, re-enables exactly once
/// on drop, unwinding included.
pub struct FileOpsPause {
    mediator: Arc<dyn Mediator>,
}

impl FileOpsPause {
    pub fn new(mediator: Arc<dyn Mediator>) -> Self {
        mediator.disable_file_ops();
        Self { mediator }
    }
}

impl Drop for FileOpsPause {
    fn drop(&mut self) {
        self.mediator.enable_file_ops();
    }
}
