use std::future::Future;

use tokio::sync::Mutex;

/// A single-slot async queue.
///
/// Tasks submitted through [`SerialQueue::run`] execute one at a time in
/// submission order. A task that fails (or is dropped mid-flight) releases the
/// slot like any other, so it never blocks the tasks queued behind it.
#[derive(Debug, Default)]
pub struct SerialQueue {
    slot: Mutex<()>,
}

impl SerialQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` once every previously submitted task has settled.
    pub async fn run<F>(&self, task: F) -> F::Output
    where
        F: Future,
    {
        let _guard = self.slot.lock().await;
        task.await
    }

    /// Whether no task currently holds the slot.
    pub fn is_idle(&self) -> bool {
        self.slot.try_lock().is_ok()
    }
}
