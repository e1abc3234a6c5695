use tokio::task::JoinSet;

/// Tracks fire-and-forget background work (Semantic Cache writes,
/// command-history inserts) so shutdown can cancel-then-await rather than
/// leaking orphaned tasks (spec §5, §9 "Background fire-and-forget").
///
/// Grounded on `original_source/src/intelligence/registry.py`'s
/// `track_task`/`shutdown` pair.
#[derive(Default)]
pub struct TaskTracker {
    tasks: JoinSet<()>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a future and track it for graceful shutdown.
    pub fn track<F>(&mut self, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(fut);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Cancel all outstanding tasks and await their completion.
    pub async fn shutdown(&mut self) {
        self.tasks.shutdown().await;
    }
}
