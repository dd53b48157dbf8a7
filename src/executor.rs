use std::future::Future;
use tokio::task::JoinSet;
use tracing::{info, warn, Instrument};

/// Owns the set of running pipeline workers.
///
/// Each worker is a future resolving to its own result (usually a stats
/// record); [`WorkerExecutor::join_all`] waits for every worker and collects
/// the results of those that did not panic.
pub struct WorkerExecutor<T> {
    workers: JoinSet<(String, T)>,
}

impl<T: Send + 'static> WorkerExecutor<T> {
    pub fn new() -> Self {
        Self {
            workers: JoinSet::new(),
        }
    }

    pub fn spawn<F>(&mut self, name: impl Into<String>, worker: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let name = name.into();
        let span = tracing::info_span!("worker", name = %name);
        info!(worker = %name, "Starting worker");
        self.workers
            .spawn(async move { (name, worker.await) }.instrument(span));
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub async fn join_all(mut self) -> Vec<T> {
        let mut results = Vec::with_capacity(self.workers.len());
        while let Some(joined) = self.workers.join_next().await {
            match joined {
                Ok((name, result)) => {
                    info!(worker = %name, "Worker stopped");
                    results.push(result);
                }
                Err(e) => warn!(error = %e, "Worker terminated abnormally"),
            }
        }
        results
    }
}

impl<T: Send + 'static> Default for WorkerExecutor<T> {
    fn default() -> Self {
        Self::new()
    }
}
