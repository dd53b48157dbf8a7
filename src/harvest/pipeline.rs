//! Harvest pipeline supervisor.
//!
//! This module provides the [`HarvestPipeline`] coordinator that wires the
//! harvest stages (Discoverer → Cloner → Indexer → Parser → Database) with:
//! - Two bounded queues providing backpressure (clone-queue, index-queue)
//! - Independent `tokio` worker tasks per stage instance
//! - Cooperative cancellation through a shared [`CancellationToken`]
//! - Structured logging via `tracing`
//! - Automatic cleanup of clones via RAII (`Drop` on [`ClonedRepository`])

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::HarvesterConfig;
use crate::executor::WorkerExecutor;
use crate::harvest::queue::{self, QueueReceiver, QueueSender};
use crate::harvest::traits::{
    CloneResult, Cloner, Discoverer, DiscoveryError, HistoryError, IndexError, Indexer,
};
use crate::model::RepositoryDescriptor;
use crate::traits::{Database, Parser};

/// Marks a clone root as owned by the harvester, allowing it to be swept.
const CLONE_ROOT_MARKER: &str = ".repo-harvester";

// ============================================================================
// Pipeline Types
// ============================================================================

/// A repository materialized on local disk.
///
/// # RAII Cleanup
///
/// `ClonedRepository` implements [`Drop`] to ensure the clone directory is
/// always removed: after indexing, on an indexing error, on panic, and when
/// the item is still sitting in a queue at shutdown. Because of this it does
/// **not** implement `Clone`.
#[derive(Debug)]
pub struct ClonedRepository {
    descriptor: RepositoryDescriptor,
    path: PathBuf,
    cleanup_on_drop: bool,
}

impl ClonedRepository {
    /// Takes ownership of `path`, recording it as the descriptor's local path.
    pub fn new(mut descriptor: RepositoryDescriptor, path: PathBuf) -> Self {
        descriptor.local_path = Some(path.clone());
        Self {
            descriptor,
            path,
            cleanup_on_drop: true,
        }
    }

    pub fn descriptor(&self) -> &RepositoryDescriptor {
        &self.descriptor
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ClonedRepository {
    fn drop(&mut self) {
        if self.cleanup_on_drop && self.path.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to remove clone directory"
                );
            }
        }
    }
}

/// Counters reported by each worker and summed by the supervisor.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HarvestStats {
    pub discovered: u64,
    pub cloned: u64,
    pub clone_failures: u64,
    pub clone_timeouts: u64,
    pub repositories_indexed: u64,
    pub index_failures: u64,
    pub units_inserted: u64,
    pub insert_failures: u64,
    pub files_skipped: u64,
    pub parse_failures: u64,

    /// Wall-clock time the pipeline ran (milliseconds)
    pub total_duration_ms: u64,
}

impl HarvestStats {
    fn absorb(&mut self, other: &HarvestStats) {
        self.discovered += other.discovered;
        self.cloned += other.cloned;
        self.clone_failures += other.clone_failures;
        self.clone_timeouts += other.clone_timeouts;
        self.repositories_indexed += other.repositories_indexed;
        self.index_failures += other.index_failures;
        self.units_inserted += other.units_inserted;
        self.insert_failures += other.insert_failures;
        self.files_skipped += other.files_skipped;
        self.parse_failures += other.parse_failures;
    }
}

// ============================================================================
// Pipeline Errors
// ============================================================================

/// Fatal errors; only raised before any worker starts.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("Queue '{queue}' must have a non-zero capacity")]
    InvalidCapacity { queue: &'static str },

    #[error("At least one {stage} worker is required")]
    NoWorkers { stage: &'static str },

    #[error("Clone root '{path}' is not empty and is not owned by the harvester")]
    ForeignCloneRoot { path: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Pipeline Supervisor
// ============================================================================

/// Harvest pipeline supervisor.
///
/// Owns the clone-queue and index-queue, the cancellation signal, and the
/// worker set. Startup order is queues first, then workers. When every
/// discoverer finishes, the queues close behind them and the pipeline drains
/// to completion; [`RunningPipeline::shutdown`] stops it early.
///
/// # Example
///
/// ```ignore
/// let running = HarvestPipeline::new(cloner, indexer, parser, database)
///     .with_discoverer(Box::new(github))
///     .with_queue_capacities(5000, 10)
///     .with_clone_root(PathBuf::from("/tmp/harvest"))
///     .start()?;
///
/// tokio::signal::ctrl_c().await?;
/// let stats = running.shutdown().await;
/// ```
pub struct HarvestPipeline {
    discoverers: Vec<Box<dyn Discoverer>>,
    cloner: Arc<dyn Cloner>,
    indexer: Arc<dyn Indexer>,
    parser: Arc<dyn Parser>,
    database: Arc<dyn Database>,

    clone_queue_capacity: usize,
    index_queue_capacity: usize,
    cloners: usize,
    indexers: usize,

    /// Delay before retrying a transient discovery failure
    retry_delay: Duration,

    /// Delay before polling a discoverer that had nothing new
    poll_interval: Duration,

    /// Harvester-owned directory swept at startup and after shutdown
    clone_root: Option<PathBuf>,

    cancel: CancellationToken,
}

impl HarvestPipeline {
    /// Creates a pipeline with no discoverers.
    ///
    /// Default configuration:
    /// - Queues: 5000 (clone), 10 (index)
    /// - One cloner, one indexer
    /// - Retry delay 5s, poll interval 60s
    pub fn new(
        cloner: Arc<dyn Cloner>,
        indexer: Arc<dyn Indexer>,
        parser: Arc<dyn Parser>,
        database: Arc<dyn Database>,
    ) -> Self {
        Self {
            discoverers: Vec::new(),
            cloner,
            indexer,
            parser,
            database,
            clone_queue_capacity: 5000,
            index_queue_capacity: 10,
            cloners: 1,
            indexers: 1,
            retry_delay: Duration::from_secs(5),
            poll_interval: Duration::from_secs(60),
            clone_root: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Applies queue, worker, timing and clone-root settings from `config`.
    pub fn with_config(self, config: &HarvesterConfig) -> Self {
        self.with_queue_capacities(config.clone_queue_capacity, config.index_queue_capacity)
            .with_workers(config.cloners, config.indexers)
            .with_retry_delay(config.retry_delay())
            .with_poll_interval(config.poll_interval())
            .with_clone_root(config.clone_root.clone())
    }

    pub fn with_discoverer(mut self, discoverer: Box<dyn Discoverer>) -> Self {
        self.discoverers.push(discoverer);
        self
    }

    pub fn with_queue_capacities(mut self, clone_queue: usize, index_queue: usize) -> Self {
        self.clone_queue_capacity = clone_queue;
        self.index_queue_capacity = index_queue;
        self
    }

    pub fn with_workers(mut self, cloners: usize, indexers: usize) -> Self {
        self.cloners = cloners;
        self.indexers = indexers;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_clone_root(mut self, root: PathBuf) -> Self {
        self.clone_root = Some(root);
        self
    }

    /// Token shared by every worker; cancelling it stops the pipeline.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Creates the queues and spawns every worker.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if a queue capacity or worker count is zero,
    /// or if the clone root cannot be prepared.
    pub fn start(self) -> Result<RunningPipeline, PipelineError> {
        if self.clone_queue_capacity == 0 {
            return Err(PipelineError::InvalidCapacity {
                queue: "clone-queue",
            });
        }
        if self.index_queue_capacity == 0 {
            return Err(PipelineError::InvalidCapacity {
                queue: "index-queue",
            });
        }
        if self.cloners == 0 {
            return Err(PipelineError::NoWorkers { stage: "cloner" });
        }
        if self.indexers == 0 {
            return Err(PipelineError::NoWorkers { stage: "indexer" });
        }
        if let Some(root) = &self.clone_root {
            prepare_clone_root(root)?;
        }

        // ====================================================================
        // Queues
        // ====================================================================

        let (clone_tx, clone_rx) = queue::bounded(self.clone_queue_capacity);
        let (index_tx, index_rx) = queue::bounded(self.index_queue_capacity);

        info!(
            clone_queue = self.clone_queue_capacity,
            index_queue = self.index_queue_capacity,
            discoverers = self.discoverers.len(),
            cloners = self.cloners,
            indexers = self.indexers,
            "Starting harvest pipeline"
        );

        // ====================================================================
        // Workers
        // ====================================================================
        //
        // Each sender handle lives only inside the workers feeding that queue,
        // so a queue closes once all of its producers have stopped.

        let mut executor = WorkerExecutor::new();

        for (i, discoverer) in self.discoverers.into_iter().enumerate() {
            let name = format!("discoverer-{}-{}", i, discoverer.name());
            executor.spawn(
                name,
                run_discoverer(
                    discoverer,
                    clone_tx.clone(),
                    self.cancel.clone(),
                    self.retry_delay,
                    self.poll_interval,
                ),
            );
        }
        drop(clone_tx);

        for i in 0..self.cloners {
            executor.spawn(
                format!("cloner-{}", i),
                run_cloner(
                    Arc::clone(&self.cloner),
                    clone_rx.clone(),
                    index_tx.clone(),
                    self.cancel.clone(),
                ),
            );
        }
        drop(clone_rx);
        drop(index_tx);

        for i in 0..self.indexers {
            executor.spawn(
                format!("indexer-{}", i),
                run_indexer(
                    Arc::clone(&self.indexer),
                    Arc::clone(&self.parser),
                    Arc::clone(&self.database),
                    index_rx.clone(),
                    self.cancel.clone(),
                ),
            );
        }
        drop(index_rx);

        Ok(RunningPipeline {
            executor,
            cancel: self.cancel,
            clone_root: self.clone_root,
            started: Instant::now(),
        })
    }
}

/// Handle to a started pipeline.
pub struct RunningPipeline {
    executor: WorkerExecutor<HarvestStats>,
    cancel: CancellationToken,
    clone_root: Option<PathBuf>,
    started: Instant,
}

impl RunningPipeline {
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Requests cancellation and waits for every worker to stop.
    pub async fn shutdown(self) -> HarvestStats {
        info!("Shutdown requested");
        self.cancel.cancel();
        self.wait().await
    }

    /// Waits for every worker to stop, either because the pipeline drained
    /// or because cancellation was requested elsewhere.
    pub async fn wait(self) -> HarvestStats {
        let mut stats = HarvestStats::default();
        for worker_stats in self.executor.join_all().await {
            stats.absorb(&worker_stats);
        }
        stats.total_duration_ms = self.started.elapsed().as_millis() as u64;

        if let Some(root) = &self.clone_root {
            match sweep_clone_root(root) {
                Ok(0) => {}
                Ok(removed) => info!(removed, "Removed leftover clone directories"),
                Err(e) => warn!(error = %e, "Failed to sweep clone root"),
            }
        }

        info!(
            duration_ms = stats.total_duration_ms,
            discovered = stats.discovered,
            cloned = stats.cloned,
            indexed = stats.repositories_indexed,
            units = stats.units_inserted,
            "Harvest pipeline stopped"
        );
        stats
    }
}

// ============================================================================
// Workers
// ============================================================================

/// Sleeps for `duration`; returns `false` if cancelled first.
pub(crate) async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

async fn run_discoverer(
    mut discoverer: Box<dyn Discoverer>,
    clone_queue: QueueSender<RepositoryDescriptor>,
    cancel: CancellationToken,
    retry_delay: Duration,
    poll_interval: Duration,
) -> HarvestStats {
    let mut stats = HarvestStats::default();

    while !cancel.is_cancelled() {
        match discoverer.produce(&cancel).await {
            Ok(Some(batch)) if batch.is_empty() => {
                debug!("No new repositories; waiting before next poll");
                if !sleep_or_cancel(poll_interval, &cancel).await {
                    break;
                }
            }
            Ok(Some(batch)) => {
                debug!(count = batch.len(), "Discovered repositories");
                for descriptor in batch {
                    if clone_queue.send(descriptor, &cancel).await.is_err() {
                        return stats;
                    }
                    stats.discovered += 1;
                }
            }
            Ok(None) => {
                info!("Discoverer exhausted");
                break;
            }
            Err(DiscoveryError::Cancelled) => break,
            Err(DiscoveryError::RateLimited { reset_at }) => {
                // The platform client waits for the reset before its next request.
                info!(reset_at, "Rate limit exhausted");
            }
            Err(e) if e.is_transient() => {
                warn!(error = %e, retry_in_secs = retry_delay.as_secs(), "Discovery request failed; retrying");
                if !sleep_or_cancel(retry_delay, &cancel).await {
                    break;
                }
            }
            Err(e) => {
                error!(error = %e, "Discoverer failed permanently");
                break;
            }
        }
    }
    stats
}

async fn run_cloner(
    cloner: Arc<dyn Cloner>,
    clone_queue: QueueReceiver<RepositoryDescriptor>,
    index_queue: QueueSender<ClonedRepository>,
    cancel: CancellationToken,
) -> HarvestStats {
    let mut stats = HarvestStats::default();

    while let Some(descriptor) = clone_queue.recv(&cancel).await {
        let name = descriptor.name.clone();
        match cloner.clone_repository(descriptor, &cancel).await {
            CloneResult::Cloned(repository) => {
                stats.cloned += 1;
                // A cancelled send drops the clone, removing its directory.
                if index_queue.send(repository, &cancel).await.is_err() {
                    break;
                }
            }
            CloneResult::Timeout { after } => {
                warn!(repo = %name, timeout_secs = after.as_secs(), "Clone timed out; discarding");
                stats.clone_timeouts += 1;
            }
            CloneResult::Failed(e) => {
                warn!(repo = %name, error = %e, "Clone failed; discarding");
                stats.clone_failures += 1;
            }
            CloneResult::Cancelled => break,
        }
    }
    stats
}

async fn run_indexer(
    indexer: Arc<dyn Indexer>,
    parser: Arc<dyn Parser>,
    database: Arc<dyn Database>,
    index_queue: QueueReceiver<ClonedRepository>,
    cancel: CancellationToken,
) -> HarvestStats {
    let mut stats = HarvestStats::default();

    while let Some(repository) = index_queue.recv(&cancel).await {
        let span = info_span!("index", repo = %repository.descriptor().name);
        index_one(
            &*indexer,
            &*parser,
            &*database,
            repository,
            &cancel,
            &mut stats,
        )
        .instrument(span)
        .await;
    }
    stats
}

async fn index_one(
    indexer: &dyn Indexer,
    parser: &dyn Parser,
    database: &dyn Database,
    repository: ClonedRepository,
    cancel: &CancellationToken,
    stats: &mut HarvestStats,
) {
    let start = Instant::now();
    let report = match indexer.index(repository, cancel).await {
        Ok(report) => report,
        Err(IndexError::Cancelled) | Err(IndexError::History(HistoryError::Cancelled)) => {
            info!("Indexing cancelled; discarding partial work");
            return;
        }
        Err(e) => {
            warn!(error = %e, "Indexing failed; discarding repository");
            stats.index_failures += 1;
            return;
        }
    };
    stats.files_skipped += report.skipped_files as u64;

    let total = report.units.len();
    for mut unit in report.units {
        if cancel.is_cancelled() {
            info!("Indexing cancelled; discarding remaining units");
            return;
        }
        if let Err(e) = parser.parse(&mut unit).await {
            // Units are stored without symbols when parsing fails.
            debug!(file = %unit.file_path, error = %e, "No symbols extracted");
            unit.symbols.clear();
            stats.parse_failures += 1;
        }
        match database.insert(unit).await {
            Ok(()) => stats.units_inserted += 1,
            Err(e) => {
                warn!(error = %e, "Failed to store code unit");
                stats.insert_failures += 1;
            }
        }
    }

    stats.repositories_indexed += 1;
    info!(
        units = total,
        skipped_files = report.skipped_files,
        duration_ms = start.elapsed().as_millis() as u64,
        "Repository indexed"
    );
}

// ============================================================================
// Clone Root
// ============================================================================

fn prepare_clone_root(root: &Path) -> Result<(), PipelineError> {
    std::fs::create_dir_all(root)?;
    let marker = root.join(CLONE_ROOT_MARKER);
    if !marker.exists() {
        if std::fs::read_dir(root)?.next().is_some() {
            return Err(PipelineError::ForeignCloneRoot {
                path: root.display().to_string(),
            });
        }
        std::fs::write(&marker, b"")?;
    }

    let removed = sweep_clone_root(root)?;
    if removed > 0 {
        info!(removed, "Removed clone directories left by a previous run");
    }
    Ok(())
}

/// Removes every entry of a harvester-owned clone root except the marker.
fn sweep_clone_root(root: &Path) -> std::io::Result<usize> {
    if !root.join(CLONE_ROOT_MARKER).exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_name() == CLONE_ROOT_MARKER {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
        removed += 1;
    }
    Ok(removed)
}

// ============================================================================
// Tests
// ============================================================================
