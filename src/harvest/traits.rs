//! Core traits and types for the harvest pipeline.
//!
//! Each pipeline stage is a small capability interface that a worker task is
//! parameterized by:
//! - [`Discoverer`]: polls a hosting platform and produces repository descriptors
//! - [`Cloner`]: materializes one repository on local disk
//! - [`Indexer`]: turns one cloned repository into code units
//!
//! Stage failures are typed values; no stage failure terminates a worker.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::harvest::pipeline::ClonedRepository;
use crate::model::{CodeUnit, RepositoryDescriptor};

// ============================================================================
// Stage Traits
// ============================================================================

/// Long-running producer of repository descriptors for one platform.
///
/// Implementations keep their own pagination cursor and only advance it after
/// a page was fetched successfully, so a transient failure never skips
/// repositories.
#[async_trait]
pub trait Discoverer: Send {
    /// Human-readable name used for logging.
    fn name(&self) -> &str;

    /// Fetches the next page of descriptors.
    ///
    /// Returns `Ok(None)` once the source is permanently exhausted. An empty
    /// batch means the listing is caught up; pages emptied only by filtering
    /// are followed inside `produce`. The caller waits before polling again.
    async fn produce(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<RepositoryDescriptor>>, DiscoveryError>;
}

/// Materializes a repository on local disk.
#[async_trait]
pub trait Cloner: Send + Sync {
    async fn clone_repository(
        &self,
        descriptor: RepositoryDescriptor,
        cancel: &CancellationToken,
    ) -> CloneResult;
}

/// Builds the code units of one cloned repository.
///
/// The indexer takes ownership of the clone; the clone directory is removed
/// when the [`ClonedRepository`] is dropped, on success or failure.
#[async_trait]
pub trait Indexer: Send + Sync {
    async fn index(
        &self,
        repository: ClonedRepository,
        cancel: &CancellationToken,
    ) -> Result<IndexReport, IndexError>;
}

// ============================================================================
// Stage Outcomes
// ============================================================================

/// Outcome of one clone attempt.
#[derive(Debug)]
pub enum CloneResult {
    Cloned(ClonedRepository),
    Timeout { after: Duration },
    Failed(CloneError),
    Cancelled,
}

/// Code units built from one repository.
#[derive(Debug, Default)]
pub struct IndexReport {
    pub units: Vec<CodeUnit>,

    /// Files present at HEAD that were binary or could not be decoded
    pub skipped_files: usize,
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while polling a hosting platform.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// Connection-level failure; retried after a fixed delay
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Unexpected HTTP status
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// Quota exhausted; requests resume after `reset_at` (unix seconds)
    #[error("Rate limit exhausted until {reset_at}")]
    RateLimited { reset_at: i64 },

    /// Response body did not have the expected shape
    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Discovery cancelled")]
    Cancelled,
}

impl DiscoveryError {
    /// Whether the request should simply be retried after the retry delay.
    pub fn is_transient(&self) -> bool {
        match self {
            DiscoveryError::Transport(_) => true,
            DiscoveryError::Status { status, .. } => *status >= 500,
            // The same page would decode the same way on every retry.
            DiscoveryError::Decode(_)
            | DiscoveryError::RateLimited { .. }
            | DiscoveryError::Cancelled => false,
        }
    }
}

/// Errors raised by a clone attempt.
#[derive(Error, Debug)]
pub enum CloneError {
    /// The clone process could not be started
    #[error("Failed to spawn git: {0}")]
    Spawn(std::io::Error),

    /// The clone process exited unsuccessfully
    #[error("git clone exited with {code:?}: {stderr}")]
    Exit { code: Option<i32>, stderr: String },

    /// The clone directory could not be prepared
    #[error("Failed to prepare clone directory: {0}")]
    Directory(std::io::Error),
}

/// Errors raised while reading a repository's commit graph.
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Commit not found: {0}")]
    MissingCommit(String),

    #[error("History walk cancelled")]
    Cancelled,
}

/// Errors raised while indexing one repository.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("Indexing task failed: {0}")]
    Task(String),

    #[error("Indexing cancelled")]
    Cancelled,
}

impl From<git2::Error> for IndexError {
    fn from(e: git2::Error) -> Self {
        IndexError::History(HistoryError::Git(e))
    }
}
