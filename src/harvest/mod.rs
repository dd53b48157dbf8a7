//! Harvest module - repository discovery, cloning and provenance indexing.
//!
//! This module provides the pipeline stages of the harvester:
//! - **Traits**: [`Discoverer`], [`Cloner`], [`Indexer`] capability interfaces
//! - **Discovery**: platform discoverers in [`discovery`]
//! - **History**: per-file provenance via [`history::CommitHistoryWalker`]
//! - **Pipeline**: the supervisor in [`pipeline::HarvestPipeline`]

pub mod classify;
pub mod cloner;
pub mod codeunit;
pub mod discovery;
pub mod git;
pub mod history;
pub mod indexer;
pub mod pipeline;
pub mod queue;
pub mod traits;

// Re-export commonly used types
pub use traits::{
    CloneError, CloneResult, Cloner, Discoverer, DiscoveryError, HistoryError, IndexError,
    IndexReport, Indexer,
};

pub use classify::{ClassifyResult, FileClassifier};
pub use cloner::GitCloner;
pub use codeunit::{CodeUnitBuilder, RepositoryRefs};
pub use discovery::{BitbucketDiscoverer, GitHubDiscoverer, RankPolicy, SeedDiscoverer};
pub use git::GitHistory;
pub use history::{CommitGraph, CommitHistoryWalker, CommitRecord, FileMetadata, PathChange};
pub use indexer::GitIndexer;
pub use pipeline::{ClonedRepository, HarvestPipeline, HarvestStats, PipelineError, RunningPipeline};
