//! Per-file provenance from a repository's commit graph.
//!
//! The walker starts at HEAD and follows parent links with an explicit
//! work-list of `(commit, path map)` items. A path map projects the paths of
//! one commit onto the HEAD files they became; renames rewrite it and every
//! parent gets its own copy, so branches of a merge never share one.
//!
//! Every update applied to [`FileMetadata`] is a set insert, a max or a min,
//! which makes revisiting a commit through a second merge path harmless.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::harvest::traits::HistoryError;

/// Maps a path at some commit to the HEAD path it ends up as.
pub type PathMap = BTreeMap<String, String>;

/// One commit of the graph, without its changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub id: String,
    pub author: String,
    /// Unix seconds
    pub timestamp: i64,
    pub parents: Vec<String>,
}

/// A path changed between a parent and its child commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathChange {
    Added(String),
    Modified(String),
    Deleted(String),
    Renamed { from: String, to: String },
}

impl PathChange {
    /// Path on the child side, if the path still exists there.
    pub fn child_path(&self) -> Option<&str> {
        match self {
            PathChange::Added(p) | PathChange::Modified(p) => Some(p),
            PathChange::Renamed { to, .. } => Some(to),
            PathChange::Deleted(_) => None,
        }
    }
}

/// Read access to a commit graph.
pub trait CommitGraph {
    fn commit(&self, id: &str) -> Result<CommitRecord, HistoryError>;

    /// Changes turning `parent` into `commit`; a root commit is diffed
    /// against the empty tree, so every file shows up as added.
    fn changes(&self, parent: Option<&str>, commit: &str) -> Result<Vec<PathChange>, HistoryError>;
}

/// Provenance of one file at HEAD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub authors: BTreeSet<String>,
    /// Unix seconds; 0 until a creating commit is seen
    pub time_created: i64,
    pub time_last_modified: i64,
    /// HEAD blob id
    pub blob_ref: String,
}

impl FileMetadata {
    fn new(blob_ref: String) -> Self {
        Self {
            authors: BTreeSet::new(),
            time_created: 0,
            time_last_modified: 0,
            blob_ref,
        }
    }

    fn credit(&mut self, commit: &CommitRecord, created: bool) {
        self.authors.insert(commit.author.clone());
        self.time_last_modified = self.time_last_modified.max(commit.timestamp);
        if created {
            // The earliest creation event wins; a file deleted and re-added
            // keeps its first creation time.
            self.time_created = if self.time_created == 0 {
                commit.timestamp
            } else {
                self.time_created.min(commit.timestamp)
            };
        }
    }
}

pub struct CommitHistoryWalker<'g, G: CommitGraph + ?Sized> {
    graph: &'g G,
}

impl<'g, G: CommitGraph + ?Sized> CommitHistoryWalker<'g, G> {
    pub fn new(graph: &'g G) -> Self {
        Self { graph }
    }

    /// Builds metadata for `files`, given as `(HEAD path, blob id)` pairs.
    pub fn walk<I>(
        &self,
        head: &str,
        files: I,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, FileMetadata>, HistoryError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut metadata: BTreeMap<String, FileMetadata> = files
            .into_iter()
            .map(|(path, blob)| (path, FileMetadata::new(blob)))
            .collect();
        let identity: PathMap = metadata.keys().map(|p| (p.clone(), p.clone())).collect();

        let mut work = vec![(head.to_string(), identity)];
        let mut visited = HashSet::new();
        let mut visits = 0usize;

        while let Some((id, paths)) = work.pop() {
            if cancel.is_cancelled() {
                return Err(HistoryError::Cancelled);
            }
            if paths.is_empty() || !visited.insert((id.clone(), paths.clone())) {
                continue;
            }
            visits += 1;

            let commit = self.graph.commit(&id)?;
            if commit.parents.is_empty() {
                let changes = self.graph.changes(None, &id)?;
                credit_changes(&mut metadata, &commit, &paths, &[changes]);
                continue;
            }

            let mut per_parent = Vec::with_capacity(commit.parents.len());
            for parent in &commit.parents {
                per_parent.push(self.graph.changes(Some(parent), &id)?);
            }
            credit_changes(&mut metadata, &commit, &paths, &per_parent);

            for (parent, changes) in commit.parents.iter().zip(&per_parent) {
                work.push((parent.clone(), parent_paths(&paths, changes)));
            }
        }

        debug!(files = metadata.len(), visits, "History walk finished");
        Ok(metadata)
    }
}

/// Credits `commit` for every tracked path it changed relative to all of its
/// parents. A merge that took a file unchanged from one side is not credited.
fn credit_changes(
    metadata: &mut BTreeMap<String, FileMetadata>,
    commit: &CommitRecord,
    paths: &PathMap,
    per_parent: &[Vec<PathChange>],
) {
    let Some((first, rest)) = per_parent.split_first() else {
        return;
    };

    for change in first {
        let Some(path) = change.child_path() else {
            continue;
        };
        let Some(current) = paths.get(path) else {
            continue;
        };

        let mut created = matches!(change, PathChange::Added(_));
        let changed_everywhere = rest.iter().all(|changes| {
            changes.iter().any(|c| match c.child_path() {
                Some(p) if p == path => {
                    created &= matches!(c, PathChange::Added(_));
                    true
                }
                _ => false,
            })
        });

        if changed_everywhere {
            if let Some(meta) = metadata.get_mut(current) {
                meta.credit(commit, created);
            }
        }
    }
}

/// Path map for a parent: added and deleted paths drop out, renamed paths
/// resolve under their old name.
fn parent_paths(paths: &PathMap, changes: &[PathChange]) -> PathMap {
    let mut next = paths.clone();
    let mut renamed = Vec::new();

    for change in changes {
        match change {
            PathChange::Added(p) | PathChange::Deleted(p) => {
                next.remove(p);
            }
            PathChange::Renamed { from, to } => {
                next.remove(to);
                if let Some(current) = paths.get(to) {
                    renamed.push((from.clone(), current.clone()));
                }
            }
            PathChange::Modified(_) => {}
        }
    }
    // Inserted last so that swapped names (a -> b, b -> a) resolve correctly.
    next.extend(renamed);
    next
}
