//! [`CommitGraph`] over a local git repository, read through libgit2.

use git2::{Delta, DiffFindOptions, ObjectType, Oid, Repository, TreeWalkMode, TreeWalkResult};
use std::path::Path;

use crate::harvest::history::{CommitGraph, CommitRecord, PathChange};
use crate::harvest::traits::HistoryError;

/// A file tracked at HEAD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedFile {
    pub path: String,
    pub blob: Oid,
}

pub struct GitHistory {
    repo: Repository,
}

impl GitHistory {
    pub fn open(path: &Path) -> Result<Self, HistoryError> {
        Ok(Self {
            repo: Repository::open(path)?,
        })
    }

    /// HEAD commit id, or `None` for a repository without commits.
    pub fn head_commit(&self) -> Result<Option<Oid>, HistoryError> {
        match self.repo.head() {
            Ok(head) => Ok(Some(head.peel_to_commit()?.id())),
            Err(e)
                if e.code() == git2::ErrorCode::UnbornBranch
                    || e.code() == git2::ErrorCode::NotFound =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Short name of the branch HEAD points at.
    pub fn default_branch(&self) -> Option<String> {
        let head = self.repo.head().ok()?;
        if !head.is_branch() {
            return None;
        }
        head.shorthand().map(str::to_string)
    }

    /// Every blob reachable from the tree of `commit`.
    pub fn tracked_files(&self, commit: Oid) -> Result<Vec<TrackedFile>, HistoryError> {
        let tree = self.repo.find_commit(commit)?.tree()?;
        let mut files = Vec::new();
        tree.walk(TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() == Some(ObjectType::Blob) {
                files.push(TrackedFile {
                    path: format!("{}{}", root, String::from_utf8_lossy(entry.name_bytes())),
                    blob: entry.id(),
                });
            }
            TreeWalkResult::Ok
        })?;
        Ok(files)
    }

    pub fn read_blob(&self, blob: Oid) -> Result<Vec<u8>, HistoryError> {
        Ok(self.repo.find_blob(blob)?.content().to_vec())
    }

    fn find_commit(&self, id: &str) -> Result<git2::Commit<'_>, HistoryError> {
        let oid = Oid::from_str(id).map_err(|_| HistoryError::MissingCommit(id.to_string()))?;
        self.repo.find_commit(oid).map_err(|e| {
            if e.code() == git2::ErrorCode::NotFound {
                HistoryError::MissingCommit(id.to_string())
            } else {
                HistoryError::Git(e)
            }
        })
    }
}

impl CommitGraph for GitHistory {
    fn commit(&self, id: &str) -> Result<CommitRecord, HistoryError> {
        let commit = self.find_commit(id)?;
        let author = commit.author();
        Ok(CommitRecord {
            id: id.to_string(),
            author: String::from_utf8_lossy(author.name_bytes()).into_owned(),
            timestamp: commit.time().seconds(),
            parents: commit.parent_ids().map(|p| p.to_string()).collect(),
        })
    }

    fn changes(&self, parent: Option<&str>, commit: &str) -> Result<Vec<PathChange>, HistoryError> {
        let new_tree = self.find_commit(commit)?.tree()?;
        let old_tree = match parent {
            Some(parent) => Some(self.find_commit(parent)?.tree()?),
            None => None,
        };

        let mut diff = self
            .repo
            .diff_tree_to_tree(old_tree.as_ref(), Some(&new_tree), None)?;
        if old_tree.is_some() {
            let mut find = DiffFindOptions::new();
            find.renames(true);
            diff.find_similar(Some(&mut find))?;
        }

        let path_of = |file: git2::DiffFile<'_>| {
            file.path_bytes()
                .map(|p| String::from_utf8_lossy(p).into_owned())
        };

        let mut changes = Vec::new();
        for delta in diff.deltas() {
            let old = path_of(delta.old_file());
            let new = path_of(delta.new_file());
            let change = match (delta.status(), old, new) {
                (Delta::Added | Delta::Copied, _, Some(new)) => PathChange::Added(new),
                (Delta::Deleted, Some(old), _) => PathChange::Deleted(old),
                (Delta::Modified | Delta::Typechange, _, Some(new)) => PathChange::Modified(new),
                (Delta::Renamed, Some(from), Some(to)) => PathChange::Renamed { from, to },
                _ => continue,
            };
            changes.push(change);
        }
        Ok(changes)
    }
}
