//! Helpers for building small git repositories in tests.

#![allow(dead_code)]

use git2::{Oid, Repository, Signature, Time};
use std::path::Path;

pub fn init_bare(path: &Path) -> Repository {
    Repository::init_bare(path).unwrap()
}

/// Writes a commit whose tree holds exactly `files`, without touching HEAD.
pub fn commit(
    repo: &Repository,
    author: &str,
    time: i64,
    files: &[(&str, &str)],
    parents: &[Oid],
) -> Oid {
    let mut builder = repo.treebuilder(None).unwrap();
    for (name, content) in files {
        let blob = repo.blob(content.as_bytes()).unwrap();
        builder.insert(*name, blob, 0o100644).unwrap();
    }
    let tree = repo.find_tree(builder.write().unwrap()).unwrap();
    let sig = Signature::new(author, "dev@example.com", &Time::new(time, 0)).unwrap();
    let parents: Vec<git2::Commit<'_>> = parents
        .iter()
        .map(|p| repo.find_commit(*p).unwrap())
        .collect();
    let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();
    repo.commit(None, &sig, &sig, "commit", &tree, &parent_refs)
        .unwrap()
}

/// Points `refs/heads/<branch>` and HEAD at `commit`.
pub fn set_head(repo: &Repository, branch: &str, commit: Oid) {
    let name = format!("refs/heads/{}", branch);
    repo.reference(&name, commit, true, "test").unwrap();
    repo.set_head(&name).unwrap();
}

pub fn git_available() -> bool {
    std::process::Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
