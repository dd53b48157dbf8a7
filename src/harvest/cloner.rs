//! Cloner backed by the `git` command line.
//!
//! Each repository is cloned bare, single-branch, into a fresh directory
//! under the clone root. The child process is killed when the clone times
//! out or the pipeline is cancelled, and any partial directory is removed.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::HarvesterConfig;
use crate::harvest::pipeline::ClonedRepository;
use crate::harvest::traits::{CloneError, CloneResult, Cloner};
use crate::model::RepositoryDescriptor;

enum Attempt {
    Done,
    Spawn(std::io::Error),
    Exit { code: Option<i32>, stderr: String },
    Timeout,
    Cancelled,
}

pub struct GitCloner {
    clone_root: PathBuf,
    timeout: Duration,
    /// Extra attempts when the git process cannot be started
    spawn_retries: u32,
    git: PathBuf,
}

impl GitCloner {
    pub fn new(clone_root: PathBuf, timeout: Duration) -> Self {
        Self {
            clone_root,
            timeout,
            spawn_retries: 2,
            git: PathBuf::from("git"),
        }
    }

    pub fn from_config(config: &HarvesterConfig) -> Self {
        Self::new(config.clone_root.clone(), config.clone_timeout())
            .with_spawn_retries(config.clone_spawn_retries)
    }

    pub fn with_spawn_retries(mut self, retries: u32) -> Self {
        self.spawn_retries = retries;
        self
    }

    /// Overrides the git executable.
    pub fn with_git_binary(mut self, git: impl Into<PathBuf>) -> Self {
        self.git = git.into();
        self
    }

    fn claim_target(&self, name: &str) -> std::io::Result<PathBuf> {
        let millis = chrono::Utc::now().timestamp_millis();
        claim_clone_dir(&self.clone_root, name, millis)
    }

    async fn run_git(&self, url: &str, target: &Path, cancel: &CancellationToken) -> Attempt {
        let child = Command::new(&self.git)
            .args(["clone", "--bare", "--single-branch", "--quiet", "--", url])
            .arg(target)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(e) => return Attempt::Spawn(e),
        };

        // Dropping the output future kills the child.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Attempt::Cancelled,
            finished = tokio::time::timeout(self.timeout, child.wait_with_output()) => match finished {
                Err(_) => Attempt::Timeout,
                Ok(Err(e)) => Attempt::Exit { code: None, stderr: e.to_string() },
                Ok(Ok(output)) if output.status.success() => Attempt::Done,
                Ok(Ok(output)) => Attempt::Exit {
                    code: output.status.code(),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                },
            },
        }
    }
}

#[async_trait]
impl Cloner for GitCloner {
    async fn clone_repository(
        &self,
        descriptor: RepositoryDescriptor,
        cancel: &CancellationToken,
    ) -> CloneResult {
        if cancel.is_cancelled() {
            return CloneResult::Cancelled;
        }
        if let Err(e) = tokio::fs::create_dir_all(&self.clone_root).await {
            return CloneResult::Failed(CloneError::Directory(e));
        }

        let mut retries = 0;
        loop {
            // git clones into an existing directory as long as it is empty.
            let target = match self.claim_target(&descriptor.name) {
                Ok(target) => target,
                Err(e) => return CloneResult::Failed(CloneError::Directory(e)),
            };
            debug!(repo = %descriptor.name, path = %target.display(), "Cloning");
            let attempt = self.run_git(&descriptor.url, &target, cancel).await;
            if !matches!(attempt, Attempt::Done) {
                discard(&target);
            }
            match attempt {
                Attempt::Done => {
                    return CloneResult::Cloned(ClonedRepository::new(descriptor, target))
                }
                Attempt::Spawn(e) if retries < self.spawn_retries => {
                    retries += 1;
                    warn!(repo = %descriptor.name, error = %e, attempt = retries, "Failed to start git; retrying");
                }
                Attempt::Spawn(e) => return CloneResult::Failed(CloneError::Spawn(e)),
                Attempt::Exit { code, stderr } => {
                    return CloneResult::Failed(CloneError::Exit { code, stderr })
                }
                Attempt::Timeout => {
                    return CloneResult::Timeout {
                        after: self.timeout,
                    }
                }
                Attempt::Cancelled => return CloneResult::Cancelled,
            }
        }
    }
}

/// Creates `<root>/<owner-name>-<millis>`, suffixed with a counter if that
/// path is already taken. Creation is the claim, so concurrent cloners never
/// share a directory.
fn claim_clone_dir(root: &Path, name: &str, millis: i64) -> std::io::Result<PathBuf> {
    let base = format!("{}-{}", name.replace('/', "-"), millis);
    let mut candidate = root.join(&base);
    let mut n = 1;
    loop {
        match std::fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                candidate = root.join(format!("{}-{}", base, n));
                n += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn discard(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_dir_all(path) {
            warn!(path = %path.display(), error = %e, "Failed to remove partial clone");
        }
    }
}
