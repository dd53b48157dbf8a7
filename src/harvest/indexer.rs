//! Indexer turning a cloned repository into code units.
//!
//! libgit2 is blocking, so each repository is indexed on the blocking pool.
//! The [`ClonedRepository`] moves into that task and its directory is removed
//! when the task ends, whatever the outcome.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Span};

use crate::harvest::classify::{ClassifyResult, FileClassifier};
use crate::harvest::codeunit::{CodeUnitBuilder, RepositoryRefs};
use crate::harvest::git::GitHistory;
use crate::harvest::history::CommitHistoryWalker;
use crate::harvest::pipeline::ClonedRepository;
use crate::harvest::traits::{IndexError, IndexReport, Indexer};

#[derive(Debug, Default, Clone, Copy)]
pub struct GitIndexer {
    classifier: FileClassifier,
}

impl GitIndexer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Indexer for GitIndexer {
    async fn index(
        &self,
        repository: ClonedRepository,
        cancel: &CancellationToken,
    ) -> Result<IndexReport, IndexError> {
        let classifier = self.classifier;
        let cancel = cancel.clone();
        let span = Span::current();

        tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            index_repository(&classifier, &repository, &cancel)
        })
        .await
        .map_err(|e| IndexError::Task(e.to_string()))?
    }
}

fn index_repository(
    classifier: &FileClassifier,
    repository: &ClonedRepository,
    cancel: &CancellationToken,
) -> Result<IndexReport, IndexError> {
    let git = GitHistory::open(repository.path())?;
    let Some(head) = git.head_commit()? else {
        debug!("Repository has no commits");
        return Ok(IndexReport::default());
    };
    let refs = RepositoryRefs {
        default_branch: git.default_branch(),
        head_commit: Some(head.to_string()),
    };

    let mut texts = Vec::new();
    let mut skipped_files = 0;
    for file in git.tracked_files(head)? {
        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }
        match classifier.classify(&git.read_blob(file.blob)?) {
            ClassifyResult::Text(text) => texts.push((file, text)),
            ClassifyResult::Binary => {
                debug!(file = %file.path, "Skipping binary file");
                skipped_files += 1;
            }
            ClassifyResult::DecodeFailed => {
                debug!(file = %file.path, "Skipping undecodable file");
                skipped_files += 1;
            }
        }
    }

    let metadata = CommitHistoryWalker::new(&git).walk(
        &head.to_string(),
        texts
            .iter()
            .map(|(file, _)| (file.path.clone(), file.blob.to_string())),
        cancel,
    )?;

    let builder = CodeUnitBuilder::new(repository.descriptor(), &refs);
    let units = texts
        .into_iter()
        .filter_map(|(file, text)| {
            metadata
                .get(&file.path)
                .map(|meta| builder.build(&file.path, text, meta))
        })
        .collect();

    Ok(IndexReport {
        units,
        skipped_files,
    })
}
