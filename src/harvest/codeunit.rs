//! Assembly of [`CodeUnit`]s from decoded files and their provenance.

use chrono::{DateTime, Utc};

use crate::harvest::history::FileMetadata;
use crate::model::{Author, CodeUnit, Platform, RepositoryDescriptor, Symbols};

/// Repository-level identifiers used for canonical URLs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryRefs {
    pub default_branch: Option<String>,
    pub head_commit: Option<String>,
}

pub struct CodeUnitBuilder<'a> {
    descriptor: &'a RepositoryDescriptor,
    refs: &'a RepositoryRefs,
}

impl<'a> CodeUnitBuilder<'a> {
    pub fn new(descriptor: &'a RepositoryDescriptor, refs: &'a RepositoryRefs) -> Self {
        Self { descriptor, refs }
    }

    pub fn build(&self, path: &str, source_text: String, metadata: &FileMetadata) -> CodeUnit {
        CodeUnit {
            display_name: format!("{}: {}", self.descriptor.name, path),
            source_text,
            file_path: path.to_string(),
            authors: metadata
                .authors
                .iter()
                .map(|name| Author {
                    name: name.clone(),
                    profile_url: None,
                })
                .collect(),
            canonical_url: self.canonical_url(path),
            time_created: timestamp(metadata.time_created),
            time_last_modified: timestamp(metadata.time_last_modified),
            rank: self.descriptor.rank,
            symbols: Symbols::new(),
        }
    }

    /// Browseable URL of `path`, or `None` when the branch or commit the
    /// platform needs is unknown.
    pub fn canonical_url(&self, path: &str) -> Option<String> {
        let (segment, reference) = match self.descriptor.platform {
            Platform::GitHub => ("blob", self.refs.default_branch.as_deref()?),
            Platform::Bitbucket => ("src", self.refs.head_commit.as_deref()?),
        };
        Some(format!(
            "{}/{}/{}/{}",
            self.descriptor.url.trim_end_matches('/'),
            segment,
            reference.trim_matches('/'),
            path.trim_start_matches('/')
        ))
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}
