use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Hosting platform a repository was discovered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    GitHub,
    Bitbucket,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::GitHub => f.write_str("GitHub"),
            Platform::Bitbucket => f.write_str("Bitbucket"),
        }
    }
}

/// Identifying metadata for a discovered repository, prior to cloning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryDescriptor {
    pub url: String,
    pub name: String, // e.g., "owner/project"
    pub platform: Platform,
    /// Popularity score, always within [0, 1]
    pub rank: f64,
    /// Filled in by the cloner once the repository is on disk
    pub local_path: Option<PathBuf>,
}

impl RepositoryDescriptor {
    pub fn new(
        url: impl Into<String>,
        name: impl Into<String>,
        platform: Platform,
        rank: f64,
    ) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            platform,
            rank: if rank.is_nan() { 0.0 } else { rank.clamp(0.0, 1.0) },
            local_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub profile_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub kind: String, // e.g., "function", "class"
    pub line: u32,
    pub column: u32,
}

/// Symbol name -> occurrences. Populated by the external parser.
pub type Symbols = BTreeMap<String, Vec<Symbol>>;

/// Indexable representation of one file: source, provenance, and location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeUnit {
    pub display_name: String,
    pub source_text: String,
    pub file_path: String,
    pub authors: Vec<Author>,
    pub canonical_url: Option<String>,
    pub time_created: DateTime<Utc>,
    pub time_last_modified: DateTime<Utc>,
    pub rank: f64,
    #[serde(default)]
    pub symbols: Symbols,
}
