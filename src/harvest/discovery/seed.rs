//! Discoverer for an explicit list of GitHub repositories.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::github::GitHubDiscoverer;
use crate::harvest::traits::{Discoverer, DiscoveryError};
use crate::model::{Platform, RepositoryDescriptor};

/// Emits the seeded `owner/name` repositories once, ranked through the
/// GitHub search API, then finishes.
pub struct SeedDiscoverer {
    names: Option<Vec<String>>,
    github: GitHubDiscoverer,
}

impl SeedDiscoverer {
    pub fn new(names: Vec<String>, github: GitHubDiscoverer) -> Self {
        Self {
            names: Some(names),
            github,
        }
    }
}

#[async_trait]
impl Discoverer for SeedDiscoverer {
    fn name(&self) -> &str {
        "seed"
    }

    async fn produce(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<RepositoryDescriptor>>, DiscoveryError> {
        let Some(names) = self.names.as_ref() else {
            return Ok(None);
        };

        // On error the names are kept so a transient failure can be retried.
        let ranks = self.github.lookup_ranks(names, cancel).await?;
        let names = self.names.take().unwrap_or_default();
        info!(count = names.len(), "Emitting seeded repositories");
        let default_rank = self.github.default_rank();

        Ok(Some(
            names
                .into_iter()
                .map(|name| {
                    let rank = ranks.get(&name).copied().unwrap_or(default_rank);
                    RepositoryDescriptor::new(
                        format!("https://github.com/{}", name),
                        name,
                        Platform::GitHub,
                        rank,
                    )
                })
                .collect(),
        ))
    }
}
