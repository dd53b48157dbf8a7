//! GitHub discoverer.
//!
//! Walks `GET /repositories?since=<id>` via the `Link: rel="next"` header and
//! ranks each page by stargazer count, looked up in batches through the
//! search API.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, LINK};
use serde::Deserialize;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::client::ApiClient;
use super::RankPolicy;
use crate::config::GitHubConfig;
use crate::harvest::traits::{Discoverer, DiscoveryError};
use crate::model::{Platform, RepositoryDescriptor};

#[derive(Debug, Deserialize)]
struct ListedRepository {
    id: u64,
    full_name: String,
    html_url: String,
    #[serde(default)]
    fork: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    full_name: String,
    stargazers_count: u64,
}

pub struct GitHubDiscoverer {
    client: ApiClient,
    api_url: String,
    /// Pagination cursor; only advanced after a page is fully ranked
    next_url: String,
    ranks: RankPolicy,
    batch_size: usize,
    skip_forks: bool,
}

impl GitHubDiscoverer {
    pub fn new(client: ApiClient, config: &GitHubConfig, default_rank: f64) -> Self {
        let api_url = config.api_url.trim_end_matches('/').to_string();
        Self {
            client,
            next_url: format!("{}/repositories", api_url),
            api_url,
            ranks: RankPolicy::new(config.rank_base, default_rank),
            batch_size: config.popularity_batch_size.max(1),
            skip_forks: config.skip_forks,
        }
    }

    /// Current pagination cursor.
    pub fn cursor(&self) -> &str {
        &self.next_url
    }

    /// Rank given to repositories without a popularity signal.
    pub fn default_rank(&self) -> f64 {
        self.ranks.default_rank
    }

    /// Looks up ranks for `owner/name` repositories.
    ///
    /// Rate limiting and cancellation are propagated; any other lookup
    /// failure leaves the affected batch at the default rank.
    pub async fn lookup_ranks(
        &self,
        names: &[String],
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, f64>, DiscoveryError> {
        let stars = self.lookup_stars(names, cancel).await?;
        Ok(names
            .iter()
            .map(|name| {
                let signal = stars.get(&name.to_lowercase()).copied();
                (name.clone(), self.ranks.rank(signal))
            })
            .collect())
    }

    async fn lookup_stars(
        &self,
        names: &[String],
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, u64>, DiscoveryError> {
        let url = format!("{}/search/repositories", self.api_url);
        let mut stars = HashMap::new();

        for batch in names.chunks(self.batch_size) {
            let query = batch
                .iter()
                .map(|name| format!("repo:{}", name))
                .collect::<Vec<_>>()
                .join(" ");
            let params = [("q", query), ("per_page", batch.len().to_string())];

            match self
                .client
                .get_json::<SearchResponse>(&url, &params, cancel)
                .await
            {
                Ok((response, _)) => {
                    for item in response.items {
                        stars.insert(item.full_name.to_lowercase(), item.stargazers_count);
                    }
                }
                Err(e @ (DiscoveryError::RateLimited { .. } | DiscoveryError::Cancelled)) => {
                    return Err(e)
                }
                Err(e) => {
                    warn!(error = %e, batch = batch.len(), "Star lookup failed; using default rank");
                }
            }
        }
        Ok(stars)
    }

    /// Fetches and ranks the page at the cursor, advancing the cursor only
    /// once the whole page is ranked. Returns the descriptors kept after
    /// filtering and the number of repositories the page listed.
    async fn next_page(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<(Vec<RepositoryDescriptor>, usize), DiscoveryError> {
        let (listed, headers) = self
            .client
            .get_json::<Vec<ListedRepository>>(&self.next_url, &[], cancel)
            .await?;

        let count = listed.len();
        let last_id = listed.last().map(|r| r.id);
        let repositories: Vec<ListedRepository> = listed
            .into_iter()
            .filter(|r| !(self.skip_forks && r.fork))
            .collect();

        let names: Vec<String> = repositories.iter().map(|r| r.full_name.clone()).collect();
        let ranks = self.lookup_ranks(&names, cancel).await?;

        let descriptors = repositories
            .into_iter()
            .map(|r| {
                let rank = ranks
                    .get(&r.full_name)
                    .copied()
                    .unwrap_or(self.ranks.default_rank);
                RepositoryDescriptor::new(r.html_url, r.full_name, Platform::GitHub, rank)
            })
            .collect::<Vec<_>>();

        if let Some(next) = self.following_url(&headers, last_id) {
            debug!(next = %next, "Advancing GitHub cursor");
            self.next_url = next;
        }
        Ok((descriptors, count))
    }

    fn following_url(&self, headers: &HeaderMap, last_id: Option<u64>) -> Option<String> {
        next_link(headers).or_else(|| {
            last_id.map(|id| format!("{}/repositories?since={}", self.api_url, id))
        })
    }
}

#[async_trait]
impl Discoverer for GitHubDiscoverer {
    fn name(&self) -> &str {
        "github"
    }

    async fn produce(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<RepositoryDescriptor>>, DiscoveryError> {
        // Pages made up only of forks are skipped; an empty batch means the
        // listing is caught up.
        loop {
            let (descriptors, listed) = self.next_page(cancel).await?;
            if !descriptors.is_empty() || listed == 0 {
                return Ok(Some(descriptors));
            }
            debug!(listed, next = %self.next_url, "Every repository on page filtered; following next");
        }
    }
}

/// Extracts the `rel="next"` target from an RFC 8288 `Link` header.
pub fn next_link(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let target = target.strip_prefix('<')?.strip_suffix('>')?;
        pieces
            .any(|p| p.trim() == "rel=\"next\"")
            .then(|| target.to_string())
    })
}
