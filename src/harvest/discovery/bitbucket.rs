//! Bitbucket discoverer.
//!
//! Walks `GET /repositories?pagelen=N` following the JSON `next` field and
//! ranks git repositories by watcher count.

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::client::ApiClient;
use super::RankPolicy;
use crate::config::BitbucketConfig;
use crate::harvest::traits::{Discoverer, DiscoveryError};
use crate::model::{Platform, RepositoryDescriptor};

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    values: Vec<ListedRepository>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListedRepository {
    full_name: String,
    scm: String,
    links: Links,
    created_on: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Links {
    html: Link,
    watchers: Option<Link>,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
}

#[derive(Debug, Deserialize)]
struct Watchers {
    size: u64,
}

pub struct BitbucketDiscoverer {
    client: ApiClient,
    listing_url: String,
    next_url: String,
    /// `created_on` of the newest repository seen, resumed from when a
    /// listing runs out of `next` links
    last_created: Option<String>,
    ranks: RankPolicy,
    page_length: usize,
    concurrency: usize,
}

impl BitbucketDiscoverer {
    pub fn new(client: ApiClient, config: &BitbucketConfig, default_rank: f64) -> Self {
        let listing_url = format!("{}/repositories", config.api_url.trim_end_matches('/'));
        Self {
            client,
            next_url: listing_url.clone(),
            listing_url,
            last_created: None,
            ranks: RankPolicy::new(config.rank_base, default_rank),
            page_length: config.page_length.max(1) as usize,
            concurrency: config.popularity_concurrency.max(1),
        }
    }

    pub fn cursor(&self) -> &str {
        &self.next_url
    }

    /// Watcher count behind `href`.
    ///
    /// Rate limiting and cancellation are propagated; any other failure
    /// leaves the repository at the default rank.
    async fn watchers(
        &self,
        href: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<u64>, DiscoveryError> {
        match self.client.get_json::<Watchers>(href, &[], cancel).await {
            Ok((watchers, _)) => Ok(Some(watchers.size)),
            Err(e @ (DiscoveryError::RateLimited { .. } | DiscoveryError::Cancelled)) => Err(e),
            Err(e) => {
                warn!(error = %e, href, "Watcher lookup failed; using default rank");
                Ok(None)
            }
        }
    }

    /// Fetches and ranks the page at the cursor, advancing the cursor only
    /// once the whole page is ranked. Returns the ranked git repositories
    /// and whether the listing has further pages.
    async fn next_page(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<(Vec<RepositoryDescriptor>, bool), DiscoveryError> {
        let query = self.query();
        let (page, _) = self
            .client
            .get_json::<Page>(&self.next_url, &query, cancel)
            .await?;

        let newest = page
            .values
            .iter()
            .filter_map(|r| r.created_on.clone())
            .max();

        let repositories: Vec<ListedRepository> = page
            .values
            .into_iter()
            .filter(|r| r.scm.eq_ignore_ascii_case("git"))
            .collect();

        let this = &*self;
        let descriptors = stream::iter(repositories)
            .map(move |repo| async move {
                let signal = match &repo.links.watchers {
                    Some(link) => this.watchers(&link.href, cancel).await?,
                    None => None,
                };
                Ok::<_, DiscoveryError>(RepositoryDescriptor::new(
                    repo.links.html.href,
                    repo.full_name,
                    Platform::Bitbucket,
                    this.ranks.rank(signal),
                ))
            })
            .buffered(self.concurrency)
            .try_collect::<Vec<_>>()
            .await?;

        if cancel.is_cancelled() {
            return Err(DiscoveryError::Cancelled);
        }

        if newest > self.last_created {
            self.last_created = newest;
        }
        let more = page.next.is_some();
        self.next_url = match page.next {
            Some(next) => next,
            None => {
                debug!("Bitbucket listing exhausted; polling from last position");
                self.listing_url.clone()
            }
        };
        Ok((descriptors, more))
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        // Page URLs returned in `next` already carry their parameters.
        if self.next_url == self.listing_url {
            let mut query = vec![("pagelen", self.page_length.to_string())];
            if let Some(after) = &self.last_created {
                query.push(("after", after.clone()));
            }
            query
        } else {
            Vec::new()
        }
    }
}

#[async_trait]
impl Discoverer for BitbucketDiscoverer {
    fn name(&self) -> &str {
        "bitbucket"
    }

    async fn produce(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<RepositoryDescriptor>>, DiscoveryError> {
        // Pages with no git repositories are skipped; an empty batch means
        // the listing is caught up.
        loop {
            let (descriptors, more) = self.next_page(cancel).await?;
            if !descriptors.is_empty() || !more {
                return Ok(Some(descriptors));
            }
            debug!(next = %self.next_url, "No git repositories on page; following next");
        }
    }
}
