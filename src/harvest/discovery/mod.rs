//! Repository discovery on hosting platforms.
//!
//! One [`Discoverer`](crate::harvest::Discoverer) per platform polls a
//! paginated listing endpoint and ranks each repository by popularity.

pub mod bitbucket;
pub mod client;
pub mod github;
pub mod seed;

pub use bitbucket::BitbucketDiscoverer;
pub use client::{ApiClient, RateLimit};
pub use github::GitHubDiscoverer;
pub use seed::SeedDiscoverer;

/// Maps a popularity signal (stars, watchers) onto a rank in [0, 1].
///
/// `rank = min(log_base(max(signal, 1)), 1)`: monotonic and saturating at
/// `signal >= base`. Repositories without a signal get `default_rank`
/// instead of 0 so new repositories are not buried permanently.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankPolicy {
    pub base: f64,
    pub default_rank: f64,
}

impl RankPolicy {
    pub fn new(base: f64, default_rank: f64) -> Self {
        Self { base, default_rank }
    }

    pub fn rank(&self, signal: Option<u64>) -> f64 {
        match signal {
            Some(signal) => {
                let value = (signal.max(1) as f64).ln() / self.base.ln();
                value.clamp(0.0, 1.0)
            }
            None => self.default_rank,
        }
    }
}
