//! Rate-limit aware HTTP client shared by the platform discoverers.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::harvest::pipeline::sleep_or_cancel;
use crate::harvest::traits::DiscoveryError;

/// Back-off used when a platform throttles without saying for how long.
const DEFAULT_THROTTLE_SECS: i64 = 60;

/// Remaining request quota as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub remaining: u64,
    /// Unix seconds at which the quota is replenished
    pub reset_at: i64,
}

impl RateLimit {
    /// Reads `X-RateLimit-Remaining` / `X-RateLimit-Reset`.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        Some(Self {
            remaining: header_number(headers, "x-ratelimit-remaining")?,
            reset_at: header_number(headers, "x-ratelimit-reset")? as i64,
        })
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }
}

fn header_number(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub struct ApiClient {
    http: reqwest::Client,
    token: Option<String>,
    quota: Mutex<Option<RateLimit>>,
}

impl ApiClient {
    pub fn new(
        user_agent: &str,
        timeout: Duration,
        token: Option<String>,
    ) -> Result<Self, DiscoveryError> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self::from_client(http, token))
    }

    pub fn from_client(http: reqwest::Client, token: Option<String>) -> Self {
        Self {
            http,
            token,
            quota: Mutex::new(None),
        }
    }

    /// Last quota reported by the platform.
    pub fn quota(&self) -> Option<RateLimit> {
        self.quota.lock().ok().and_then(|q| *q)
    }

    fn set_quota(&self, rate: RateLimit) {
        if let Ok(mut quota) = self.quota.lock() {
            *quota = Some(rate);
        }
    }

    /// Issues a GET and decodes a JSON body.
    ///
    /// Waits for the quota reset first if the previous response exhausted it.
    /// HTTP 429, or 403 with zero remaining quota, become
    /// [`DiscoveryError::RateLimited`].
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> Result<(T, HeaderMap), DiscoveryError> {
        self.wait_for_quota(cancel).await?;

        let mut request = self.http.get(url).query(query);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        debug!(url, "GET");

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(DiscoveryError::Cancelled),
            response = request.send() => response?,
        };

        let headers = response.headers().clone();
        let reported = RateLimit::from_headers(&headers);
        if let Some(rate) = reported {
            self.set_quota(rate);
        }

        let status = response.status();
        let exhausted = reported.is_some_and(|r| r.is_exhausted());
        if status == StatusCode::TOO_MANY_REQUESTS || (status == StatusCode::FORBIDDEN && exhausted)
        {
            let now = unix_now();
            let reset_at = match (header_number(&headers, RETRY_AFTER.as_str()), reported) {
                (Some(secs), _) => now + secs as i64,
                (None, Some(rate)) if rate.is_exhausted() => rate.reset_at,
                _ => now + DEFAULT_THROTTLE_SECS,
            }
            .max(now + 1);
            self.set_quota(RateLimit {
                remaining: 0,
                reset_at,
            });
            return Err(DiscoveryError::RateLimited { reset_at });
        }
        if !status.is_success() {
            return Err(DiscoveryError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response
            .json::<T>()
            .await
            .map_err(|e| DiscoveryError::Decode(e.to_string()))?;
        Ok((body, headers))
    }

    async fn wait_for_quota(&self, cancel: &CancellationToken) -> Result<(), DiscoveryError> {
        let Some(rate) = self.quota().filter(RateLimit::is_exhausted) else {
            return Ok(());
        };

        let wait = rate.reset_at - unix_now();
        if wait > 0 {
            info!(wait_secs = wait, "Request quota exhausted; sleeping until reset");
            if !sleep_or_cancel(Duration::from_secs(wait as u64), cancel).await {
                return Err(DiscoveryError::Cancelled);
            }
        }
        if let Ok(mut quota) = self.quota.lock() {
            *quota = None;
        }
        Ok(())
    }
}
