//! Rate-limited board API client
//!
//! Every outbound read (catalog, thread history, media bytes) goes through
//! [`FetchClient`]. A 429 is never surfaced: the client sleeps 30-40s and
//! re-issues the same request until the limit clears. Callers pace
//! independent requests in a batch with [`BoardSource::pause`].

use async_trait::async_trait;
use governor::{Quota, RateLimiter as GovRateLimiter};
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::USER_AGENT;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ScraperConfig;
use crate::error::{HarvestError, Result};
use crate::models::{CatalogPage, MediaRef, RawPost, ThreadResponse};

const FALLBACK_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:120.0) Gecko/20100101 Firefox/120.0";

/// Sleep range after a 429
const RATE_LIMIT_BACKOFF_MS: (u64, u64) = (30_000, 40_000);
/// Jitter inserted between independent requests of a batch
const REQUEST_GAP_MIN: Duration = Duration::from_millis(250);
const REQUEST_GAP_SPREAD: Duration = Duration::from_millis(500);

/// Read access to the board. The pipeline only talks to this trait.
#[async_trait]
pub trait BoardSource: Send + Sync {
    /// Full catalog, all pages.
    async fn catalog(&self) -> Result<Vec<CatalogPage>>;

    /// Every post of a thread, origin post first. `NotFound` means the thread was pruned.
    async fn thread_posts(&self, thread_id: u64) -> Result<Vec<RawPost>>;

    /// Raw bytes of an attachment.
    async fn media(&self, media: &MediaRef) -> Result<Vec<u8>>;

    /// Delay between independent requests.
    async fn pause(&self);
}

/// HTTP implementation of [`BoardSource`] with rotating identities and 429 backoff.
pub struct FetchClient {
    client: Client,
    rate_limiter: GovRateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
    api_base: String,
    media_base: String,
    user_agents: Vec<String>,
    /// Sleep window after a 429, in milliseconds
    backoff_ms: (u64, u64),
}

impl FetchClient {
    /// Create new client instance
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .gzip(true)
            .build()
            .map_err(|e| HarvestError::Config(format!("failed to build HTTP client: {}", e)))?;

        let quota = Quota::with_period(REQUEST_GAP_MIN)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN));
        let rate_limiter = GovRateLimiter::direct(quota);

        Ok(Self {
            client,
            rate_limiter,
            api_base: format!("{}/{}", config.api_base.trim_end_matches('/'), config.board),
            media_base: format!("{}/{}", config.media_base.trim_end_matches('/'), config.board),
            user_agents: config.user_agents.clone(),
            backoff_ms: RATE_LIMIT_BACKOFF_MS,
        })
    }

    fn pick_user_agent(&self) -> &str {
        self.user_agents
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or(FALLBACK_USER_AGENT)
    }

    /// Fetch an API endpoint (e.g. `/catalog.json`) and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        let url = format!("{}{}", self.api_base, endpoint);
        let response = self.send_with_retry(&url).await?;

        response
            .json::<T>()
            .await
            .map_err(|e| HarvestError::Parse(format!("invalid JSON from {}: {}", url, e)))
    }

    /// Fetch raw bytes from an absolute URL.
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.send_with_retry(url).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| HarvestError::transient(url, e))?;
        Ok(bytes.to_vec())
    }

    /// Issue a GET, sleeping and retrying for as long as the source answers 429.
    async fn send_with_retry(&self, url: &str) -> Result<Response> {
        loop {
            debug!("Fetching: {}", url);

            let response = self
                .client
                .get(url)
                .header(USER_AGENT, self.pick_user_agent())
                .send()
                .await
                .map_err(|e| HarvestError::transient(url, e))?;

            match response.status() {
                StatusCode::TOO_MANY_REQUESTS => {
                    let wait = random_between(self.backoff_ms);
                    warn!("Rate limited on {}, waiting {:.1}s", url, wait.as_secs_f64());
                    tokio::time::sleep(wait).await;
                }
                StatusCode::NOT_FOUND => return Err(HarvestError::NotFound(url.to_string())),
                status if !status.is_success() => {
                    return Err(HarvestError::transient(url, format!("HTTP {}", status)));
                }
                _ => return Ok(response),
            }
        }
    }
}

#[async_trait]
impl BoardSource for FetchClient {
    async fn catalog(&self) -> Result<Vec<CatalogPage>> {
        self.get_json("/catalog.json").await
    }

    async fn thread_posts(&self, thread_id: u64) -> Result<Vec<RawPost>> {
        let response: ThreadResponse = self.get_json(&format!("/thread/{}.json", thread_id)).await?;
        Ok(response.posts)
    }

    async fn media(&self, media: &MediaRef) -> Result<Vec<u8>> {
        let url = format!("{}/{}", self.media_base, media.remote_name());
        self.get_bytes(&url).await
    }

    async fn pause(&self) {
        // The limiter is a floor; the jittered gap is always slept.
        self.rate_limiter.until_ready().await;
        tokio::time::sleep(request_gap()).await;
    }
}

/// Random wait in an inclusive millisecond window.
fn random_between((min, max): (u64, u64)) -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(min..=max))
}

/// Jittered gap between two independent requests.
fn request_gap() -> Duration {
    let min = REQUEST_GAP_MIN.as_millis() as u64;
    random_between((min, min + REQUEST_GAP_SPREAD.as_millis() as u64))
}
