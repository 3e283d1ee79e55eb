//! HTTP client for the Hansard debates API and the Members API.
//!
//! Transient failures (timeouts, connection errors, 429, 5xx) are retried
//! with capped exponential backoff. A 404 from the debates endpoint is
//! permanent and maps to [`RagError::DebateNotFound`] without retrying.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, warn};
use url::Url;

use crate::api::models::{ContributionSearchResult, Debate};
use crate::config::RagConfig;
use crate::types::RagError;

/// Source of full debate documents, keyed by Hansard external id.
#[async_trait]
pub trait DebateSource: Send + Sync {
    async fn fetch_debate(&self, ext_id: &str) -> Result<Debate, RagError>;
}

/// Source of per-member contribution summaries, used by the discovery
/// poller to find debates worth indexing.
#[async_trait]
pub trait ContributionSource: Send + Sync {
    async fn member_contributions(
        &self,
        member_id: i64,
        page: i64,
    ) -> Result<ContributionSearchResult, RagError>;
}

enum GetError {
    NotFound,
    Transient(String),
    Permanent(String),
}

/// Client for both Parliament APIs with shared retry policy.
#[derive(Clone)]
pub struct HansardClient {
    http: reqwest::Client,
    hansard_base: Url,
    members_base: Url,
    retry_attempts: u32,
    retry_base: Duration,
    retry_cap: Duration,
}

impl HansardClient {
    pub fn new(config: &RagConfig) -> Result<Self, RagError> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout)
            .use_rustls_tls()
            .build()
            .map_err(|err| RagError::Config(format!("http client: {err}")))?;

        Ok(Self {
            http,
            hansard_base: config.hansard_base_url.clone(),
            members_base: config.members_base_url.clone(),
            retry_attempts: config.fetch_retry_attempts.max(1),
            retry_base: config.fetch_retry_base,
            retry_cap: config.fetch_retry_cap,
        })
    }

    fn debate_url(&self, ext_id: &str) -> Result<Url, RagError> {
        self.hansard_base
            .join(&format!("Debates/Debate/{ext_id}.json"))
            .map_err(|err| RagError::Fetch(format!("debate url: {err}")))
    }

    fn contributions_url(&self, member_id: i64, page: i64) -> Result<Url, RagError> {
        let mut url = self
            .members_base
            .join(&format!("Members/{member_id}/ContributionSummary"))
            .map_err(|err| RagError::Fetch(format!("contributions url: {err}")))?;
        url.query_pairs_mut().append_pair("page", &page.to_string());
        Ok(url)
    }

    async fn get_json<T>(&self, url: Url) -> Result<T, GetError>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self.http.get(url.clone()).send().await.map_err(|err| {
            if err.is_timeout() || err.is_connect() {
                GetError::Transient(err.to_string())
            } else {
                GetError::Permanent(err.to_string())
            }
        })?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(GetError::NotFound),
            status if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() => {
                Err(GetError::Transient(format!("{url} returned {status}")))
            }
            status if !status.is_success() => {
                Err(GetError::Permanent(format!("{url} returned {status}")))
            }
            _ => response
                .json::<T>()
                .await
                .map_err(|err| GetError::Permanent(format!("decode {url}: {err}"))),
        }
    }

    /// Runs `get_json` under the retry policy. Only transient failures are
    /// retried; the last error wins once attempts are exhausted.
    async fn get_with_retry<T>(&self, url: Url, what: &str) -> Result<T, GetError>
    where
        T: serde::de::DeserializeOwned,
    {
        let mut attempt = 1u32;
        loop {
            match self.get_json::<T>(url.clone()).await {
                Ok(value) => return Ok(value),
                Err(GetError::Transient(reason)) if attempt < self.retry_attempts => {
                    let backoff = self
                        .retry_base
                        .saturating_mul(1 << (attempt - 1))
                        .min(self.retry_cap);
                    warn!(
                        what,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        %reason,
                        "transient fetch failure, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl DebateSource for HansardClient {
    async fn fetch_debate(&self, ext_id: &str) -> Result<Debate, RagError> {
        let url = self.debate_url(ext_id)?;
        debug!(ext_id, %url, "fetching debate");
        self.get_with_retry::<Debate>(url, "debate")
            .await
            .map_err(|err| match err {
                GetError::NotFound => RagError::DebateNotFound {
                    ext_id: ext_id.to_string(),
                },
                GetError::Transient(reason) | GetError::Permanent(reason) => {
                    RagError::Fetch(reason)
                }
            })
    }
}

#[async_trait]
impl ContributionSource for HansardClient {
    async fn member_contributions(
        &self,
        member_id: i64,
        page: i64,
    ) -> Result<ContributionSearchResult, RagError> {
        let url = self.contributions_url(member_id, page)?;
        debug!(member_id, page, %url, "fetching contribution summary");
        self.get_with_retry::<ContributionSearchResult>(url, "contributions")
            .await
            .map_err(|err| match err {
                GetError::NotFound => {
                    RagError::Fetch(format!("member {member_id} has no contribution summary"))
                }
                GetError::Transient(reason) | GetError::Permanent(reason) => {
                    RagError::Fetch(reason)
                }
            })
    }
}
