//! Runtime configuration for ingestion and search.
//!
//! [`RagConfig`] carries every tunable the pipeline needs: API endpoints,
//! retry policies, chunking bounds, and scheduler timings. Defaults match
//! the public Parliament APIs; [`RagConfig::from_env`] overlays values from
//! the environment (a `.env` file is honored via `dotenvy`).

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::types::RagError;

const DEFAULT_HANSARD_BASE_URL: &str = "https://hansard-api.parliament.uk";
const DEFAULT_MEMBERS_BASE_URL: &str = "https://members-api.parliament.uk/api/";

#[derive(Clone, Debug)]
pub struct RagConfig {
    /// Base URL of the Hansard debates API.
    pub hansard_base_url: Url,
    /// Base URL of the Members API (contribution discovery).
    pub members_base_url: Url,
    pub user_agent: String,
    /// Upper bound on any single HTTP request, fetch or embedding call.
    pub request_timeout: Duration,
    /// Total attempts for a transient fetch failure before the id is skipped.
    pub fetch_retry_attempts: u32,
    pub fetch_retry_base: Duration,
    pub fetch_retry_cap: Duration,
    /// Maximum characters per chunk; items longer than this are split on
    /// sentence boundaries.
    pub max_chunk_chars: usize,
    /// Pieces shorter than this are merged into their predecessor.
    pub min_chunk_chars: usize,
    /// Chunks embedded per provider call.
    pub embed_batch_size: usize,
    /// Total attempts for a rate-limited or unavailable provider before the
    /// affected chunks are skipped.
    pub embed_retry_attempts: u32,
    pub embed_retry_base: Duration,
    /// Largest `top_k` a search caller may request.
    pub max_top_k: usize,
    /// Interval of the optional contribution discovery poller.
    pub poll_interval: Duration,
    /// How long shutdown waits for in-flight tasks before force-cancelling.
    pub shutdown_grace: Duration,
    /// Location of the sqlite-vec database file.
    pub db_path: PathBuf,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            hansard_base_url: Url::parse(DEFAULT_HANSARD_BASE_URL)
                .expect("default Hansard URL is valid"),
            members_base_url: Url::parse(DEFAULT_MEMBERS_BASE_URL)
                .expect("default Members URL is valid"),
            user_agent: format!("hansard-rag/{}", env!("CARGO_PKG_VERSION")),
            request_timeout: Duration::from_secs(30),
            fetch_retry_attempts: 3,
            fetch_retry_base: Duration::from_secs(2),
            fetch_retry_cap: Duration::from_secs(8),
            max_chunk_chars: 1200,
            min_chunk_chars: 120,
            embed_batch_size: 32,
            embed_retry_attempts: 3,
            embed_retry_base: Duration::from_millis(500),
            max_top_k: 50,
            poll_interval: Duration::from_secs(15 * 60),
            shutdown_grace: Duration::from_secs(5),
            db_path: PathBuf::from("./hansard_chunks.sqlite"),
        }
    }
}

impl RagConfig {
    /// Builds a config from defaults overlaid with environment variables.
    ///
    /// Recognized variables: `HANSARD_API_BASE_URL`, `MEMBERS_API_BASE_URL`,
    /// `HANSARD_RAG_DB`, `HANSARD_RAG_POLL_SECS`, `HANSARD_RAG_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, RagError> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("HANSARD_API_BASE_URL") {
            config.hansard_base_url = parse_url("HANSARD_API_BASE_URL", &raw)?;
        }
        if let Ok(raw) = std::env::var("MEMBERS_API_BASE_URL") {
            config.members_base_url = parse_url("MEMBERS_API_BASE_URL", &raw)?;
        }
        if let Ok(raw) = std::env::var("HANSARD_RAG_DB") {
            config.db_path = PathBuf::from(raw);
        }
        if let Ok(raw) = std::env::var("HANSARD_RAG_POLL_SECS") {
            config.poll_interval = Duration::from_secs(parse_secs("HANSARD_RAG_POLL_SECS", &raw)?);
        }
        if let Ok(raw) = std::env::var("HANSARD_RAG_TIMEOUT_SECS") {
            config.request_timeout =
                Duration::from_secs(parse_secs("HANSARD_RAG_TIMEOUT_SECS", &raw)?);
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_hansard_base_url(mut self, url: Url) -> Self {
        self.hansard_base_url = url;
        self
    }

    #[must_use]
    pub fn with_members_base_url(mut self, url: Url) -> Self {
        self.members_base_url = url;
        self
    }

    #[must_use]
    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }

    #[must_use]
    pub fn with_chunk_bounds(mut self, min_chars: usize, max_chars: usize) -> Self {
        self.min_chunk_chars = min_chars;
        self.max_chunk_chars = max_chars;
        self
    }

    #[must_use]
    pub fn with_fetch_retries(mut self, attempts: u32, base: Duration, cap: Duration) -> Self {
        self.fetch_retry_attempts = attempts;
        self.fetch_retry_base = base;
        self.fetch_retry_cap = cap;
        self
    }

    #[must_use]
    pub fn with_embed_retries(mut self, attempts: u32, base: Duration) -> Self {
        self.embed_retry_attempts = attempts;
        self.embed_retry_base = base;
        self
    }

    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

fn parse_url(name: &str, raw: &str) -> Result<Url, RagError> {
    Url::parse(raw).map_err(|err| RagError::Config(format!("{name}: {err}")))
}

fn parse_secs(name: &str, raw: &str) -> Result<u64, RagError> {
    raw.parse::<u64>()
        .map_err(|err| RagError::Config(format!("{name}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_public_apis() {
        let config = RagConfig::default();
        assert_eq!(
            config.hansard_base_url.as_str(),
            "https://hansard-api.parliament.uk/"
        );
        assert!(config.max_chunk_chars > config.min_chunk_chars);
        assert!(config.fetch_retry_base <= config.fetch_retry_cap);
    }

    #[test]
    fn builder_setters_apply() {
        let config = RagConfig::default()
            .with_chunk_bounds(50, 200)
            .with_db_path("/tmp/test.sqlite")
            .with_shutdown_grace(Duration::from_millis(250));
        assert_eq!(config.max_chunk_chars, 200);
        assert_eq!(config.min_chunk_chars, 50);
        assert_eq!(config.db_path, PathBuf::from("/tmp/test.sqlite"));
        assert_eq!(config.shutdown_grace, Duration::from_millis(250));
    }
}
