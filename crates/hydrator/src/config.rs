//! Configuration for the hydration engine.
//!
//! Every component receives its knobs through [`HydrateConfig`] at
//! construction time; nothing reads ambient state after startup except
//! [`ApiConfig::from_env`].

use std::time::Duration;

use crate::error::HydrateError;
use crate::input::ExportCategory;

/// Environment variable holding the TwitterAPI.io key.
pub const API_KEY_ENV: &str = "TWITTERAPI_KEY";

/// Environment variable overriding the lookup API base URL.
pub const BASE_URL_ENV: &str = "TWITTERAPI_BASE_URL";

/// Default lookup API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.twitterapi.io";

/// IDs per lookup request (the API maximum).
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Retries per batch after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Backoff delays between retry attempts, in seconds.
pub const DEFAULT_BACKOFF_SECS: [u64; 3] = [60, 120, 300];

/// Upper bound on a server-requested `Retry-After` delay, in seconds.
pub const DEFAULT_MAX_RETRY_AFTER_SECS: u64 = 600;

/// Steady-state delay between completed batches (~20 requests/second).
pub const DEFAULT_PACING_MS: u64 = 50;

/// Maximum quote-chain expansion depth.
pub const DEFAULT_MAX_DEPTH: u32 = 3;

/// Per-request timeout for lookup calls.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Planned request count above which a warning is logged.
pub const DEFAULT_REQUEST_BUDGET: usize = 75;

/// How the flat `parent_ids` array of export format A is split into reply and
/// quote references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParentIdsPolicy {
    /// Use the `reply`/`quote` counters first, then position.
    #[default]
    Heuristic,
    /// Ignore the counters: `[0]` is the reply parent, `[1]` the quoted tweet.
    Positional,
}

impl std::str::FromStr for ParentIdsPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "heuristic" => Ok(Self::Heuristic),
            "positional" => Ok(Self::Positional),
            other => Err(format!(
                "unknown parent_ids policy '{other}' (expected heuristic or positional)"
            )),
        }
    }
}

/// Bounded retry schedule for a single batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before each retry; the last entry repeats when exhausted.
    pub backoff: Vec<Duration>,
    /// Longest delay a `Retry-After` hint may stretch a backoff to.
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: DEFAULT_BACKOFF_SECS
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
            max_retry_after: Duration::from_secs(DEFAULT_MAX_RETRY_AFTER_SECS),
        }
    }
}

impl RetryPolicy {
    /// Delay to sleep before retry number `retry` (zero-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.backoff
            .get(retry as usize)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    /// Delay before retry number `retry`, lengthened by a server hint.
    ///
    /// The hint never shortens the schedule and is capped at
    /// `max_retry_after`.
    #[must_use]
    pub fn delay_with_hint(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let scheduled = self.delay_for(retry);
        match retry_after {
            Some(hint) => scheduled.max(hint.min(self.max_retry_after)),
            None => scheduled,
        }
    }
}

/// Knobs shared by the extractor, hydration client and frontier walker.
#[derive(Debug, Clone)]
pub struct HydrateConfig {
    /// IDs per lookup request.
    pub batch_size: usize,
    /// Retry schedule per batch.
    pub retry: RetryPolicy,
    /// Delay between successfully completed batches.
    pub pacing_delay: Duration,
    /// Maximum quote-chain depth (round count).
    pub max_depth: u32,
    /// How `parent_ids` arrays are interpreted.
    pub parent_ids_policy: ParentIdsPolicy,
    /// Export categories to scan.
    pub categories: Vec<ExportCategory>,
    /// Re-fetch referenced IDs even when cached and let fresh records win.
    pub refresh: bool,
    /// Persist the cache after every round that fetched something.
    pub checkpoint_each_round: bool,
    /// Planned request count above which a warning is logged.
    pub request_budget: usize,
}

impl Default for HydrateConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::default(),
            pacing_delay: Duration::from_millis(DEFAULT_PACING_MS),
            max_depth: DEFAULT_MAX_DEPTH,
            parent_ids_policy: ParentIdsPolicy::default(),
            categories: ExportCategory::ALL.to_vec(),
            refresh: false,
            checkpoint_each_round: true,
            request_budget: DEFAULT_REQUEST_BUDGET,
        }
    }
}

impl HydrateConfig {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), HydrateError> {
        if self.batch_size == 0 {
            return Err(HydrateError::Config(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.retry.max_retries > 0 && self.retry.backoff.is_empty() {
            return Err(HydrateError::Config(
                "retries require at least one backoff delay".to_string(),
            ));
        }
        if self.categories.is_empty() {
            return Err(HydrateError::Config(
                "at least one export category must be selected".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of lookup requests needed for `ids` IDs, absent retries.
    #[must_use]
    pub fn planned_requests(&self, ids: usize) -> usize {
        ids.div_ceil(self.batch_size.max(1))
    }
}

/// Lookup API connection settings.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// API key sent as `x-api-key`.
    pub api_key: String,
    /// Base URL without trailing slash.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl ApiConfig {
    /// Create configuration with the default base URL and timeout.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    /// Override the base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Create configuration from environment variables.
    ///
    /// # Required Environment Variables
    /// - `TWITTERAPI_KEY`: API key from twitterapi.io
    ///
    /// # Optional Environment Variables
    /// - `TWITTERAPI_BASE_URL`: Base URL (default: https://api.twitterapi.io)
    pub fn from_env() -> Result<Self, HydrateError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, HydrateError> {
        let api_key = var(API_KEY_ENV)
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or(HydrateError::MissingCredential(API_KEY_ENV))?;

        let config = Self::new(api_key);
        Ok(match var(BASE_URL_ENV).filter(|u| !u.trim().is_empty()) {
            Some(url) => config.with_base_url(url.trim()),
            None => config,
        })
    }
}
