//! TwitterAPI.io batch lookup client.

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use super::TweetLookup;
use crate::config::ApiConfig;
use crate::error::{HydrateError, LookupError};
use crate::tweet::{RawRecord, TweetId};

/// Batch lookup endpoint, relative to the base URL.
pub const TWEETS_ENDPOINT: &str = "/twitter/tweets";

/// Credits charged per returned tweet.
pub const CREDITS_PER_TWEET: u64 = 15;

/// Minimum credits charged per request.
pub const MIN_CREDITS_PER_REQUEST: u64 = 15;

/// Longest error body kept in error messages.
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Estimated credit cost of a request that returned `found` tweets.
#[must_use]
pub fn estimate_credits(found: usize) -> u64 {
    (found as u64 * CREDITS_PER_TWEET).max(MIN_CREDITS_PER_REQUEST)
}

/// Response body of the batch lookup endpoint.
#[derive(Debug, Deserialize)]
pub struct LookupResponse {
    /// Returned tweets; absent or null means none.
    #[serde(default)]
    pub tweets: Option<Vec<RawRecord>>,
    /// `success` or `error`.
    #[serde(default)]
    pub status: Option<String>,
    /// Human-readable status message.
    #[serde(default, alias = "message")]
    pub msg: Option<String>,
}

/// TwitterAPI.io client.
pub struct TwitterApiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl TwitterApiClient {
    /// Create a new client.
    pub fn new(config: &ApiConfig) -> Result<Self, HydrateError> {
        if config.api_key.is_empty() {
            return Err(HydrateError::Config("API key must not be empty".to_string()));
        }

        let client = Client::builder()
            .user_agent(concat!("hydrator/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl TweetLookup for TwitterApiClient {
    async fn lookup(&self, ids: &[TweetId]) -> Result<Vec<RawRecord>, LookupError> {
        let joined = ids
            .iter()
            .map(TweetId::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let url = format!("{}{TWEETS_ENDPOINT}", self.base_url);
        tracing::debug!(url = %url, count = ids.len(), "Making lookup request");

        let response = self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .query(&[("tweet_ids", joined.as_str())])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok());
            return Err(LookupError::RateLimited { retry_after_secs });
        }

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".into());
            return Err(LookupError::Api {
                status: status.as_u16(),
                message: error_text.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let body = response.text().await?;
        let parsed: LookupResponse =
            serde_json::from_str(&body).map_err(|e| LookupError::Malformed(e.to_string()))?;

        if parsed
            .status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("error"))
        {
            return Err(LookupError::Malformed(
                parsed.msg.unwrap_or_else(|| "status: error".to_string()),
            ));
        }

        Ok(parsed.tweets.unwrap_or_default())
    }
}
