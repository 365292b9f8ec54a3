//! Remote tweet lookup.
//!
//! [`TweetLookup`] is the seam between the engine and the batch lookup API;
//! [`HydrationClient`] layers batching, pacing and bounded retries on top.

#[cfg(test)]
pub(crate) mod fake;
mod hydration;
mod twitterapi;

use async_trait::async_trait;

use crate::error::LookupError;
use crate::tweet::{RawRecord, TweetId};

pub use hydration::{BatchResult, HydrationClient};
pub use twitterapi::{
    estimate_credits, LookupResponse, TwitterApiClient, CREDITS_PER_TWEET,
    MIN_CREDITS_PER_REQUEST, TWEETS_ENDPOINT,
};

/// A batch tweet lookup API.
#[async_trait]
pub trait TweetLookup: Send + Sync {
    /// Fetch the records for one batch of IDs.
    ///
    /// IDs the service does not return are simply absent from the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response cannot be parsed.
    async fn lookup(&self, ids: &[TweetId]) -> Result<Vec<RawRecord>, LookupError>;
}
