//! Reference resolution and hydration engine for tweet exports.
//!
//! This crate provides:
//! - Reference extraction across the known export layouts (reply parents,
//!   quoted tweets, retweet originals)
//! - Batched lookups against TwitterAPI.io with pacing and bounded retries
//! - Quote-chain expansion in depth-bounded rounds
//! - A durable JSON cache of hydrated tweets and a failed-ID audit log

pub mod config;
pub mod error;
pub mod input;
pub mod lookup;
pub mod pipeline;
pub mod storage;
pub mod tweet;
pub mod walker;

// Re-export main types
pub use config::{ApiConfig, HydrateConfig, ParentIdsPolicy, RetryPolicy};
pub use error::{HydrateError, LookupError};
pub use input::ExportCategory;
pub use lookup::{HydrationClient, TweetLookup, TwitterApiClient};
pub use pipeline::{Pipeline, PipelineConfig, RunSummary};
pub use storage::{FailureAudit, HydrationCache};
pub use tweet::{FetchOutcome, RawRecord, Reference, ReferenceExtractor, ReferenceKind, TweetId};
pub use walker::{FrontierWalker, RoundReport};
