//! Tweet records and reference extraction.
//!
//! Provides the ID/reference model and the strategy-table extractor that
//! discovers reply parents, quoted tweets and retweet originals.

mod extract;
mod permalink;
mod types;

pub use extract::{own_id, Extraction, Probe, ReferenceExtractor, Strategy};
pub use permalink::status_id;
pub use types::{FetchOutcome, RawRecord, Reference, ReferenceKind, TweetId};
