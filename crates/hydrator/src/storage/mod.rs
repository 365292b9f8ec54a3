//! Hydration storage.
//!
//! Durable JSON cache of hydrated tweets and the failed-ID audit log.

mod audit;
mod cache;

pub use audit::{FailedId, FailureAudit};
pub use cache::{HydrationCache, MergeStats};
