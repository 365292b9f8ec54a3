//! Batched hydration with pacing and bounded retries.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream};

use super::twitterapi::estimate_credits;
use super::TweetLookup;
use crate::config::{HydrateConfig, RetryPolicy};
use crate::error::LookupError;
use crate::storage::FailureAudit;
use crate::tweet::{own_id, FetchOutcome, RawRecord, TweetId};

/// Terminal result of one batch.
#[derive(Debug)]
pub enum BatchResult {
    /// The API answered; records are whatever it returned.
    Success(Vec<RawRecord>),
    /// Every attempt failed.
    ExhaustedRetries { attempts: u32, reason: String },
}

/// Retry state machine for a single batch.
enum BatchState {
    Request { retries_used: u32 },
    Backoff { retries_used: u32, error: LookupError },
    Done(BatchResult),
}

/// Hydrates ID sets through a [`TweetLookup`], one batch at a time.
pub struct HydrationClient {
    lookup: Arc<dyn TweetLookup>,
    batch_size: usize,
    retry: RetryPolicy,
    pacing_delay: Duration,
}

impl HydrationClient {
    /// Create a new client.
    #[must_use]
    pub fn new(lookup: Arc<dyn TweetLookup>, config: &HydrateConfig) -> Self {
        Self {
            lookup,
            batch_size: config.batch_size.max(1),
            retry: config.retry.clone(),
            pacing_delay: config.pacing_delay,
        }
    }

    /// Split IDs into request-sized batches.
    #[must_use]
    pub fn batches(&self, ids: &BTreeSet<TweetId>) -> Vec<Vec<TweetId>> {
        let ids: Vec<TweetId> = ids.iter().cloned().collect();
        ids.chunks(self.batch_size).map(<[TweetId]>::to_vec).collect()
    }

    /// Hydrate `ids`, yielding one outcome per requested ID.
    ///
    /// Batches are requested lazily as the stream is polled. Every `Failed`
    /// outcome is also recorded in `audit`. An empty set yields nothing and
    /// makes no request.
    pub fn hydrate<'a>(
        &'a self,
        ids: BTreeSet<TweetId>,
        audit: &'a mut FailureAudit,
    ) -> impl Stream<Item = (TweetId, FetchOutcome)> + 'a {
        let batches = self.batches(&ids);
        let run = HydrationRun {
            client: self,
            audit,
            total: batches.len(),
            batches: batches.into_iter(),
            number: 0,
            last_succeeded: false,
            ready: VecDeque::new(),
        };

        stream::unfold(run, |mut run| async move {
            loop {
                if let Some(item) = run.ready.pop_front() {
                    return Some((item, run));
                }
                let batch = run.batches.next()?;
                run.advance(batch).await;
            }
        })
    }

    /// Request one batch, retrying transient failures per the retry policy.
    pub async fn fetch_batch(&self, batch: &[TweetId]) -> BatchResult {
        let mut state = BatchState::Request { retries_used: 0 };
        loop {
            state = match state {
                BatchState::Request { retries_used } => match self.lookup.lookup(batch).await {
                    Ok(records) => BatchState::Done(BatchResult::Success(records)),
                    Err(error) if error.is_retryable() && retries_used < self.retry.max_retries => {
                        BatchState::Backoff {
                            retries_used,
                            error,
                        }
                    }
                    Err(error) => BatchState::Done(BatchResult::ExhaustedRetries {
                        attempts: retries_used + 1,
                        reason: error.to_string(),
                    }),
                },
                BatchState::Backoff {
                    retries_used,
                    error,
                } => {
                    let hint = match &error {
                        LookupError::RateLimited { retry_after_secs } => {
                            retry_after_secs.map(Duration::from_secs)
                        }
                        _ => None,
                    };
                    let delay = self.retry.delay_with_hint(retries_used, hint);
                    tracing::warn!(
                        error = %error,
                        retry = retries_used + 1,
                        max_retries = self.retry.max_retries,
                        delay_secs = delay.as_secs(),
                        "Lookup failed, backing off before retry"
                    );
                    tokio::time::sleep(delay).await;
                    BatchState::Request {
                        retries_used: retries_used + 1,
                    }
                }
                BatchState::Done(result) => return result,
            };
        }
    }
}

/// Lazy state behind [`HydrationClient::hydrate`].
struct HydrationRun<'a> {
    client: &'a HydrationClient,
    audit: &'a mut FailureAudit,
    batches: std::vec::IntoIter<Vec<TweetId>>,
    total: usize,
    number: usize,
    last_succeeded: bool,
    ready: VecDeque<(TweetId, FetchOutcome)>,
}

impl HydrationRun<'_> {
    async fn advance(&mut self, batch: Vec<TweetId>) {
        // Steady-state pacing between successful batches, separate from backoff
        if self.last_succeeded && !self.client.pacing_delay.is_zero() {
            tokio::time::sleep(self.client.pacing_delay).await;
        }

        self.number += 1;
        tracing::info!(
            batch = self.number,
            total = self.total,
            size = batch.len(),
            "Hydrating batch"
        );

        let result = self.client.fetch_batch(&batch).await;
        self.last_succeeded = matches!(result, BatchResult::Success(_));

        for (id, outcome) in resolve_outcomes(&batch, result, self.number, self.total) {
            if let FetchOutcome::Failed(reason) = &outcome {
                self.audit.record(id.clone(), reason.clone());
            }
            self.ready.push_back((id, outcome));
        }
    }
}

/// Map a batch result back onto the requested IDs.
fn resolve_outcomes(
    batch: &[TweetId],
    result: BatchResult,
    number: usize,
    total: usize,
) -> Vec<(TweetId, FetchOutcome)> {
    match result {
        BatchResult::Success(records) => {
            let mut by_id: HashMap<TweetId, RawRecord> = HashMap::with_capacity(records.len());
            for record in records {
                match own_id(&record) {
                    Some(id) => {
                        by_id.entry(id).or_insert(record);
                    }
                    None => tracing::debug!("Ignoring returned record without an ID"),
                }
            }

            let found = batch.iter().filter(|id| by_id.contains_key(*id)).count();
            if by_id.len() > found {
                tracing::debug!(
                    extra = by_id.len() - found,
                    "Ignoring records for IDs that were not requested"
                );
            }
            tracing::info!(
                batch = number,
                total,
                found,
                requested = batch.len(),
                credits = estimate_credits(found),
                "Batch hydrated"
            );
            if found < batch.len() {
                tracing::warn!(
                    batch = number,
                    not_found = batch.len() - found,
                    "Tweets not found in batch"
                );
            }

            batch
                .iter()
                .map(|id| {
                    let outcome = by_id
                        .remove(id)
                        .map_or(FetchOutcome::NotFound, FetchOutcome::Hydrated);
                    (id.clone(), outcome)
                })
                .collect()
        }
        BatchResult::ExhaustedRetries { attempts, reason } => {
            tracing::error!(
                batch = number,
                total,
                attempts,
                error = %reason,
                "Batch failed after exhausting retries"
            );
            batch
                .iter()
                .map(|id| (id.clone(), FetchOutcome::Failed(reason.clone())))
                .collect()
        }
    }
}
