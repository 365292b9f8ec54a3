//! Quote-graph frontier walker.
//!
//! Drives hydration in rounds: round 1 fetches the seed IDs, every later
//! round fetches the quoted tweets discovered in the previous round's
//! records, until the frontier empties or `max_depth` rounds have run.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use futures::StreamExt;

use crate::config::HydrateConfig;
use crate::lookup::HydrationClient;
use crate::storage::{FailureAudit, HydrationCache};
use crate::tweet::{FetchOutcome, RawRecord, ReferenceExtractor, ReferenceKind, TweetId};

/// Counts for one completed round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundReport {
    /// Round number, starting at 1.
    pub depth: u32,
    /// IDs requested from the API.
    pub requested: usize,
    /// Frontier IDs skipped because they were cached, excluded or already seen.
    pub skipped_known: usize,
    /// Records obtained.
    pub hydrated: usize,
    /// IDs the API did not return.
    pub not_found: usize,
    /// IDs whose batch exhausted its retries.
    pub failed: usize,
    /// Quoted IDs found in this round's records (next frontier, unfiltered).
    pub discovered: usize,
}

/// Records and counts produced by one [`FrontierWalker::step`].
#[derive(Debug, Clone)]
pub struct RoundOutcome {
    /// Counts for the round.
    pub report: RoundReport,
    /// Records hydrated in this round.
    pub fetched: BTreeMap<TweetId, RawRecord>,
}

/// Per-run walk state. Never persisted.
#[derive(Debug, Clone)]
pub struct FrontierState {
    frontier: BTreeSet<TweetId>,
    seen: HashSet<TweetId>,
    excluded: HashSet<TweetId>,
    depth: u32,
    max_depth: u32,
    done: bool,
    newly_fetched: BTreeMap<TweetId, RawRecord>,
    rounds: Vec<RoundReport>,
}

impl FrontierState {
    /// Pending(1) seeded with `initial`.
    pub fn new(initial: impl IntoIterator<Item = TweetId>, max_depth: u32) -> Self {
        Self {
            frontier: initial.into_iter().collect(),
            seen: HashSet::new(),
            excluded: HashSet::new(),
            depth: 1,
            max_depth,
            done: false,
            newly_fetched: BTreeMap::new(),
            rounds: Vec::new(),
        }
    }

    /// Never request `ids` in any round, e.g. tweets already in the export.
    #[must_use]
    pub fn excluding(mut self, ids: impl IntoIterator<Item = TweetId>) -> Self {
        self.excluded.extend(ids);
        self
    }

    /// Current round number.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Whether the walk reached its terminal state.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// IDs queued for the current round, before filtering.
    pub fn frontier(&self) -> &BTreeSet<TweetId> {
        &self.frontier
    }

    /// Every record hydrated so far this run.
    pub fn newly_fetched(&self) -> &BTreeMap<TweetId, RawRecord> {
        &self.newly_fetched
    }

    /// Reports of completed rounds.
    pub fn rounds(&self) -> &[RoundReport] {
        &self.rounds
    }

    /// Consume the state, returning every record hydrated this run.
    pub fn into_newly_fetched(self) -> BTreeMap<TweetId, RawRecord> {
        self.newly_fetched
    }

    fn finish(&mut self) {
        self.done = true;
        self.frontier.clear();
    }
}

/// Result of a complete walk.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Union of every round's hydrated records.
    pub newly_fetched: BTreeMap<TweetId, RawRecord>,
    /// Per-round counts.
    pub rounds: Vec<RoundReport>,
}

/// Walks quote chains round by round through a [`HydrationClient`].
pub struct FrontierWalker {
    client: HydrationClient,
    extractor: ReferenceExtractor,
    max_depth: u32,
}

impl FrontierWalker {
    /// Create a new walker.
    #[must_use]
    pub fn new(client: HydrationClient, config: &HydrateConfig) -> Self {
        Self {
            client,
            extractor: ReferenceExtractor::from_config(config).only(ReferenceKind::Quoted),
            max_depth: config.max_depth,
        }
    }

    /// Initial state for `initial_ids`.
    pub fn start(&self, initial_ids: impl IntoIterator<Item = TweetId>) -> FrontierState {
        FrontierState::new(initial_ids, self.max_depth)
    }

    /// Run one round: filter, fetch, expand, advance.
    ///
    /// Returns `None` once the walk is done. IDs present in `known`, excluded
    /// from the state or seen earlier in the run are never requested.
    pub async fn step(
        &self,
        state: &mut FrontierState,
        known: &HydrationCache,
        audit: &mut FailureAudit,
    ) -> Option<RoundOutcome> {
        if state.done {
            return None;
        }
        if state.depth > state.max_depth {
            if !state.frontier.is_empty() {
                tracing::info!(
                    depth = state.depth,
                    max_depth = state.max_depth,
                    dropped = state.frontier.len(),
                    "Depth bound reached, not expanding further"
                );
            }
            state.finish();
            return None;
        }

        // Pending(d)
        let queued = std::mem::take(&mut state.frontier);
        let pending: BTreeSet<TweetId> = queued
            .iter()
            .filter(|id| {
                !known.contains(id.as_str())
                    && !state.seen.contains(*id)
                    && !state.excluded.contains(*id)
            })
            .cloned()
            .collect();
        let skipped_known = queued.len() - pending.len();

        if pending.is_empty() {
            tracing::info!(
                depth = state.depth,
                skipped_known,
                "Frontier exhausted, walk complete"
            );
            state.finish();
            return None;
        }

        tracing::info!(
            depth = state.depth,
            max_depth = state.max_depth,
            requested = pending.len(),
            skipped_known,
            "Starting hydration round"
        );
        state.seen.extend(pending.iter().cloned());

        // Fetch
        let mut report = RoundReport {
            depth: state.depth,
            requested: pending.len(),
            skipped_known,
            ..Default::default()
        };
        let mut fetched = BTreeMap::new();
        {
            let mut outcomes = std::pin::pin!(self.client.hydrate(pending, audit));
            while let Some((id, outcome)) = outcomes.next().await {
                match outcome {
                    FetchOutcome::Hydrated(record) => {
                        report.hydrated += 1;
                        fetched.insert(id, record);
                    }
                    FetchOutcome::NotFound => report.not_found += 1,
                    FetchOutcome::Failed(_) => report.failed += 1,
                }
            }
        }

        // Expand
        let candidates = self.extractor.extract(fetched.values()).targets();
        report.discovered = candidates.len();

        tracing::info!(
            depth = report.depth,
            hydrated = report.hydrated,
            not_found = report.not_found,
            failed = report.failed,
            discovered = report.discovered,
            "Hydration round complete"
        );

        // Advance
        state
            .newly_fetched
            .extend(fetched.iter().map(|(id, r)| (id.clone(), r.clone())));
        state.rounds.push(report.clone());
        state.depth += 1;
        state.frontier = candidates;
        if state.frontier.is_empty() {
            state.finish();
        } else if state.depth > state.max_depth {
            tracing::info!(
                max_depth = state.max_depth,
                dropped = state.frontier.len(),
                "Depth bound reached, not expanding further"
            );
            state.finish();
        }

        Some(RoundOutcome { report, fetched })
    }

    /// Walk from `initial_ids` to completion.
    pub async fn resolve(
        &self,
        initial_ids: impl IntoIterator<Item = TweetId>,
        known: &HydrationCache,
        audit: &mut FailureAudit,
    ) -> Resolution {
        let mut state = self.start(initial_ids);
        while self.step(&mut state, known, audit).await.is_some() {}

        Resolution {
            rounds: state.rounds.clone(),
            newly_fetched: state.into_newly_fetched(),
        }
    }
}
