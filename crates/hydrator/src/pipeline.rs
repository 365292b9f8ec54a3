//! Hydration pipeline - orchestrates the scan-extract-walk-persist flow.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::HydrateConfig;
use crate::error::HydrateError;
use crate::input::{discover_inputs, JsonlEntry, JsonlReader};
use crate::lookup::{estimate_credits, HydrationClient, TweetLookup};
use crate::storage::{FailureAudit, HydrationCache, MergeStats};
use crate::tweet::{Extraction, ReferenceExtractor, ReferenceKind, TweetId};
use crate::walker::{FrontierWalker, RoundReport};

/// Default cache file name inside the input folder.
pub const DEFAULT_CACHE_FILE: &str = "parents.json";

/// Default audit file name inside the input folder.
pub const DEFAULT_FAILED_LOG_FILE: &str = "failed_hydration_ids.txt";

/// Configuration for the hydration pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Folder holding the JSONL exports.
    pub input_dir: PathBuf,
    /// Durable cache file.
    pub cache_path: PathBuf,
    /// Append-only file of failed IDs.
    pub failed_log_path: PathBuf,
    /// Engine knobs.
    pub hydrate: HydrateConfig,
}

impl PipelineConfig {
    /// Configuration with cache and audit files placed in `input_dir`.
    #[must_use]
    pub fn for_folder(input_dir: impl Into<PathBuf>) -> Self {
        let input_dir = input_dir.into();
        Self {
            cache_path: input_dir.join(DEFAULT_CACHE_FILE),
            failed_log_path: input_dir.join(DEFAULT_FAILED_LOG_FILE),
            input_dir,
            hydrate: HydrateConfig::default(),
        }
    }
}

/// Result of scanning an export folder.
#[derive(Debug, Default)]
pub struct ExportScan {
    /// Files that were read.
    pub files: Vec<PathBuf>,
    /// Files that could not be opened.
    pub unreadable: usize,
    /// References and contained IDs across every file.
    pub extraction: Extraction,
}

/// Result of a single hydration run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: Option<DateTime<Utc>>,
    /// Export files scanned.
    pub input_files: usize,
    /// Records scanned.
    pub records_scanned: usize,
    /// Lines skipped as malformed.
    pub malformed_lines: usize,
    /// Distinct references found.
    pub references: usize,
    /// Distinct references per kind.
    pub references_by_kind: BTreeMap<ReferenceKind, usize>,
    /// Referenced IDs not contained in the exports.
    pub candidates: usize,
    /// Candidates skipped because they were already cached.
    pub already_cached: usize,
    /// IDs sent to the API across all rounds.
    pub requested: usize,
    /// Records hydrated.
    pub hydrated: usize,
    /// IDs the API did not return.
    pub not_found: usize,
    /// IDs whose batch exhausted its retries.
    pub failed: usize,
    /// Per-round counts.
    pub rounds: Vec<RoundReport>,
    /// Planned request count for the initial frontier.
    pub planned_requests: usize,
    /// Estimated credits for the initial frontier.
    pub estimated_credits: u64,
    /// Cache merge counts.
    pub persisted: MergeStats,
    /// Records in the cache after the run.
    pub cache_size: usize,
    /// Persistence problems (checkpoint, final save, audit).
    pub persist_errors: Vec<String>,
    /// Whether the final cache save failed.
    pub final_save_failed: bool,
}

impl RunSummary {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            input_files: 0,
            records_scanned: 0,
            malformed_lines: 0,
            references: 0,
            references_by_kind: BTreeMap::new(),
            candidates: 0,
            already_cached: 0,
            requested: 0,
            hydrated: 0,
            not_found: 0,
            failed: 0,
            rounds: Vec::new(),
            planned_requests: 0,
            estimated_credits: 0,
            persisted: MergeStats::default(),
            cache_size: 0,
            persist_errors: Vec::new(),
            final_save_failed: false,
        }
    }

    /// Whether the run made no lookup request.
    #[must_use]
    pub fn nothing_to_hydrate(&self) -> bool {
        self.requested == 0
    }

    fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }
}

/// Scan every export file in `dir` for references.
///
/// Malformed lines and unreadable files are skipped with a warning.
pub fn scan_exports(dir: &Path, config: &HydrateConfig) -> Result<ExportScan, HydrateError> {
    let files = discover_inputs(dir, &config.categories)?;
    if files.is_empty() {
        return Err(HydrateError::NoInputs(dir.to_path_buf()));
    }

    let extractor = ReferenceExtractor::from_config(config);
    let mut scan = ExportScan::default();

    for path in files {
        let reader = match JsonlReader::open(&path) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable export file");
                scan.unreadable += 1;
                continue;
            }
        };

        let mut file_extraction = Extraction::default();
        for entry in reader {
            match entry {
                JsonlEntry::Record { record, .. } => {
                    extractor.scan(&mut file_extraction, &record);
                }
                JsonlEntry::Malformed { line, error } => {
                    tracing::warn!(
                        path = %path.display(),
                        line,
                        error = %error,
                        "Skipping malformed JSON line"
                    );
                    file_extraction.record_malformed();
                }
            }
        }

        tracing::info!(
            path = %path.display(),
            records = file_extraction.records_scanned,
            references = file_extraction.references.len(),
            malformed = file_extraction.malformed,
            "Scanned export file"
        );
        scan.extraction.absorb(file_extraction);
        scan.files.push(path);
    }

    Ok(scan)
}

/// Estimated credits for hydrating `ids` IDs in batches of `batch_size`,
/// assuming every ID is found.
#[must_use]
pub fn estimate_run_credits(ids: usize, batch_size: usize) -> u64 {
    let batch_size = batch_size.max(1);
    let full = ids / batch_size;
    let rest = ids % batch_size;
    let mut credits = full as u64 * estimate_credits(batch_size);
    if rest > 0 {
        credits += estimate_credits(rest);
    }
    credits
}

/// Hydration pipeline orchestrator.
pub struct Pipeline {
    config: PipelineConfig,
    lookup: Arc<dyn TweetLookup>,
}

impl Pipeline {
    /// Create a new pipeline.
    #[must_use]
    pub fn new(config: PipelineConfig, lookup: Arc<dyn TweetLookup>) -> Self {
        Self { config, lookup }
    }

    /// Run one full hydration pass.
    ///
    /// Only configuration errors are returned as `Err`; every later problem
    /// is recorded in the summary.
    pub async fn run(&self) -> Result<RunSummary, HydrateError> {
        let hydrate = &self.config.hydrate;
        hydrate.validate()?;

        let mut summary = RunSummary::new();
        tracing::info!(input = %self.config.input_dir.display(), "Starting hydration run");

        // Extract
        let scan = scan_exports(&self.config.input_dir, hydrate)?;
        let extraction = scan.extraction;
        summary.input_files = scan.files.len();
        summary.records_scanned = extraction.records_scanned;
        summary.malformed_lines = extraction.malformed;
        summary.references = extraction.references.len();
        summary.references_by_kind = extraction.counts_by_kind();

        let candidates = extraction.missing();
        summary.candidates = candidates.len();

        // Filter against the cache
        let mut cache = HydrationCache::load(&self.config.cache_path);
        let empty = HydrationCache::default();
        let initial: BTreeSet<TweetId> = if hydrate.refresh {
            candidates
        } else {
            let (cached, pending): (BTreeSet<_>, BTreeSet<_>) = candidates
                .into_iter()
                .partition(|id| cache.contains(id.as_str()));
            summary.already_cached = cached.len();
            pending
        };

        tracing::info!(
            references = summary.references,
            candidates = summary.candidates,
            already_cached = summary.already_cached,
            pending = initial.len(),
            "Extracted references"
        );

        if initial.is_empty() {
            tracing::info!("Nothing to hydrate - every referenced tweet is already available");
            summary.cache_size = cache.len();
            return Ok(summary.finish());
        }

        summary.planned_requests = hydrate.planned_requests(initial.len());
        summary.estimated_credits = estimate_run_credits(initial.len(), hydrate.batch_size);
        tracing::info!(
            ids = initial.len(),
            requests = summary.planned_requests,
            estimated_credits = summary.estimated_credits,
            "Planned initial hydration"
        );
        if summary.planned_requests > hydrate.request_budget {
            tracing::warn!(
                requests = summary.planned_requests,
                budget = hydrate.request_budget,
                "Planned request count exceeds budget"
            );
        }

        // Walk
        let client = HydrationClient::new(self.lookup.clone(), hydrate);
        let walker = FrontierWalker::new(client, hydrate);
        let mut state = walker.start(initial).excluding(extraction.contained);
        let mut audit = FailureAudit::default();
        let mut unsaved = false;

        loop {
            let round = {
                let known = if hydrate.refresh { &empty } else { &cache };
                walker.step(&mut state, known, &mut audit).await
            };
            let Some(round) = round else {
                break;
            };

            if round.fetched.is_empty() {
                continue;
            }
            let merged = cache.merge(round.fetched, hydrate.refresh);
            summary.persisted.added += merged.added;
            summary.persisted.replaced += merged.replaced;
            summary.persisted.kept += merged.kept;
            unsaved = true;

            if hydrate.checkpoint_each_round {
                match cache.save(&self.config.cache_path) {
                    Ok(()) => {
                        unsaved = false;
                        tracing::info!(
                            depth = round.report.depth,
                            count = cache.len(),
                            "Checkpointed hydration cache"
                        );
                    }
                    Err(e) => {
                        tracing::error!(depth = round.report.depth, error = %e, "Checkpoint save failed");
                        summary
                            .persist_errors
                            .push(format!("checkpoint after round {}: {e}", round.report.depth));
                    }
                }
            }
        }

        for report in state.rounds() {
            summary.requested += report.requested;
            summary.hydrated += report.hydrated;
            summary.not_found += report.not_found;
            summary.failed += report.failed;
        }
        summary.rounds = state.rounds().to_vec();

        // Persist
        if unsaved {
            if let Err(e) = cache.save(&self.config.cache_path) {
                tracing::error!(
                    path = %self.config.cache_path.display(),
                    error = %e,
                    "Failed to save hydration cache"
                );
                summary.persist_errors.push(format!("final save: {e}"));
                summary.final_save_failed = true;
            } else {
                tracing::info!(
                    path = %self.config.cache_path.display(),
                    count = cache.len(),
                    "Saved hydration cache"
                );
            }
        }
        summary.cache_size = cache.len();

        if let Err(e) = audit.append_to(&self.config.failed_log_path) {
            tracing::error!(
                path = %self.config.failed_log_path.display(),
                error = %e,
                "Failed to write failed-ID log"
            );
            summary.persist_errors.push(format!("failed-ID log: {e}"));
        }

        tracing::info!(
            rounds = summary.rounds.len(),
            requested = summary.requested,
            hydrated = summary.hydrated,
            not_found = summary.not_found,
            failed = summary.failed,
            added = summary.persisted.added,
            "Hydration run complete"
        );

        Ok(summary.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::fake::FnLookup;
    use serde_json::json;
    use std::time::Duration;

    fn write_export(dir: &Path, name: &str, records: &[serde_json::Value]) {
        let content: String = records.iter().map(|r| format!("{r}\n")).collect();
        std::fs::write(dir.join(name), content).unwrap();
    }

    fn config(dir: &Path) -> PipelineConfig {
        let mut config = PipelineConfig::for_folder(dir);
        config.hydrate.pacing_delay = Duration::ZERO;
        config
    }

    #[test]
    fn test_estimate_run_credits() {
        assert_eq!(estimate_run_credits(0, 100), 0);
        assert_eq!(estimate_run_credits(1, 100), 15);
        assert_eq!(estimate_run_credits(250, 100), 3750);
    }

    #[test]
    fn test_scan_subtracts_contained_ids() {
        let dir = tempfile::tempdir().unwrap();
        write_export(
            dir.path(),
            "tweets_1.jsonl",
            &[
                json!({"id": "A", "parent_ids": ["P1"]}),
                json!({"id": "B", "quoted_status_id_str": "A"}),
            ],
        );

        let scan = scan_exports(dir.path(), &HydrateConfig::default()).unwrap();
        assert_eq!(scan.files.len(), 1);
        assert_eq!(scan.extraction.references.len(), 2);
        assert_eq!(
            scan.extraction.missing().into_iter().collect::<Vec<_>>(),
            vec![TweetId::parse("P1").unwrap()]
        );
    }

    #[test]
    fn test_scan_without_exports_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = scan_exports(dir.path(), &HydrateConfig::default()).unwrap_err();
        assert!(matches!(err, HydrateError::NoInputs(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        write_export(
            dir.path(),
            "likes_1.jsonl",
            &[
                json!({"id": "1", "in_reply_to_status_id_str": "10"}),
                json!({"id": "2", "quoted_status_id_str": "20"}),
            ],
        );
        let lookup = Arc::new(FnLookup::serving(vec![
            json!({"id": "10"}),
            json!({"id": "20", "quoted_tweet": {"id": "30"}}),
            json!({"id": "30"}),
        ]));
        let pipeline = Pipeline::new(config(dir.path()), lookup.clone());

        let first = pipeline.run().await.unwrap();
        assert_eq!(first.hydrated, 3);
        assert_eq!(first.rounds.len(), 2);
        assert_eq!(first.persisted.added, 3);
        assert!(dir.path().join(DEFAULT_CACHE_FILE).exists());

        let second = pipeline.run().await.unwrap();
        assert!(second.nothing_to_hydrate());
        assert_eq!(second.already_cached, 2);
        assert_eq!(second.cache_size, 3);
        assert_eq!(lookup.requested(), vec!["10", "20", "30"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quotes_of_exported_tweets_are_not_fetched() {
        let dir = tempfile::tempdir().unwrap();
        write_export(
            dir.path(),
            "tweets_1.jsonl",
            &[
                json!({"id": "X", "text": "mine"}),
                json!({"id": "Y", "quoted_status_id_str": "P1"}),
            ],
        );
        let lookup = Arc::new(FnLookup::serving(vec![
            json!({"id": "P1", "quoted_tweet": {"id": "X"}}),
            json!({"id": "X"}),
        ]));

        let summary = Pipeline::new(config(dir.path()), lookup.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(lookup.requested(), vec!["P1"]);
        assert_eq!(summary.cache_size, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_refetches_cached() {
        let dir = tempfile::tempdir().unwrap();
        write_export(
            dir.path(),
            "tweets_1.jsonl",
            &[json!({"id": "1", "quoted_status_id_str": "10"})],
        );
        let cached: HydrationCache = [(TweetId::parse("10").unwrap(), json!({"id": "10", "v": 1}))]
            .into_iter()
            .collect();
        cached.save(&dir.path().join(DEFAULT_CACHE_FILE)).unwrap();

        let lookup = Arc::new(FnLookup::serving(vec![json!({"id": "10", "v": 2})]));
        let mut config = config(dir.path());
        config.hydrate.refresh = true;

        let summary = Pipeline::new(config, lookup).run().await.unwrap();
        assert_eq!(summary.persisted.replaced, 1);

        let reloaded = HydrationCache::try_load(&dir.path().join(DEFAULT_CACHE_FILE)).unwrap();
        assert_eq!(reloaded.get("10").unwrap()["v"], 2);
    }

    #[tokio::test]
    async fn test_invalid_config_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.hydrate.batch_size = 0;

        let lookup = Arc::new(FnLookup::echo());
        let err = Pipeline::new(config, lookup.clone()).run().await.unwrap_err();
        assert!(matches!(err, HydrateError::Config(_)));
        assert!(lookup.calls().is_empty());
    }
}
