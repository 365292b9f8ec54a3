//! Audit trail of IDs that failed hydration.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crate::error::HydrateError;
use crate::tweet::TweetId;

/// One failed ID and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedId {
    /// The ID whose batch exhausted its retries.
    pub id: TweetId,
    /// Last error seen for the batch.
    pub reason: String,
}

/// Failed IDs collected during a run, for operator inspection.
///
/// The file written by [`FailureAudit::append_to`] is additive evidence, not
/// authoritative state: the cache alone decides what gets re-fetched.
#[derive(Debug, Clone, Default)]
pub struct FailureAudit {
    entries: Vec<FailedId>,
    seen: HashSet<TweetId>,
}

impl FailureAudit {
    /// Record a failure; repeated IDs are kept once.
    pub fn record(&mut self, id: TweetId, reason: impl Into<String>) {
        if self.seen.insert(id.clone()) {
            self.entries.push(FailedId {
                id,
                reason: reason.into(),
            });
        }
    }

    /// Failures in the order they were recorded.
    pub fn entries(&self) -> &[FailedId] {
        &self.entries
    }

    /// Number of distinct failed IDs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing failed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append the failed IDs, one per line, to `path`.
    ///
    /// Earlier lines are never removed.
    pub fn append_to(&self, path: &Path) -> Result<(), HydrateError> {
        if self.is_empty() {
            return Ok(());
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut content = String::new();
        for entry in &self.entries {
            content.push_str(entry.id.as_str());
            content.push('\n');
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;

        tracing::info!(
            path = %path.display(),
            count = self.len(),
            "Saved failed tweet IDs"
        );
        Ok(())
    }
}
