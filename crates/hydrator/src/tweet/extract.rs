//! Reference extraction from heterogeneous tweet records.
//!
//! Exports and API responses nest reply/quote/retweet links differently, so
//! extraction is an ordered table of [`Strategy`] probes. For each record and
//! each reference kind, the first probe that yields an ID wins; later layouts
//! are never merged in for the same kind.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde_json::Value;

use super::permalink;
use super::types::{RawRecord, Reference, ReferenceKind, TweetId};
use crate::config::{HydrateConfig, ParentIdsPolicy};

/// Pure probe over one record layout.
pub type Probe = fn(&RawRecord) -> Option<TweetId>;

/// One tagged extraction strategy.
#[derive(Clone, Copy)]
pub struct Strategy {
    /// Layout name, for debug logs.
    pub name: &'static str,
    /// Kind of reference this layout encodes.
    pub kind: ReferenceKind,
    /// Only consulted when no structured reply or quote layout matched.
    pub fallback: bool,
    probe: Probe,
}

impl Strategy {
    const fn new(name: &'static str, kind: ReferenceKind, probe: Probe) -> Self {
        Self {
            name,
            kind,
            fallback: false,
            probe,
        }
    }

    const fn fallback(name: &'static str, kind: ReferenceKind, probe: Probe) -> Self {
        Self {
            name,
            kind,
            fallback: true,
            probe,
        }
    }

    /// Run the probe.
    #[must_use]
    pub fn probe(&self, record: &RawRecord) -> Option<TweetId> {
        (self.probe)(record)
    }
}

impl std::fmt::Debug for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strategy")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Field access
// ============================================================================

fn at<'a>(record: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(record, |value, key| value.get(key))
}

fn id_at(record: &Value, path: &[&str]) -> Option<TweetId> {
    at(record, path).and_then(TweetId::from_value)
}

/// `rest_id` of a GraphQL `*_result` wrapper, unwrapping visibility results.
fn graphql_rest_id(wrapper: Option<&Value>) -> Option<TweetId> {
    let result = wrapper?.get("result")?;
    id_at(result, &["rest_id"]).or_else(|| id_at(result, &["tweet", "rest_id"]))
}

/// ID from an API v2 `referenced_tweets` entry of the given type.
fn referenced_tweet(record: &Value, kind: &str) -> Option<TweetId> {
    record
        .get("referenced_tweets")?
        .as_array()?
        .iter()
        .filter(|r| r.get("type").and_then(Value::as_str) == Some(kind))
        .find_map(|r| r.get("id").and_then(TweetId::from_value))
}

fn permalink_at(record: &Value, path: &[&str]) -> Option<TweetId> {
    at(record, path)
        .and_then(Value::as_str)
        .and_then(permalink::status_id)
}

/// The record's own ID across every known layout.
#[must_use]
pub fn own_id(record: &RawRecord) -> Option<TweetId> {
    id_at(record, &["tweet_id"])
        .or_else(|| id_at(record, &["id_str"]))
        .or_else(|| id_at(record, &["id"]))
        .or_else(|| id_at(record, &["rest_id"]))
        .or_else(|| id_at(record, &["raw", "rest_id"]))
}

// ============================================================================
// Structured layouts
// ============================================================================

fn flat_reply(r: &RawRecord) -> Option<TweetId> {
    id_at(r, &["in_reply_to_status_id_str"])
}

fn legacy_reply(r: &RawRecord) -> Option<TweetId> {
    id_at(r, &["legacy", "in_reply_to_status_id_str"])
}

fn raw_legacy_reply(r: &RawRecord) -> Option<TweetId> {
    id_at(r, &["raw", "legacy", "in_reply_to_status_id_str"])
}

fn api_reply(r: &RawRecord) -> Option<TweetId> {
    id_at(r, &["inReplyToId"])
}

fn v2_reply(r: &RawRecord) -> Option<TweetId> {
    referenced_tweet(r, "replied_to")
}

fn flat_quote(r: &RawRecord) -> Option<TweetId> {
    id_at(r, &["quoted_status_id_str"])
}

fn legacy_quote(r: &RawRecord) -> Option<TweetId> {
    id_at(r, &["legacy", "quoted_status_id_str"])
}

fn raw_legacy_quote(r: &RawRecord) -> Option<TweetId> {
    id_at(r, &["raw", "legacy", "quoted_status_id_str"])
}

fn graphql_quote(r: &RawRecord) -> Option<TweetId> {
    graphql_rest_id(at(r, &["raw", "quoted_status_result"]))
        .or_else(|| graphql_rest_id(at(r, &["quoted_status_result"])))
}

fn api_quote(r: &RawRecord) -> Option<TweetId> {
    id_at(r, &["quoted_tweet", "id"]).or_else(|| id_at(r, &["quoted_tweet", "id_str"]))
}

fn v2_quote(r: &RawRecord) -> Option<TweetId> {
    referenced_tweet(r, "quoted")
}

fn permalink_quote(r: &RawRecord) -> Option<TweetId> {
    permalink_at(r, &["quoted_status_permalink", "expanded"])
        .or_else(|| permalink_at(r, &["legacy", "quoted_status_permalink", "expanded"]))
        .or_else(|| permalink_at(r, &["raw", "legacy", "quoted_status_permalink", "expanded"]))
}

fn flat_retweet(r: &RawRecord) -> Option<TweetId> {
    id_at(r, &["retweeted_status_id_str"])
}

fn legacy_retweet(r: &RawRecord) -> Option<TweetId> {
    graphql_rest_id(at(r, &["legacy", "retweeted_status_result"]))
}

fn raw_retweet(r: &RawRecord) -> Option<TweetId> {
    graphql_rest_id(at(r, &["raw", "retweeted_status_result"]))
        .or_else(|| graphql_rest_id(at(r, &["raw", "legacy", "retweeted_status_result"])))
}

fn api_retweet(r: &RawRecord) -> Option<TweetId> {
    id_at(r, &["retweeted_tweet", "id"]).or_else(|| id_at(r, &["retweeted_tweet", "id_str"]))
}

fn v2_retweet(r: &RawRecord) -> Option<TweetId> {
    referenced_tweet(r, "retweeted")
}

/// Structured layouts in priority order. `parent_ids` strategies are appended
/// per policy by [`ReferenceExtractor::new`].
const STRUCTURED: &[Strategy] = &[
    Strategy::new("in_reply_to_status_id_str", ReferenceKind::ReplyParent, flat_reply),
    Strategy::new("legacy.in_reply_to_status_id_str", ReferenceKind::ReplyParent, legacy_reply),
    Strategy::new("raw.legacy.in_reply_to_status_id_str", ReferenceKind::ReplyParent, raw_legacy_reply),
    Strategy::new("inReplyToId", ReferenceKind::ReplyParent, api_reply),
    Strategy::new("referenced_tweets.replied_to", ReferenceKind::ReplyParent, v2_reply),
    Strategy::new("quoted_status_id_str", ReferenceKind::Quoted, flat_quote),
    Strategy::new("legacy.quoted_status_id_str", ReferenceKind::Quoted, legacy_quote),
    Strategy::new("raw.legacy.quoted_status_id_str", ReferenceKind::Quoted, raw_legacy_quote),
    Strategy::new("quoted_status_result", ReferenceKind::Quoted, graphql_quote),
    Strategy::new("quoted_tweet.id", ReferenceKind::Quoted, api_quote),
    Strategy::new("referenced_tweets.quoted", ReferenceKind::Quoted, v2_quote),
    Strategy::new("quoted_status_permalink", ReferenceKind::Quoted, permalink_quote),
    Strategy::new("retweeted_status_id_str", ReferenceKind::RetweetedOriginal, flat_retweet),
    Strategy::new("legacy.retweeted_status_result", ReferenceKind::RetweetedOriginal, legacy_retweet),
    Strategy::new("raw.retweeted_status_result", ReferenceKind::RetweetedOriginal, raw_retweet),
    Strategy::new("retweeted_tweet.id", ReferenceKind::RetweetedOriginal, api_retweet),
    Strategy::new("referenced_tweets.retweeted", ReferenceKind::RetweetedOriginal, v2_retweet),
];

// ============================================================================
// parent_ids fallback (export format A)
// ============================================================================

fn counter(r: &RawRecord, key: &str) -> i64 {
    match r.get(key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn parent_ids(r: &RawRecord) -> &[Value] {
    r.get("parent_ids")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Positions of (reply parent, quoted) inside `parent_ids`.
type Slots = (Option<usize>, Option<usize>);

fn heuristic_slots(r: &RawRecord) -> Slots {
    let len = parent_ids(r).len();
    if len == 0 {
        (None, None)
    } else if counter(r, "reply") > 0 {
        (Some(0), None)
    } else if counter(r, "quote") > 0 {
        (None, Some(0))
    } else {
        positional_slots(r)
    }
}

fn positional_slots(r: &RawRecord) -> Slots {
    match parent_ids(r).len() {
        0 => (None, None),
        1 => (Some(0), None),
        _ => (Some(0), Some(1)),
    }
}

fn parent_slot(r: &RawRecord, slot: Option<usize>) -> Option<TweetId> {
    parent_ids(r).get(slot?).and_then(TweetId::from_value)
}

fn parent_ids_reply_heuristic(r: &RawRecord) -> Option<TweetId> {
    parent_slot(r, heuristic_slots(r).0)
}

fn parent_ids_quote_heuristic(r: &RawRecord) -> Option<TweetId> {
    parent_slot(r, heuristic_slots(r).1)
}

fn parent_ids_reply_positional(r: &RawRecord) -> Option<TweetId> {
    parent_slot(r, positional_slots(r).0)
}

fn parent_ids_quote_positional(r: &RawRecord) -> Option<TweetId> {
    parent_slot(r, positional_slots(r).1)
}

fn parent_ids_strategies(policy: ParentIdsPolicy) -> [Strategy; 2] {
    match policy {
        ParentIdsPolicy::Heuristic => [
            Strategy::fallback("parent_ids", ReferenceKind::ReplyParent, parent_ids_reply_heuristic),
            Strategy::fallback("parent_ids", ReferenceKind::Quoted, parent_ids_quote_heuristic),
        ],
        ParentIdsPolicy::Positional => [
            Strategy::fallback("parent_ids", ReferenceKind::ReplyParent, parent_ids_reply_positional),
            Strategy::fallback("parent_ids", ReferenceKind::Quoted, parent_ids_quote_positional),
        ],
    }
}

// ============================================================================
// Extractor
// ============================================================================

/// Accumulated result of scanning a record stream.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Deduplicated references.
    pub references: BTreeSet<Reference>,
    /// IDs of the scanned records themselves.
    pub contained: HashSet<TweetId>,
    /// Records scanned successfully.
    pub records_scanned: usize,
    /// Lines or records skipped as malformed.
    pub malformed: usize,
}

impl Extraction {
    /// Count a malformed line.
    pub fn record_malformed(&mut self) {
        self.malformed += 1;
    }

    /// Every referenced ID, deduplicated.
    #[must_use]
    pub fn targets(&self) -> BTreeSet<TweetId> {
        self.references.iter().map(|r| r.target.clone()).collect()
    }

    /// Referenced IDs that are not contained in the scanned records.
    #[must_use]
    pub fn missing(&self) -> BTreeSet<TweetId> {
        self.references
            .iter()
            .filter(|r| !self.contained.contains(&r.target))
            .map(|r| r.target.clone())
            .collect()
    }

    /// Reference counts per kind.
    #[must_use]
    pub fn counts_by_kind(&self) -> BTreeMap<ReferenceKind, usize> {
        let mut counts = BTreeMap::new();
        for reference in &self.references {
            *counts.entry(reference.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Fold another extraction into this one.
    pub fn absorb(&mut self, other: Extraction) {
        self.references.extend(other.references);
        self.contained.extend(other.contained);
        self.records_scanned += other.records_scanned;
        self.malformed += other.malformed;
    }
}

/// Probe one strategy unless its kind is already resolved.
///
/// Returns whether a reply or quote layout matched, self-references included.
fn apply(
    strategy: &Strategy,
    record: &RawRecord,
    source: Option<&TweetId>,
    found: &mut Vec<Reference>,
) -> bool {
    if found.iter().any(|r| r.kind == strategy.kind) {
        return false;
    }
    let Some(target) = strategy.probe(record) else {
        return false;
    };
    let linked = strategy.kind != ReferenceKind::RetweetedOriginal;
    if source == Some(&target) {
        tracing::debug!(id = %target, layout = strategy.name, "Ignoring self-reference");
        return linked;
    }
    tracing::trace!(referenced = %target, kind = %strategy.kind, layout = strategy.name, "Found reference");
    found.push(Reference::new(source.cloned(), target, strategy.kind));
    linked
}

/// Extracts references using an ordered strategy table.
#[derive(Debug, Clone)]
pub struct ReferenceExtractor {
    strategies: Vec<Strategy>,
}

impl ReferenceExtractor {
    /// Create an extractor for every reference kind.
    #[must_use]
    pub fn new(policy: ParentIdsPolicy) -> Self {
        let mut strategies = STRUCTURED.to_vec();
        strategies.extend(parent_ids_strategies(policy));
        // Stable sort keeps priority order within each kind
        strategies.sort_by_key(|s| s.kind);
        Self { strategies }
    }

    /// Create an extractor from engine configuration.
    #[must_use]
    pub fn from_config(config: &HydrateConfig) -> Self {
        Self::new(config.parent_ids_policy)
    }

    /// Restrict extraction to a single kind.
    #[must_use]
    pub fn only(mut self, kind: ReferenceKind) -> Self {
        self.strategies.retain(|s| s.kind == kind);
        self
    }

    /// The strategy table, in priority order.
    #[must_use]
    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    /// References of a single record: at most one per kind.
    #[must_use]
    pub fn references_of(&self, record: &RawRecord) -> Vec<Reference> {
        let source = own_id(record);
        let mut found: Vec<Reference> = Vec::new();
        let mut linked = false;

        for strategy in self.strategies.iter().filter(|s| !s.fallback) {
            linked |= apply(strategy, record, source.as_ref(), &mut found);
        }
        if !linked {
            for strategy in self.strategies.iter().filter(|s| s.fallback) {
                apply(strategy, record, source.as_ref(), &mut found);
            }
        }

        found
    }

    /// Scan one record into an extraction. Non-object records count as malformed.
    pub fn scan(&self, extraction: &mut Extraction, record: &RawRecord) {
        if !record.is_object() {
            extraction.record_malformed();
            return;
        }
        extraction.records_scanned += 1;
        if let Some(id) = own_id(record) {
            extraction.contained.insert(id);
        }
        extraction.references.extend(self.references_of(record));
    }

    /// Extract references from parsed records.
    pub fn extract<'a, I>(&self, records: I) -> Extraction
    where
        I: IntoIterator<Item = &'a RawRecord>,
    {
        let mut extraction = Extraction::default();
        for record in records {
            self.scan(&mut extraction, record);
        }
        extraction
    }
}

impl Default for ReferenceExtractor {
    fn default() -> Self {
        Self::new(ParentIdsPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tid(s: &str) -> TweetId {
        TweetId::parse(s).unwrap()
    }

    fn kinds_of(refs: &[Reference]) -> Vec<(ReferenceKind, String)> {
        refs.iter()
            .map(|r| (r.kind, r.target.as_str().to_string()))
            .collect()
    }

    #[test]
    fn test_overlapping_layouts_queue_one_target() {
        let extractor = ReferenceExtractor::default();
        let records = [
            json!({"id": "A", "parent_ids": ["P1"]}),
            json!({"id": "B", "quoted_status_id_str": "P1"}),
        ];

        let extraction = extractor.extract(records.iter());

        let expected: BTreeSet<Reference> = [
            Reference::new(Some(tid("A")), tid("P1"), ReferenceKind::ReplyParent),
            Reference::new(Some(tid("B")), tid("P1"), ReferenceKind::Quoted),
        ]
        .into_iter()
        .collect();
        assert_eq!(extraction.references, expected);
        assert_eq!(extraction.missing(), [tid("P1")].into_iter().collect());
    }

    #[test]
    fn test_first_layout_wins_per_kind() {
        let extractor = ReferenceExtractor::default();
        let record = json!({
            "tweet_id": "10",
            "quoted_status_id_str": "Q-flat",
            "raw": {"legacy": {"quoted_status_id_str": "Q-raw", "in_reply_to_status_id_str": "R-raw"}}
        });

        let refs = extractor.references_of(&record);

        assert_eq!(
            kinds_of(&refs),
            vec![
                (ReferenceKind::ReplyParent, "R-raw".to_string()),
                (ReferenceKind::Quoted, "Q-flat".to_string()),
            ]
        );
    }

    #[test]
    fn test_graphql_export_layout() {
        let extractor = ReferenceExtractor::default();
        let record = json!({
            "tweet_id": "1",
            "parent_ids": ["999"],
            "raw": {
                "rest_id": "1",
                "legacy": {"in_reply_to_status_id_str": "2", "quoted_status_id_str": null},
                "quoted_status_result": {"result": {"__typename": "TweetWithVisibilityResults", "tweet": {"rest_id": "3"}}},
                "retweeted_status_result": {"result": {"rest_id": "4"}}
            }
        });

        let refs = extractor.references_of(&record);

        // parent_ids is ignored because structured layouts are present
        assert_eq!(
            kinds_of(&refs),
            vec![
                (ReferenceKind::ReplyParent, "2".to_string()),
                (ReferenceKind::Quoted, "3".to_string()),
                (ReferenceKind::RetweetedOriginal, "4".to_string()),
            ]
        );
    }

    #[test]
    fn test_api_response_layout() {
        let extractor = ReferenceExtractor::default();
        let record = json!({
            "id": "100",
            "inReplyToId": "101",
            "quoted_tweet": {"id": "102", "text": "quoted"},
            "retweeted_tweet": null
        });

        let refs = extractor.references_of(&record);

        assert_eq!(
            kinds_of(&refs),
            vec![
                (ReferenceKind::ReplyParent, "101".to_string()),
                (ReferenceKind::Quoted, "102".to_string()),
            ]
        );
    }

    #[test]
    fn test_v2_referenced_tweets_and_permalink() {
        let extractor = ReferenceExtractor::default();
        let v2 = json!({
            "id": "5",
            "referenced_tweets": [{"type": "replied_to", "id": "6"}, {"type": "retweeted", "id": "7"}]
        });
        assert_eq!(
            kinds_of(&extractor.references_of(&v2)),
            vec![
                (ReferenceKind::ReplyParent, "6".to_string()),
                (ReferenceKind::RetweetedOriginal, "7".to_string()),
            ]
        );

        let permalink = json!({
            "id_str": "8",
            "legacy": {"quoted_status_permalink": {"expanded": "https://twitter.com/u/status/9"}}
        });
        assert_eq!(
            kinds_of(&extractor.references_of(&permalink)),
            vec![(ReferenceKind::Quoted, "9".to_string())]
        );
    }

    #[test]
    fn test_parent_ids_heuristic_order() {
        let extractor = ReferenceExtractor::new(ParentIdsPolicy::Heuristic);

        let reply = json!({"tweet_id": "1", "parent_ids": ["a", "b"], "reply": 1});
        assert_eq!(
            kinds_of(&extractor.references_of(&reply)),
            vec![(ReferenceKind::ReplyParent, "a".to_string())]
        );

        let quote = json!({"tweet_id": "1", "parent_ids": ["a", "b"], "reply": 0, "quote": 2});
        assert_eq!(
            kinds_of(&extractor.references_of(&quote)),
            vec![(ReferenceKind::Quoted, "a".to_string())]
        );

        let both = json!({"tweet_id": "1", "parent_ids": ["a", "b"]});
        assert_eq!(
            kinds_of(&extractor.references_of(&both)),
            vec![
                (ReferenceKind::ReplyParent, "a".to_string()),
                (ReferenceKind::Quoted, "b".to_string()),
            ]
        );
    }

    #[test]
    fn test_parent_ids_positional_ignores_counters() {
        let extractor = ReferenceExtractor::new(ParentIdsPolicy::Positional);
        let record = json!({"tweet_id": "1", "parent_ids": ["a"], "quote": 1});
        assert_eq!(
            kinds_of(&extractor.references_of(&record)),
            vec![(ReferenceKind::ReplyParent, "a".to_string())]
        );
    }

    #[test]
    fn test_excludes_empty_and_self_references() {
        let extractor = ReferenceExtractor::default();
        let record = json!({
            "id": "42",
            "in_reply_to_status_id_str": "",
            "quoted_status_id_str": "42",
            "legacy": {"quoted_status_id_str": "43"}
        });

        // Blank reply layouts fall through; the self-quote is skipped and the
        // next quote layout is used instead
        assert_eq!(
            kinds_of(&extractor.references_of(&record)),
            vec![(ReferenceKind::Quoted, "43".to_string())]
        );
    }

    #[test]
    fn test_only_quoted() {
        let extractor = ReferenceExtractor::default().only(ReferenceKind::Quoted);
        assert!(extractor
            .strategies()
            .iter()
            .all(|s| s.kind == ReferenceKind::Quoted));

        let record = json!({"id": "1", "inReplyToId": "2", "quoted_tweet": {"id": "3"}});
        assert_eq!(
            kinds_of(&extractor.references_of(&record)),
            vec![(ReferenceKind::Quoted, "3".to_string())]
        );
    }

    #[test]
    fn test_structured_link_suppresses_parent_ids() {
        let extractor = ReferenceExtractor::default();

        // A structured quote means parent_ids is not read for the reply slot either
        let record = json!({"id": "1", "quoted_status_id_str": "q", "parent_ids": ["a", "b"]});
        assert_eq!(
            kinds_of(&extractor.references_of(&record)),
            vec![(ReferenceKind::Quoted, "q".to_string())]
        );

        // A retweet layout does not count as a reply or quote link
        let retweet = json!({"id": "2", "retweeted_status_id_str": "r", "parent_ids": ["a"]});
        assert_eq!(
            kinds_of(&extractor.references_of(&retweet)),
            vec![
                (ReferenceKind::RetweetedOriginal, "r".to_string()),
                (ReferenceKind::ReplyParent, "a".to_string()),
            ]
        );
    }

    #[test]
    fn test_fallback_strategies_sort_last_within_kind() {
        let extractor = ReferenceExtractor::default();
        for kind in [ReferenceKind::ReplyParent, ReferenceKind::Quoted] {
            let of_kind: Vec<&Strategy> = extractor
                .strategies()
                .iter()
                .filter(|s| s.kind == kind)
                .collect();
            assert!(of_kind.last().is_some_and(|s| s.fallback));
            assert_eq!(of_kind.iter().filter(|s| s.fallback).count(), 1);
        }
    }

    #[test]
    fn test_counts_by_kind() {
        let extractor = ReferenceExtractor::default();
        let records = [
            json!({"id": "1", "inReplyToId": "9"}),
            json!({"id": "2", "inReplyToId": "9"}),
            json!({"id": "3", "quoted_tweet": {"id": "9"}}),
        ];
        let counts = extractor.extract(records.iter()).counts_by_kind();
        assert_eq!(counts.get(&ReferenceKind::ReplyParent), Some(&2));
        assert_eq!(counts.get(&ReferenceKind::Quoted), Some(&1));
        assert_eq!(counts.get(&ReferenceKind::RetweetedOriginal), None);
    }
}
