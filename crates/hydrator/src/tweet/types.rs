//! Tweet identity, references and fetch outcomes.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One exported or fetched tweet, in whatever shape its source produced.
///
/// Records are read defensively: every field is optional.
pub type RawRecord = Value;

/// Opaque tweet identifier.
///
/// IDs are numeric in practice but kept as strings to avoid precision loss.
/// Identity is exact string equality after trimming.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TweetId(String);

impl<'de> Deserialize<'de> for TweetId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).ok_or_else(|| serde::de::Error::custom("tweet ID must not be blank"))
    }
}

impl TweetId {
    /// Normalize a raw string; blank input is not an ID.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// Normalize a JSON value: strings are trimmed, integers rendered in
    /// decimal. Floats, booleans, null and containers are rejected.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Self::parse(s),
            Value::Number(n) if n.is_u64() || n.is_i64() => Some(Self(n.to_string())),
            _ => None,
        }
    }

    /// Borrow the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TweetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TweetId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for TweetId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// How one tweet points at another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    /// The tweet replies to the target.
    ReplyParent,
    /// The tweet quotes the target.
    Quoted,
    /// The tweet is a retweet of the target.
    RetweetedOriginal,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReplyParent => write!(f, "reply_parent"),
            Self::Quoted => write!(f, "quoted"),
            Self::RetweetedOriginal => write!(f, "retweeted_original"),
        }
    }
}

/// Directed edge from a record to a tweet it references.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reference {
    /// ID of the referencing record, when it carries one.
    pub source: Option<TweetId>,
    /// Referenced tweet.
    pub target: TweetId,
    /// Relationship.
    pub kind: ReferenceKind,
}

impl Reference {
    /// Create a new reference.
    #[must_use]
    pub fn new(source: Option<TweetId>, target: TweetId, kind: ReferenceKind) -> Self {
        Self {
            source,
            target,
            kind,
        }
    }
}

/// Result of hydrating one requested ID.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// The API returned the record.
    Hydrated(RawRecord),
    /// The API answered but omitted the ID (deleted, protected, suspended).
    NotFound,
    /// The request could not be completed after exhausting retries.
    Failed(String),
}

impl FetchOutcome {
    /// Whether a record was obtained.
    #[must_use]
    pub fn is_hydrated(&self) -> bool {
        matches!(self, Self::Hydrated(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tweet_id_normalization() {
        assert_eq!(TweetId::parse("  123 ").unwrap().as_str(), "123");
        assert_eq!(TweetId::parse("   "), None);
        assert_eq!(
            TweetId::from_value(&json!(1_234_567_890_123_456_789_u64))
                .unwrap()
                .as_str(),
            "1234567890123456789"
        );
        assert_eq!(TweetId::from_value(&json!(1.5)), None);
        assert_eq!(TweetId::from_value(&json!(null)), None);
        assert_eq!(TweetId::from_value(&json!(true)), None);
        assert_eq!(TweetId::from_value(&json!(["1"])), None);
    }

    #[test]
    fn test_tweet_id_serializes_as_string() {
        let id = TweetId::parse("42").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"42\"");
    }

    #[test]
    fn test_tweet_id_deserialize_normalizes() {
        let id: TweetId = serde_json::from_str("\" 42 \"").unwrap();
        assert_eq!(id.as_str(), "42");
        assert!(serde_json::from_str::<TweetId>("\"\"").is_err());
        assert!(serde_json::from_str::<TweetId>("\"  \"").is_err());
    }

    #[test]
    fn test_reference_kind_display() {
        assert_eq!(ReferenceKind::ReplyParent.to_string(), "reply_parent");
        assert_eq!(
            serde_json::to_string(&ReferenceKind::RetweetedOriginal).unwrap(),
            "\"retweeted_original\""
        );
    }
}
