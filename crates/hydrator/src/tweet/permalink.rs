//! Tweet permalink parsing.

use super::types::TweetId;

/// Extract the tweet ID from a status permalink (full or relative).
///
/// Accepts `https://x.com/user/status/123`, `https://twitter.com/user/status/123?s=20`,
/// `/user/status/123` and the `/i/web/status/123` form.
pub fn status_id(url: &str) -> Option<TweetId> {
    let path = if url.starts_with("http") {
        url.split('/').skip(3).collect::<Vec<_>>().join("/")
    } else {
        url.trim_start_matches('/').to_string()
    };

    let parts: Vec<&str> = path.split('/').collect();
    let position = parts.iter().position(|p| *p == "status" || *p == "statuses")?;
    if position == 0 {
        return None;
    }

    // Strip query parameters and fragments from the ID
    let raw = parts.get(position + 1)?;
    let id = raw.split(['?', '#']).next().unwrap_or(raw);

    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    TweetId::parse(id)
}
