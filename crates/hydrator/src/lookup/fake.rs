//! Scripted in-memory lookup for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::TweetLookup;
use crate::error::LookupError;
use crate::tweet::{own_id, RawRecord, TweetId};

type Respond = dyn Fn(usize, &[TweetId]) -> Result<Vec<RawRecord>, LookupError> + Send + Sync;

/// Lookup driven by a closure of (call index, batch); records every call.
pub(crate) struct FnLookup {
    respond: Box<Respond>,
    calls: Mutex<Vec<Vec<TweetId>>>,
}

impl FnLookup {
    pub(crate) fn new(
        respond: impl Fn(usize, &[TweetId]) -> Result<Vec<RawRecord>, LookupError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every requested ID exists as `{"id": ...}`.
    pub(crate) fn echo() -> Self {
        Self::new(|_, batch| {
            Ok(batch
                .iter()
                .map(|id| serde_json::json!({"id": id.as_str()}))
                .collect())
        })
    }

    /// Serve a fixed set of remote records; anything else is absent.
    pub(crate) fn serving(records: Vec<RawRecord>) -> Self {
        let remote: HashMap<TweetId, RawRecord> = records
            .into_iter()
            .filter_map(|r| own_id(&r).map(|id| (id, r)))
            .collect();
        Self::new(move |_, batch| {
            Ok(batch
                .iter()
                .filter_map(|id| remote.get(id).cloned())
                .collect())
        })
    }

    /// Batches requested so far.
    pub(crate) fn calls(&self) -> Vec<Vec<TweetId>> {
        self.calls.lock().unwrap().clone()
    }

    /// Every ID requested so far, in request order.
    pub(crate) fn requested(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .flatten()
            .map(|id| id.as_str().to_string())
            .collect()
    }
}

#[async_trait]
impl TweetLookup for FnLookup {
    async fn lookup(&self, ids: &[TweetId]) -> Result<Vec<RawRecord>, LookupError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(ids.to_vec());
            calls.len() - 1
        };
        (self.respond)(call, ids)
    }
}
