//! Locally cached set of active allowlisted requests

use std::sync::{PoisonError, RwLock};
use wfsync_types::AllowlistedRequest;

#[derive(Debug, Default)]
struct AllowlistState {
    requests: Vec<AllowlistedRequest>,
    last_seen_total: u64,
}

/// Active allowlisted requests plus the ledger total they were read up to.
///
/// Writers replace the whole state under one lock, so readers never observe
/// a half-applied refresh.
#[derive(Debug, Default)]
pub struct AllowlistCache {
    state: RwLock<AllowlistState>,
}

impl AllowlistCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the cached requests
    pub fn requests(&self) -> Vec<AllowlistedRequest> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .requests
            .clone()
    }

    pub fn last_seen_total(&self) -> u64 {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last_seen_total
    }

    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .requests
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop requests expired at `now_secs`, append `new_requests` and record `total`.
    ///
    /// Returns how many cached requests were pruned.
    pub fn apply(
        &self,
        new_requests: Vec<AllowlistedRequest>,
        total: u64,
        now_secs: i64,
    ) -> usize {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let before = state.requests.len();
        state.requests.retain(|request| !request.is_expired_at(now_secs));
        let pruned = before - state.requests.len();

        state.requests.extend(
            new_requests
                .into_iter()
                .filter(|request| !request.is_expired_at(now_secs)),
        );
        state.last_seen_total = total;
        pruned
    }
}
