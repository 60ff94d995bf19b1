//! Credential status store
//!
//! Process-wide record of every credential's health, loaded once at startup
//! and written back after every mutation. Read-modify-write sequences run
//! under one tokio Mutex, so concurrent requests never interleave updates.
//!
//! Persistence is best-effort from the caller's side: a failed load starts
//! the store empty (every credential considered active), and a failed save is
//! logged without failing the request that triggered it.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::persistence::{Persistence, StatusMap};
use crate::status::CredentialStatus;

/// Status records plus the adapter that persists them.
pub struct StatusStore {
    persistence: Arc<dyn Persistence>,
    state: Mutex<StatusMap>,
}

impl StatusStore {
    /// Load the store from `persistence`. Never fails.
    pub async fn load(persistence: Arc<dyn Persistence>) -> Self {
        let state = match persistence.load().await {
            Ok(map) => {
                info!(records = map.len(), "loaded credential statuses");
                map
            }
            Err(e) => {
                warn!(error = %e, "could not load credential statuses, treating all credentials as active");
                StatusMap::new()
            }
        };
        Self {
            persistence,
            state: Mutex::new(state),
        }
    }

    /// Status of `id`, or a fresh active record when none exists.
    pub async fn get(&self, id: &str) -> CredentialStatus {
        let state = self.state.lock().await;
        state
            .get(id)
            .cloned()
            .unwrap_or_else(|| CredentialStatus::active(id))
    }

    /// Clone of every stored record.
    pub async fn snapshot(&self) -> StatusMap {
        self.state.lock().await.clone()
    }

    /// Mark a successful use: active, zero failures, `lastUsedAt` stamped.
    pub async fn record_success(&self, id: &str, now_ms: u64) {
        self.update(id, |s| s.mark_success(now_ms)).await;
    }

    /// Record a non-daily quota failure; returns the updated record.
    pub async fn record_quota_failure(
        &self,
        id: &str,
        message: &str,
        block_threshold: u32,
        now_ms: u64,
    ) -> CredentialStatus {
        self.update(id, |s| s.mark_quota_failure(message, block_threshold, now_ms))
            .await
    }

    /// Record a daily quota failure that clears at `reset_at`; returns the updated record.
    pub async fn record_daily_limit(
        &self,
        id: &str,
        message: &str,
        reset_at: u64,
        now_ms: u64,
    ) -> CredentialStatus {
        self.update(id, |s| s.mark_daily_limit(message, reset_at, now_ms))
            .await
    }

    /// Remove every record.
    pub async fn clear_all(&self) {
        self.mutate(|state| {
            let cleared = state.len();
            state.clear();
            info!(cleared, "cleared all credential statuses");
            ((), true)
        })
        .await
    }

    /// Remove the record for `id`. Returns whether one existed.
    pub async fn clear_one(&self, id: &str) -> bool {
        self.mutate(|state| {
            let existed = state.remove(id).is_some();
            if existed {
                info!(credential_id = id, "cleared credential status");
            }
            (existed, existed)
        })
        .await
    }

    /// Apply `f` to the record of `id` (created active if absent) and persist.
    async fn update(&self, id: &str, f: impl FnOnce(&mut CredentialStatus)) -> CredentialStatus {
        self.mutate(|state| {
            let status = state
                .entry(id.to_string())
                .or_insert_with(|| CredentialStatus::active(id));
            f(status);
            (status.clone(), true)
        })
        .await
    }

    /// Run a read-modify-write on the whole map under the lock.
    ///
    /// `f` returns its result and whether it changed anything; changed maps
    /// are persisted before the lock is released.
    pub(crate) async fn mutate<R>(&self, f: impl FnOnce(&mut StatusMap) -> (R, bool)) -> R {
        let mut state = self.state.lock().await;
        let (result, dirty) = f(&mut state);
        if dirty {
            self.persist(&state).await;
        }
        result
    }

    async fn persist(&self, state: &StatusMap) {
        match self.persistence.save(state).await {
            Ok(()) => debug!(records = state.len(), "credential statuses saved"),
            Err(e) => warn!(error = %e, "failed to persist credential statuses"),
        }
    }
}
