//! Credential pool: configured keys, their shared status store and throttle
//!
//! `KeyPool` is constructed once and shared via `Arc`. Request execution
//! lives in `rotation`; this module holds construction and the operator
//! surface (status listing, resets, counts, health).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde::Serialize;
use tracing::info;

use crate::clock::now_millis;
use crate::credential::Credential;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::rotation::RotationPolicy;
use crate::status::{CredentialState, CredentialStatus};
use crate::store::StatusStore;

/// Status record of one configured credential, as shown to operators.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialStatusView {
    #[serde(flatten)]
    pub status: CredentialStatus,
    pub name: String,
    /// Last four characters of the key, masked
    pub key_hint: String,
}

/// Per-state counts over the configured credentials.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub total: usize,
    pub active: usize,
    pub quota_exhausted: usize,
    pub daily_limited: usize,
    pub permanently_blocked: usize,
}

impl PoolStats {
    pub(crate) fn summary(&self) -> String {
        format!(
            "{} of {} credentials available ({} quota exhausted, {} daily limited, {} permanently blocked)",
            self.active,
            self.total,
            self.quota_exhausted,
            self.daily_limited,
            self.permanently_blocked
        )
    }
}

/// Pool of API keys sharing one status store and one dispatcher.
pub struct KeyPool {
    pub(crate) credentials: Vec<Credential>,
    pub(crate) store: Arc<StatusStore>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) policy: RotationPolicy,
    pub(crate) next_index: AtomicUsize,
    pub(crate) cancelled: AtomicBool,
}

impl KeyPool {
    /// Build a pool over `credentials` in configuration order.
    pub fn new(
        credentials: Vec<Credential>,
        store: Arc<StatusStore>,
        dispatcher: Arc<Dispatcher>,
        policy: RotationPolicy,
    ) -> Self {
        info!(
            credentials = credentials.len(),
            max_attempts = policy.max_attempts,
            block_threshold = policy.block_threshold,
            min_interval_ms = dispatcher.min_interval().as_millis() as u64,
            "key pool initialized"
        );
        Self {
            credentials,
            store,
            dispatcher,
            policy,
            next_index: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn credentials(&self) -> &[Credential] {
        &self.credentials
    }

    pub fn store(&self) -> &Arc<StatusStore> {
        &self.store
    }

    pub fn policy(&self) -> &RotationPolicy {
        &self.policy
    }

    /// Status of every configured credential, in configuration order.
    pub async fn list_status(&self) -> Vec<CredentialStatusView> {
        self.list_status_at(now_millis()).await
    }

    /// Status at `now_ms`. A daily limit whose reset has passed is shown as
    /// active, the same way `stats_at` counts it.
    pub async fn list_status_at(&self, now_ms: u64) -> Vec<CredentialStatusView> {
        let snapshot = self.store.snapshot().await;
        self.credentials
            .iter()
            .map(|credential| {
                let mut status = snapshot
                    .get(&credential.id)
                    .cloned()
                    .unwrap_or_else(|| CredentialStatus::active(&credential.id));
                if status.daily_reset_due(now_ms) {
                    status.reactivate();
                }
                CredentialStatusView {
                    status,
                    name: credential.name.clone(),
                    key_hint: credential.secret.hint(),
                }
            })
            .collect()
    }

    /// Forget every status record; all credentials become active.
    pub async fn reset_all(&self) {
        self.store.clear_all().await;
    }

    /// Forget the status record of the credential named `name_or_id`.
    pub async fn reset_one(&self, name_or_id: &str) -> Result<()> {
        let credential = self
            .credentials
            .iter()
            .find(|c| c.matches(name_or_id))
            .ok_or_else(|| Error::NotFound(name_or_id.to_string()))?;
        self.store.clear_one(&credential.id).await;
        info!(credential_id = %credential.id, "credential reset by operator");
        Ok(())
    }

    pub async fn stats(&self) -> PoolStats {
        self.stats_at(now_millis()).await
    }

    /// Counts at `now_ms`. A daily limit whose reset has passed counts as active.
    pub async fn stats_at(&self, now_ms: u64) -> PoolStats {
        let snapshot = self.store.snapshot().await;
        let mut stats = PoolStats {
            total: self.credentials.len(),
            ..PoolStats::default()
        };
        for credential in &self.credentials {
            let Some(status) = snapshot.get(&credential.id) else {
                stats.active += 1;
                continue;
            };
            match status.status {
                _ if status.is_usable_at(now_ms) => stats.active += 1,
                CredentialState::QuotaExhausted => stats.quota_exhausted += 1,
                CredentialState::DailyLimited => stats.daily_limited += 1,
                CredentialState::PermanentlyBlocked => stats.permanently_blocked += 1,
                CredentialState::Active => stats.active += 1,
            }
        }
        stats
    }

    /// Pool health for the health endpoint.
    ///
    /// All credentials active → healthy, some → degraded, none → unhealthy.
    pub async fn health(&self) -> serde_json::Value {
        let now = now_millis();
        let stats = self.stats_at(now).await;
        let snapshot = self.store.snapshot().await;

        let credentials: Vec<_> = self
            .credentials
            .iter()
            .map(|c| {
                let status = snapshot
                    .get(&c.id)
                    .filter(|s| !s.is_usable_at(now))
                    .map_or("active", |s| s.status.label());
                serde_json::json!({
                    "id": c.id,
                    "name": c.name,
                    "status": status,
                })
            })
            .collect();

        let pool_status = if stats.active == stats.total && stats.total > 0 {
            "healthy"
        } else if stats.active > 0 {
            "degraded"
        } else {
            "unhealthy"
        };

        serde_json::json!({
            "status": pool_status,
            "credentials_total": stats.total,
            "credentials_active": stats.active,
            "credentials_quota_exhausted": stats.quota_exhausted,
            "credentials_daily_limited": stats.daily_limited,
            "credentials_permanently_blocked": stats.permanently_blocked,
            "credentials": credentials,
        })
    }

    /// Stop in-progress and future `execute` calls at their next attempt.
    ///
    /// Requests already dispatched run to completion.
    pub fn cancel(&self) {
        info!("key pool cancelled");
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
