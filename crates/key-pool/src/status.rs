//! Per-credential health record and its state transitions
//!
//! Transitions:
//! - Active → QuotaExhausted (quota failure, below block threshold)
//! - Active → PermanentlyBlocked (quota failure count reaches threshold)
//! - Active → DailyLimited (quota failure carrying a daily marker)
//! - DailyLimited → Active (reset time passed, on the next availability check)
//! - any → Active (successful use)
//! - any → removed (operator reset)

use serde::{Deserialize, Serialize};

/// Health state of a credential. Only `Active` is selectable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialState {
    Active,
    QuotaExhausted,
    DailyLimited,
    PermanentlyBlocked,
}

impl CredentialState {
    /// Status label for health/logging.
    pub fn label(&self) -> &'static str {
        match self {
            CredentialState::Active => "active",
            CredentialState::QuotaExhausted => "quota_exhausted",
            CredentialState::DailyLimited => "daily_limited",
            CredentialState::PermanentlyBlocked => "permanently_blocked",
        }
    }
}

/// Mutable health record for one credential, persisted as JSON.
///
/// Timestamps are unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialStatus {
    pub id: String,
    pub status: CredentialState,
    #[serde(default)]
    pub failure_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exhausted_at: Option<u64>,
    /// Only meaningful for `DailyLimited`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<u64>,
}

impl CredentialStatus {
    /// The implicit record of a credential that has never been touched.
    pub fn active(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: CredentialState::Active,
            failure_count: 0,
            last_error: None,
            exhausted_at: None,
            reset_at: None,
            last_used_at: None,
        }
    }

    /// Whether a daily limit has run out at `now_ms`.
    ///
    /// A daily-limited record without a reset time is treated as expired.
    pub fn daily_reset_due(&self, now_ms: u64) -> bool {
        self.status == CredentialState::DailyLimited && self.reset_at.is_none_or(|at| now_ms >= at)
    }

    /// Whether the credential may be selected at `now_ms`, without mutating anything.
    pub fn is_usable_at(&self, now_ms: u64) -> bool {
        match self.status {
            CredentialState::Active => true,
            CredentialState::DailyLimited => self.daily_reset_due(now_ms),
            CredentialState::QuotaExhausted | CredentialState::PermanentlyBlocked => false,
        }
    }

    /// Successful use: back to active regardless of prior state.
    pub fn mark_success(&mut self, now_ms: u64) {
        self.status = CredentialState::Active;
        self.failure_count = 0;
        self.last_error = None;
        self.reset_at = None;
        self.last_used_at = Some(now_ms);
    }

    /// Quota failure without a daily marker. Escalates to permanently blocked
    /// once `failure_count` reaches `block_threshold`.
    pub fn mark_quota_failure(&mut self, message: &str, block_threshold: u32, now_ms: u64) {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_error = Some(message.to_string());
        self.exhausted_at = Some(now_ms);
        self.reset_at = None;
        self.status = if self.failure_count >= block_threshold {
            CredentialState::PermanentlyBlocked
        } else {
            CredentialState::QuotaExhausted
        };
    }

    /// Daily quota failure. `reset_at` is clamped to be strictly in the future.
    pub fn mark_daily_limit(&mut self, message: &str, reset_at: u64, now_ms: u64) {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_error = Some(message.to_string());
        self.exhausted_at = Some(now_ms);
        self.reset_at = Some(reset_at.max(now_ms + 1));
        self.status = CredentialState::DailyLimited;
    }

    /// Daily reset elapsed: active again with a clean failure count.
    pub fn reactivate(&mut self) {
        self.status = CredentialState::Active;
        self.failure_count = 0;
        self.last_error = None;
        self.reset_at = None;
    }
}
