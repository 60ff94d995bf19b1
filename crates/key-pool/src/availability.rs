//! Availability filter: which credentials may be selected right now.

use tracing::info;

use crate::clock::now_millis;
use crate::credential::Credential;
use crate::status::CredentialState;
use crate::store::StatusStore;

impl StatusStore {
    /// Usable credentials in configuration order.
    pub async fn available(&self, credentials: &[Credential]) -> Vec<Credential> {
        self.available_at(credentials, now_millis()).await
    }

    /// Usable credentials at `now_ms`.
    ///
    /// Daily-limited records whose reset time has passed are reactivated and
    /// persisted before this returns. Quota-exhausted and permanently blocked
    /// credentials are never returned.
    pub async fn available_at(&self, credentials: &[Credential], now_ms: u64) -> Vec<Credential> {
        self.mutate(|state| {
            let mut reactivated = false;
            let mut usable = Vec::with_capacity(credentials.len());
            for credential in credentials {
                let Some(status) = state.get_mut(&credential.id) else {
                    usable.push(credential.clone());
                    continue;
                };
                match status.status {
                    CredentialState::Active => usable.push(credential.clone()),
                    CredentialState::DailyLimited if status.daily_reset_due(now_ms) => {
                        status.reactivate();
                        reactivated = true;
                        info!(credential_id = %credential.id, "daily limit reset, credential reactivated");
                        usable.push(credential.clone());
                    }
                    CredentialState::DailyLimited
                    | CredentialState::QuotaExhausted
                    | CredentialState::PermanentlyBlocked => {}
                }
            }
            (usable, reactivated)
        })
        .await
    }
}
