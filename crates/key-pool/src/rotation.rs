//! Rotation and retry across the pool
//!
//! `KeyPool::execute` runs one unit of work against the pool: pick an
//! available credential round-robin, dispatch through the throttle, and on a
//! quota failure record it and try a different credential. Anything that is
//! not a quota failure is returned on first occurrence.

use std::collections::HashSet;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono_tz::Tz;
use tracing::{debug, info, warn};

use crate::clock::{next_daily_reset, now_millis};
use crate::credential::Credential;
use crate::error::{Error, Result};
use crate::pool::KeyPool;
use crate::quota::{FailureKind, classify_failure};

/// Retry and status-escalation settings.
#[derive(Debug, Clone)]
pub struct RotationPolicy {
    /// Upper bound on credentials tried per `execute` call
    pub max_attempts: u32,
    /// Quota failures after which a credential is permanently blocked
    pub block_threshold: u32,
    /// Timezone whose midnight resets daily quotas
    pub reset_timezone: Tz,
    /// Added to the daily reset time
    pub reset_margin: Duration,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            block_threshold: 2,
            reset_timezone: chrono_tz::America::Los_Angeles,
            reset_margin: Duration::from_secs(5 * 60),
        }
    }
}

impl KeyPool {
    /// Run `request_fn` with a pool credential, rotating on quota failures.
    ///
    /// Returns `Error::Exhausted` when no credential is available or the
    /// attempt bound is reached, and `Error::Request` for a failure that is
    /// not quota related. Credential status is updated after every attempt
    /// except the latter.
    pub async fn execute<T, E, F, Fut>(&self, request_fn: F) -> Result<T>
    where
        F: Fn(Credential) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        let mut tried: HashSet<String> = HashSet::new();
        let mut last_failure: Option<(String, String)> = None;

        for attempt in 1..=self.policy.max_attempts {
            if self.cancelled.load(Ordering::SeqCst) {
                info!(attempt, "execution cancelled");
                return Err(Error::Cancelled);
            }

            let candidates: Vec<Credential> = self
                .store
                .available(&self.credentials)
                .await
                .into_iter()
                .filter(|c| !tried.contains(&c.id))
                .collect();

            if candidates.is_empty() {
                return Err(self.exhausted(last_failure.as_ref(), None).await);
            }

            let index = self.next_index.fetch_add(1, Ordering::Relaxed) % candidates.len();
            let credential = candidates[index].clone();
            tried.insert(credential.id.clone());
            debug!(
                credential_id = %credential.id,
                attempt,
                candidates = candidates.len(),
                "dispatching request"
            );

            let outcome = self
                .dispatcher
                .schedule(|| request_fn(credential.clone()))
                .await
                .map_err(|e| e.to_string());

            let message = match outcome {
                Ok(value) => {
                    self.store.record_success(&credential.id, now_millis()).await;
                    debug!(credential_id = %credential.id, attempt, "request succeeded");
                    return Ok(value);
                }
                Err(message) => message,
            };

            let kind = classify_failure(&message);
            metrics::counter!("key_pool_credential_failures_total", "kind" => kind.label())
                .increment(1);

            match kind {
                FailureKind::Other => {
                    warn!(credential_id = %credential.id, attempt, error = %message, "request failed, not retrying");
                    return Err(Error::Request {
                        credential: credential.id,
                        message,
                    });
                }
                FailureKind::DailyLimit => {
                    let now = now_millis();
                    let reset_at =
                        next_daily_reset(now, self.policy.reset_timezone, self.policy.reset_margin);
                    self.store
                        .record_daily_limit(&credential.id, &message, reset_at, now)
                        .await;
                    warn!(
                        credential_id = %credential.id,
                        attempt,
                        reset_at,
                        error = %message,
                        "daily quota reached, credential parked until reset"
                    );
                }
                FailureKind::Quota => {
                    let status = self
                        .store
                        .record_quota_failure(
                            &credential.id,
                            &message,
                            self.policy.block_threshold,
                            now_millis(),
                        )
                        .await;
                    warn!(
                        credential_id = %credential.id,
                        attempt,
                        failure_count = status.failure_count,
                        status = status.status.label(),
                        error = %message,
                        "quota failure, rotating credential"
                    );
                }
            }
            last_failure = Some((credential.id, message));
        }

        Err(self
            .exhausted(last_failure.as_ref(), Some(self.policy.max_attempts))
            .await)
    }

    /// The returned message carries only the pool summary; the last upstream
    /// failure is logged, never surfaced to callers.
    async fn exhausted(&self, last_failure: Option<&(String, String)>, bound: Option<u32>) -> Error {
        let mut message = self.stats().await.summary();
        if let Some(bound) = bound {
            message = format!("gave up after {bound} attempts; {message}");
        }
        match last_failure {
            Some((credential, error)) => warn!(
                reason = %message,
                last_credential_id = %credential,
                last_error = %error,
                "credential pool exhausted"
            ),
            None => warn!(reason = %message, "credential pool exhausted"),
        }
        Error::Exhausted(message)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::dispatcher::Dispatcher;
    use crate::persistence::MemoryPersistence;
    use crate::status::CredentialState;
    use crate::store::StatusStore;

    async fn pool_with(ids: &[&str], policy: RotationPolicy, interval: Duration) -> Arc<KeyPool> {
        let store = Arc::new(StatusStore::load(Arc::new(MemoryPersistence::new())).await);
        let credentials = ids
            .iter()
            .map(|id| Credential::new(*id, format!("Project {id}"), format!("secret-{id}")))
            .collect();
        Arc::new(KeyPool::new(
            credentials,
            store,
            Arc::new(Dispatcher::new(interval)),
            policy,
        ))
    }

    async fn test_pool(ids: &[&str]) -> Arc<KeyPool> {
        pool_with(ids, RotationPolicy::default(), Duration::ZERO).await
    }

    #[tokio::test]
    async fn quota_failure_rotates_to_sibling() {
        let pool = test_pool(&["b", "a", "c"]).await;
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let result = pool
            .execute(|cred| {
                let seen = seen.clone();
                async move {
                    seen.lock().push(cred.id.clone());
                    if cred.id == "b" {
                        Err("HTTP 429: quota exceeded for project")
                    } else {
                        Ok(format!("served by {}", cred.id))
                    }
                }
            })
            .await
            .unwrap();

        let seen = seen.lock().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], "b");
        assert_ne!(seen[1], "b");
        assert_eq!(result, format!("served by {}", seen[1]));

        let b = pool.store.get("b").await;
        assert_eq!(b.status, CredentialState::QuotaExhausted);
        assert_eq!(b.failure_count, 1);
        let winner = pool.store.get(&seen[1]).await;
        assert_eq!(winner.status, CredentialState::Active);
        assert!(winner.last_used_at.is_some());
    }

    #[tokio::test]
    async fn round_robin_spreads_successes() {
        let pool = test_pool(&["a", "b"]).await;
        let mut used = Vec::new();
        for _ in 0..4 {
            let id = pool
                .execute(|cred| async move { Ok::<_, String>(cred.id) })
                .await
                .unwrap();
            used.push(id);
        }
        assert_eq!(used, vec!["a", "b", "a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_quota_failures_block_single_credential() {
        let pool = pool_with(&["only"], RotationPolicy::default(), Duration::from_millis(1300)).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(tokio::sync::Barrier::new(2));

        let run = || {
            let pool = pool.clone();
            let calls = calls.clone();
            let barrier = barrier.clone();
            async move {
                pool.execute(|_cred| {
                    let calls = calls.clone();
                    let barrier = barrier.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        // both requests are in flight before either failure lands
                        barrier.wait().await;
                        Err::<(), _>("429 RESOURCE_EXHAUSTED: quota exceeded")
                    }
                })
                .await
            }
        };

        let (first, second) = tokio::join!(run(), run());
        assert!(matches!(first, Err(Error::Exhausted(_))), "got {first:?}");
        assert!(matches!(second, Err(Error::Exhausted(_))), "got {second:?}");

        let status = pool.store.get("only").await;
        assert_eq!(status.status, CredentialState::PermanentlyBlocked);
        assert_eq!(status.failure_count, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let third = pool
            .execute(|_cred| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(())
                }
            })
            .await;
        let Err(Error::Exhausted(message)) = &third else {
            panic!("expected exhausted, got {third:?}");
        };
        assert!(message.contains("0 of 1 credentials available"), "got: {message}");
        assert_eq!(calls.load(Ordering::SeqCst), 2, "no request may be sent");
    }

    #[tokio::test]
    async fn repeated_quota_failures_block_at_threshold() {
        let pool = test_pool(&["only"]).await;
        for _ in 0..2 {
            let result = pool
                .execute(|_cred| async { Err::<(), _>("rate limit exceeded") })
                .await;
            assert!(matches!(result, Err(Error::Exhausted(_))));

            // quota-exhausted keys are not selectable; make it selectable again
            // while keeping its failure count
            pool.store
                .mutate(|state| {
                    if let Some(s) = state.get_mut("only")
                        && s.status == CredentialState::QuotaExhausted
                    {
                        s.status = CredentialState::Active;
                    }
                    ((), true)
                })
                .await;
        }
        let status = pool.store.get("only").await;
        assert_eq!(status.status, CredentialState::PermanentlyBlocked);
        assert_eq!(status.failure_count, 2);

        // still blocked however much time passes
        let far_future = now_millis() + 10 * 365 * 24 * 60 * 60 * 1000;
        assert!(pool.store.available_at(pool.credentials(), far_future).await.is_empty());
    }

    #[tokio::test]
    async fn other_errors_fail_fast_without_status_change() {
        let pool = test_pool(&["a", "b", "c"]).await;
        let calls = Arc::new(AtomicUsize::new(0));

        let result = pool
            .execute(|_cred| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("HTTP 400: invalid request body")
                }
            })
            .await;

        let Err(Error::Request { credential, message }) = &result else {
            panic!("expected request error, got {result:?}");
        };
        assert_eq!(credential, "a");
        assert_eq!(message, "HTTP 400: invalid request body");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(pool.store.snapshot().await.is_empty(), "no status may change");
    }

    #[tokio::test]
    async fn digits_resembling_429_do_not_rotate() {
        let pool = test_pool(&["a", "b"]).await;
        for body in [
            "upstream returned HTTP 400: request 7f3a-14290 invalid argument",
            "upstream returned HTTP 400: model gemini-1.0-pro-0429 does not support generateContent",
        ] {
            let calls = Arc::new(AtomicUsize::new(0));
            let result = pool
                .execute(|_cred| {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(body)
                    }
                })
                .await;

            assert!(matches!(result, Err(Error::Request { .. })), "got {result:?}");
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
        assert!(pool.store.snapshot().await.is_empty(), "no status may change");
        assert_eq!(pool.stats().await.active, 2);
    }

    #[tokio::test]
    async fn exhausted_message_omits_upstream_detail() {
        let pool = test_pool(&["a"]).await;
        let result = pool
            .execute(|_cred| async {
                Err::<(), _>("HTTP 429: quota exceeded for project secret-project-4711")
            })
            .await;

        let Err(Error::Exhausted(message)) = &result else {
            panic!("expected exhausted, got {result:?}");
        };
        assert_eq!(
            message,
            "0 of 1 credentials available (1 quota exhausted, 0 daily limited, 0 permanently blocked)"
        );
    }

    #[tokio::test]
    async fn success_resets_prior_failures() {
        let pool = test_pool(&["a"]).await;
        pool.store.record_quota_failure("a", "quota", 5, now_millis()).await;
        pool.store
            .mutate(|state| {
                if let Some(s) = state.get_mut("a") {
                    s.status = CredentialState::Active;
                }
                ((), true)
            })
            .await;

        pool.execute(|_cred| async { Ok::<_, String>(()) }).await.unwrap();

        let status = pool.store.get("a").await;
        assert_eq!(status.status, CredentialState::Active);
        assert_eq!(status.failure_count, 0);
        assert_eq!(status.last_error, None);
    }

    #[tokio::test]
    async fn daily_limit_parks_until_next_reset() {
        let pool = test_pool(&["a", "b"]).await;
        let before = now_millis();

        let result = pool
            .execute(|cred| async move {
                if cred.id == "a" {
                    Err("Quota exceeded for metric: generate_requests_per_day")
                } else {
                    Ok("ok")
                }
            })
            .await;
        assert_eq!(result.unwrap(), "ok");

        let a = pool.store.get("a").await;
        assert_eq!(a.status, CredentialState::DailyLimited);
        let reset_at = a.reset_at.unwrap();
        assert!(reset_at > before + 5 * 60 * 1000);
        assert!(reset_at <= before + 25 * 60 * 60 * 1000 + 5 * 60 * 1000);
    }

    #[tokio::test]
    async fn bound_caps_attempts() {
        let policy = RotationPolicy {
            max_attempts: 2,
            block_threshold: 5,
            ..RotationPolicy::default()
        };
        let pool = pool_with(&["a", "b", "c", "d"], policy, Duration::ZERO).await;
        let calls = Arc::new(AtomicUsize::new(0));

        let result = pool
            .execute(|_cred| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("Too Many Requests")
                }
            })
            .await;

        let Err(Error::Exhausted(message)) = &result else {
            panic!("expected exhausted, got {result:?}");
        };
        assert!(message.starts_with("gave up after 2 attempts"), "got: {message}");
        assert!(!message.contains("Too Many Requests"), "upstream text leaked: {message}");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(pool.stats().await.active, 2);
    }

    #[tokio::test]
    async fn empty_pool_is_exhausted() {
        let pool = test_pool(&[]).await;
        let result = pool.execute(|_cred| async { Ok::<_, String>(()) }).await;
        assert!(matches!(result, Err(Error::Exhausted(_))));
    }

    #[tokio::test]
    async fn cancel_stops_before_next_attempt() {
        let pool = test_pool(&["a", "b"]).await;
        let calls = Arc::new(AtomicUsize::new(0));

        let result = pool
            .execute(|_cred| {
                let calls = calls.clone();
                let pool = pool.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    pool.cancel();
                    Err::<(), _>("429")
                }
            })
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        pool.resume();
        let ok = pool.execute(|_cred| async { Ok::<_, String>(1) }).await;
        assert_eq!(ok.unwrap(), 1);
    }
}
