//! Ordered backend fallback
//!
//! Tiers are tried in order until one returns an asset. A tier that is not
//! ready is skipped and recorded as "not configured". When every tier fails
//! the caller gets one error naming each tier's reason.

use std::sync::Arc;
use std::time::Instant;

use backend::{Asset, Backend, GenerationRequest};
use tracing::{info, warn};

use crate::error::{GenerationError, TierFailure};
use crate::metrics;

pub struct FallbackChain {
    tiers: Vec<Arc<dyn Backend>>,
}

impl FallbackChain {
    /// Chain over `tiers`, highest priority first.
    pub fn new(tiers: Vec<Arc<dyn Backend>>) -> Self {
        Self { tiers }
    }

    pub fn tier_ids(&self) -> Vec<&str> {
        self.tiers.iter().map(|t| t.id()).collect()
    }

    pub async fn generate(&self, request: &GenerationRequest) -> Result<Asset, GenerationError> {
        let kind = request.kind_label();
        let mut failures = Vec::with_capacity(self.tiers.len());

        for tier in &self.tiers {
            let tier_id = tier.id();
            if !tier.is_ready() {
                info!(tier = tier_id, kind, "tier not configured, skipping");
                metrics::record_tier_attempt(tier_id, "skipped");
                failures.push(TierFailure {
                    tier: tier_id.to_string(),
                    reason: "not configured".to_string(),
                });
                continue;
            }

            info!(tier = tier_id, kind, "attempting tier");
            let started = Instant::now();
            match tier.generate(request).await {
                Ok(asset) => {
                    info!(
                        tier = tier_id,
                        kind,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "tier succeeded"
                    );
                    metrics::record_tier_attempt(tier_id, "success");
                    return Ok(asset);
                }
                Err(e) => {
                    warn!(
                        tier = tier_id,
                        kind,
                        error = %e,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "tier failed, falling back"
                    );
                    metrics::record_tier_attempt(tier_id, e.kind());
                    failures.push(TierFailure {
                        tier: tier_id.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        warn!(kind, tiers = failures.len(), "all tiers failed");
        Err(GenerationError::AllTiersFailed(failures))
    }
}
