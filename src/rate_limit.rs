use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::models::{Identity, PlanTier};
use crate::store::{RateLimitStore, StoreError};

// Max requests allowed per sliding window for one tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicy {
    pub max_requests: u32,
    pub window: Duration,
}

impl RatePolicy {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    fn window_millis(&self) -> i64 {
        i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    Deny,
}

// Sliding window over a store; length check and push are separate calls,
// so concurrent requests from one user can overshoot slightly
pub struct SlidingWindowLimiter {
    store: Arc<dyn RateLimitStore>,
    policies: HashMap<PlanTier, RatePolicy>,
    key_prefix: String,
}

impl SlidingWindowLimiter {
    pub fn new(
        store: Arc<dyn RateLimitStore>,
        policies: HashMap<PlanTier, RatePolicy>,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            policies,
            key_prefix: key_prefix.into(),
        }
    }

    pub fn policy(&self, plan: PlanTier) -> Option<&RatePolicy> {
        self.policies.get(&plan)
    }

    fn key(&self, subject: &str) -> String {
        format!("{}:{}", self.key_prefix, subject)
    }

    pub async fn admit(&self, identity: &Identity, now_ms: i64) -> Result<Admission, StoreError> {
        let Some(policy) = self.policy(identity.plan) else {
            return Ok(Admission::Admit);
        };
        let limit = policy.max_requests as usize;
        let key = self.key(&identity.subject);

        let count = self.store.length(&key).await?;
        if count < limit as u64 {
            self.store.push_timestamp(&key, now_ms).await?;
            return Ok(Admission::Admit);
        }

        // oldest of the `limit` newest entries; a zero limit has none
        let oldest = match limit.checked_sub(1) {
            Some(n) => self.store.nth_newest(&key, n).await?,
            None => return Ok(Admission::Deny),
        };
        if let Some(oldest) = oldest {
            if oldest.saturating_add(policy.window_millis()) > now_ms {
                debug!(subject = %identity.subject, oldest, now_ms, "window still open");
                return Ok(Admission::Deny);
            }
        }

        self.store.push_timestamp(&key, now_ms).await?;
        self.store.trim(&key, limit).await?;
        Ok(Admission::Admit)
    }
}
