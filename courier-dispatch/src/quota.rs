//! Relay Quota Tracker
//!
//! Credits are recomputed from the outcome history on every decision. Sends made by
//! other campaigns, or by another process sharing the store, consume the same window,
//! so nothing here is cached.
//!
//! # Example
//!
//! ```text
//! hourly quota 120, window 3600s
//! - min delay between sends: 30s
//! - 45 deliveries in the last 3600s: 75 credits left
//! - the oldest delivery leaves the window: 76 credits
//! ```

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use courier_common::{OutcomeFilter, OutcomeKind, Relay, tracing};
use courier_store::CampaignStore;

use crate::{
    clock::Clock,
    config::DispatchConfig,
    error::{DispatchError, Result},
};

#[derive(Debug, Clone)]
pub struct QuotaTracker {
    store: Arc<dyn CampaignStore>,
    clock: Arc<dyn Clock>,
    /// Credits of a relay without an hourly quota.
    hard_limit: u32,
    window: Duration,
}

impl QuotaTracker {
    pub fn new(
        store: Arc<dyn CampaignStore>,
        clock: Arc<dyn Clock>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            store,
            clock,
            hard_limit: config.hard_limit,
            window: config.quota_window(),
        }
    }

    /// Sends the relay may still make in the window ending now. Never negative.
    pub async fn remaining_credits(&self, relay: &Relay) -> Result<u32> {
        self.remaining_credits_at(relay, self.clock.now()).await
    }

    pub async fn remaining_credits_at(&self, relay: &Relay, now: DateTime<Utc>) -> Result<u32> {
        if !relay.is_throttled() {
            return Ok(self.hard_limit);
        }

        let window = TimeDelta::from_std(self.window).unwrap_or(TimeDelta::MAX);
        let since = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let filter = OutcomeFilter::default()
            .relay(relay.id)
            .kinds(OutcomeKind::DELIVERIES)
            .since(since);

        let used = self
            .store
            .count_outcomes(&filter)
            .await
            .map_err(DispatchError::store(format!(
                "relay {}: counting deliveries in the quota window",
                relay.id
            )))?;

        let used = u32::try_from(used).unwrap_or(u32::MAX);
        let credits = relay.hourly_quota.saturating_sub(used);

        tracing::trace!(relay = %relay.id, quota = relay.hourly_quota, used, credits, "Computed relay credits");
        Ok(credits)
    }

    /// Smallest gap between two sends that spreads the quota evenly over the window.
    pub fn min_delay(&self, relay: &Relay) -> Duration {
        if relay.is_throttled() {
            self.window / relay.hourly_quota
        } else {
            Duration::ZERO
        }
    }
}
