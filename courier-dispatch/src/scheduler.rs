//! Dispatch Scheduler
//!
//! One [`RelayScheduler`] per relay. It admits every sendable campaign bound to the relay,
//! interleaves their expeditions round-robin, and spaces sends so the relay's quota is
//! spread over the window:
//!
//! ```text
//! refill -> pop campaign -> credits? -> step -> reconnect? -> pause -> push back
//!    ^                                                                     |
//!    +--------------------- queue empty: idle, then refill ---------------+
//! ```
//!
//! Sends on one relay are strictly serialised. Cancellation is only observed between
//! steps, so the outcome of an in-flight send is always recorded.

use std::{
    collections::{BTreeMap, HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};

use courier_common::{CampaignId, OutcomeKind, RecipientId, Relay, RelayId, Signal, internal, tracing};
use tokio::{
    sync::broadcast::{self, error::TryRecvError},
    time::Instant,
};

use crate::{
    context::DispatchContext,
    error::{DispatchError, Result},
    expedition::{Expedition, ExpeditionReport, StepResult},
    transport::{Connector, SessionManager},
};

/// What one scheduling decision did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// A recipient was attempted; the next send may happen after `pause`.
    Sent {
        campaign: CampaignId,
        recipient: RecipientId,
        outcome: OutcomeKind,
        pause: Duration,
    },
    /// Bookkeeping only: an expedition ended or the relay ran out of credits.
    Continue,
    /// Nothing the relay can take right now.
    Idle,
}

/// Evenly spaced send slots since the start of a busy period.
#[derive(Debug)]
pub(crate) struct Pacing {
    started: Instant,
    index: u32,
}

impl Pacing {
    pub(crate) fn new() -> Self {
        Self {
            started: Instant::now(),
            index: 1,
        }
    }

    /// Pause before the next send, then move on to the next slot.
    pub(crate) fn next_pause(&mut self, min_delay: Duration, floor: Duration) -> Duration {
        let target = min_delay.saturating_mul(self.index);
        self.index = self.index.saturating_add(1);

        target.saturating_sub(self.started.elapsed()).max(floor)
    }

    fn reset(&mut self) {
        *self = Self::new();
    }
}

#[derive(Debug)]
pub struct RelayScheduler {
    relay: RelayId,
    context: DispatchContext,
    sessions: SessionManager,
    test_mode: bool,
    active: BTreeMap<CampaignId, Expedition>,
    queue: VecDeque<CampaignId>,
    /// Campaigns whose expedition ended in the current busy period.
    retired: HashSet<CampaignId>,
    pacing: Pacing,
    reports: Vec<ExpeditionReport>,
}

impl RelayScheduler {
    pub fn new(
        relay: Relay,
        context: DispatchContext,
        connector: Arc<dyn Connector>,
        test_mode: bool,
    ) -> Self {
        let reconnect_per_send = context.config.reconnect_per_send;

        Self {
            relay: relay.id,
            context,
            sessions: SessionManager::new(relay, connector, reconnect_per_send),
            test_mode,
            active: BTreeMap::new(),
            queue: VecDeque::new(),
            retired: HashSet::new(),
            pacing: Pacing::new(),
            reports: Vec::new(),
        }
    }

    pub const fn relay(&self) -> RelayId {
        self.relay
    }

    /// Campaigns with a live expedition, in id order.
    pub fn active_campaigns(&self) -> Vec<CampaignId> {
        self.active.keys().copied().collect()
    }

    /// Make one scheduling decision and carry it out.
    ///
    /// Never sleeps; the caller waits out the returned pause or idle interval.
    pub async fn tick(&mut self) -> Result<Tick> {
        if self.queue.is_empty() {
            self.refill().await?;
        }

        let Some(id) = self.queue.pop_front() else {
            self.go_idle().await?;
            return Ok(Tick::Idle);
        };

        let relay = self.sessions.relay().clone();
        if self.context.quota.remaining_credits(&relay).await? == 0 {
            internal!(level = INFO, relay = %relay.id, "smtp-{}: quota used up for this window", relay.id);
            self.queue.clear();
            return Ok(Tick::Continue);
        }

        let Some(expedition) = self.active.get_mut(&id) else {
            return Ok(Tick::Continue);
        };

        match expedition.step(&mut self.sessions).await? {
            StepResult::Attempted { recipient, outcome } => {
                self.sessions.after_send().await;

                let pause = self.pacing.next_pause(
                    self.context.quota.min_delay(&relay),
                    self.context.config.sleep_between_sends(),
                );

                if expedition.has_remaining() {
                    self.queue.push_back(id);
                } else {
                    self.retire(id).await?;
                }

                Ok(Tick::Sent {
                    campaign: id,
                    recipient,
                    outcome,
                    pause,
                })
            }
            StepResult::Exhausted => {
                self.retire(id).await?;
                Ok(Tick::Continue)
            }
        }
    }

    /// Admit new campaigns and queue every live expedition for a round.
    async fn refill(&mut self) -> Result<()> {
        let store = &self.context.store;
        let relay = store
            .fetch_relay(self.relay)
            .await
            .map_err(DispatchError::store(format!("relay {}: reloading settings", self.relay)))?;

        let credits = self.context.quota.remaining_credits(&relay).await?;
        self.sessions.refresh_relay(relay);
        if credits == 0 {
            return Ok(());
        }

        let now = self.context.clock.now();
        let candidates = store
            .campaigns_for_relay(self.relay)
            .await
            .map_err(DispatchError::store(format!(
                "relay {}: listing campaigns",
                self.relay
            )))?;

        for campaign in candidates {
            if self.active.contains_key(&campaign.id)
                || self.retired.contains(&campaign.id)
                || !campaign.is_sendable(now, self.test_mode)
            {
                continue;
            }

            internal!(level = DEBUG, relay = %self.relay, campaign = %campaign.id, "Admitting campaign");
            let id = campaign.id;
            self.active.insert(
                id,
                Expedition::new(campaign, self.context.clone(), self.test_mode),
            );
        }

        self.queue = self.active.keys().copied().collect();
        Ok(())
    }

    async fn retire(&mut self, id: CampaignId) -> Result<()> {
        if let Some(mut expedition) = self.active.remove(&id) {
            expedition.finish().await?;
            self.reports.push(expedition.report());
        }
        self.retired.insert(id);
        Ok(())
    }

    /// End the busy period: statuses are brought up to date and the session is closed.
    async fn go_idle(&mut self) -> Result<()> {
        let result = self.suspend_all().await;
        self.retired.clear();
        self.pacing.reset();
        result
    }

    async fn suspend_all(&mut self) -> Result<()> {
        self.queue.clear();

        let mut result = Ok(());
        for (id, mut expedition) in std::mem::take(&mut self.active) {
            if let Err(e) = expedition.cancel().await {
                tracing::error!(relay = %self.relay, campaign = %id, error = %e, "Unable to update campaign status");
                if result.is_ok() {
                    result = Err(e);
                }
            }
            self.reports.push(expedition.report());
        }

        self.sessions.release().await;
        result
    }

    /// Run until nothing is left that the relay can take, then return what was done.
    pub async fn drain(&mut self) -> Result<Vec<ExpeditionReport>> {
        loop {
            match self.tick().await {
                Ok(Tick::Sent { pause, .. }) => tokio::time::sleep(pause).await,
                Ok(Tick::Continue) => {}
                Ok(Tick::Idle) => return Ok(std::mem::take(&mut self.reports)),
                Err(e) => return Err(self.abort(e).await),
            }
        }
    }

    /// Run until a shutdown signal arrives, idling between busy periods.
    ///
    /// A fatal error stops the loop and is returned; the operator decides when to retry.
    pub async fn serve(&mut self, mut shutdown: broadcast::Receiver<Signal>) -> Result<()> {
        internal!(level = INFO, relay = %self.relay, "Scheduler for relay {} starting", self.relay);

        loop {
            match shutdown.try_recv() {
                Err(TryRecvError::Empty) => {}
                Ok(_) | Err(TryRecvError::Closed | TryRecvError::Lagged(_)) => break,
            }

            let pause = match self.tick().await {
                Ok(Tick::Sent { pause, .. }) => pause,
                Ok(Tick::Continue) => continue,
                Ok(Tick::Idle) => {
                    internal!(
                        level = DEBUG,
                        relay = %self.relay,
                        "Nothing to send, sleeping for {:?}",
                        self.context.config.idle_interval()
                    );
                    for report in self.reports.drain(..) {
                        tracing::info!(relay = %self.relay, campaign = %report.campaign, attempted = report.attempted(), status = %report.status, "Expedition finished");
                    }
                    self.context.config.idle_interval()
                }
                Err(e) => return Err(self.abort(e).await),
            };

            if pause.is_zero() {
                continue;
            }

            tokio::select! {
                () = tokio::time::sleep(pause) => {}
                signal = shutdown.recv() => {
                    match signal {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!(relay = %self.relay, "Scheduler received shutdown signal");
                        }
                        Err(e) => {
                            tracing::error!(relay = %self.relay, "Scheduler shutdown channel error: {e}");
                        }
                    }
                    break;
                }
            }
        }

        let result = self.suspend_all().await;
        internal!(level = INFO, relay = %self.relay, "Scheduler for relay {} stopped", self.relay);
        result
    }

    /// Clean up after a fatal error and hand the error back.
    async fn abort(&mut self, error: DispatchError) -> DispatchError {
        tracing::error!(relay = %self.relay, %error, "Scheduler stopping on a fatal error");
        if let Err(secondary) = self.suspend_all().await {
            tracing::error!(relay = %self.relay, error = %secondary, "Cleanup after a fatal error failed");
        }
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_pacing_spreads_slots() {
        let mut pacing = Pacing::new();
        let delay = Duration::from_secs(30);

        assert_eq!(pacing.next_pause(delay, Duration::ZERO), Duration::from_secs(30));

        tokio::time::advance(Duration::from_secs(50)).await;
        assert_eq!(pacing.next_pause(delay, Duration::ZERO), Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(100)).await;
        assert_eq!(pacing.next_pause(delay, Duration::ZERO), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_floor_and_reset() {
        let mut pacing = Pacing::new();
        let floor = Duration::from_millis(250);

        assert_eq!(pacing.next_pause(Duration::ZERO, floor), floor);
        assert_eq!(pacing.next_pause(Duration::from_secs(1), floor), Duration::from_secs(2));

        tokio::time::advance(Duration::from_secs(10)).await;
        pacing.reset();
        assert_eq!(pacing.index, 1);
        assert_eq!(pacing.next_pause(Duration::from_secs(1), floor), Duration::from_secs(1));
    }
}
