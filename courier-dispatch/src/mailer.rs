//! One-shot dispatch: every sendable campaign once, in id order, then return.
//!
//! Each campaign is limited to the credits its relay had when the campaign came up, so
//! a single run never exceeds a quota. Whatever is left is picked up by the next run.

use std::{collections::BTreeMap, sync::Arc};

use courier_common::{RelayId, internal, tracing};

use crate::{
    context::DispatchContext,
    error::{DispatchError, Result},
    expedition::{Expedition, ExpeditionReport, StepResult},
    scheduler::Pacing,
    transport::{Connector, SessionManager},
};

#[derive(Debug)]
pub struct Mailer {
    context: DispatchContext,
    connector: Arc<dyn Connector>,
    test_mode: bool,
}

impl Mailer {
    pub fn new(context: DispatchContext, connector: Arc<dyn Connector>, test_mode: bool) -> Self {
        Self {
            context,
            connector,
            test_mode,
        }
    }

    /// Run every campaign that may be sent now.
    pub async fn send_all(&self) -> Result<Vec<ExpeditionReport>> {
        let mut relays = BTreeMap::new();
        let mut reports = Vec::new();

        let result = self.run(&mut relays, &mut reports).await;

        for (_, (mut sessions, _)) in relays {
            sessions.release().await;
        }

        result.map(|()| reports)
    }

    async fn run(
        &self,
        relays: &mut BTreeMap<RelayId, (SessionManager, Pacing)>,
        reports: &mut Vec<ExpeditionReport>,
    ) -> Result<()> {
        let store = &self.context.store;
        let campaigns = store
            .campaigns()
            .await
            .map_err(DispatchError::store("listing campaigns"))?;
        let now = self.context.clock.now();

        for campaign in campaigns {
            if !campaign.is_sendable(now, self.test_mode) {
                continue;
            }

            let relay = store
                .fetch_relay(campaign.relay)
                .await
                .map_err(DispatchError::store(format!(
                    "campaign {}: loading relay {}",
                    campaign.id, campaign.relay
                )))?;

            let credits = self.context.quota.remaining_credits(&relay).await?;
            if credits == 0 {
                internal!(
                    level = INFO,
                    relay = %relay.id,
                    campaign = %campaign.id,
                    "smtp-{}: no credits left, skipping campaign {}",
                    relay.id,
                    campaign.id
                );
                continue;
            }

            let min_delay = self.context.quota.min_delay(&relay);
            let (sessions, pacing) = relays.entry(relay.id).or_insert_with(|| {
                (
                    SessionManager::new(
                        relay.clone(),
                        Arc::clone(&self.connector),
                        self.context.config.reconnect_per_send,
                    ),
                    Pacing::new(),
                )
            });

            let limit = usize::try_from(credits).unwrap_or(usize::MAX);
            let mut expedition = Expedition::new(campaign, self.context.clone(), self.test_mode)
                .with_limit(limit);

            loop {
                match expedition.step(sessions).await {
                    Ok(StepResult::Attempted { .. }) => {
                        sessions.after_send().await;
                        let pause =
                            pacing.next_pause(min_delay, self.context.config.sleep_between_sends());
                        tokio::time::sleep(pause).await;
                    }
                    Ok(StepResult::Exhausted) => break,
                    Err(e) => {
                        if let Err(secondary) = expedition.cancel().await {
                            tracing::error!(campaign = %expedition.id(), error = %secondary, "Unable to update campaign status");
                        }
                        return Err(e);
                    }
                }
            }

            reports.push(expedition.report());
        }

        Ok(())
    }
}
