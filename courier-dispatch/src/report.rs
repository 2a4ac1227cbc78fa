//! Read-only views over the store for operators.

use std::fmt;

use courier_common::{Campaign, CampaignId, CampaignStatus, RelayId};

use crate::{
    context::DispatchContext,
    error::{DispatchError, Result},
    outcome::OutcomeSummary,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignReport {
    pub id: CampaignId,
    pub title: String,
    pub relay: RelayId,
    pub status: CampaignStatus,
    pub outcomes: OutcomeSummary,
    /// Recipients a live run would still attempt.
    pub remaining: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReport {
    pub id: RelayId,
    pub name: String,
    /// Sends per window, `0` when unthrottled
    pub quota: u32,
    pub credits: u32,
}

impl CampaignReport {
    pub async fn collect(context: &DispatchContext, campaign: &Campaign) -> Result<Self> {
        let remaining = context
            .store
            .fetch_eligible_recipients(campaign.id)
            .await
            .map_err(DispatchError::store(format!(
                "campaign {}: counting remaining recipients",
                campaign.id
            )))?
            .len();

        Ok(Self {
            id: campaign.id,
            title: campaign.title.clone(),
            relay: campaign.relay,
            status: campaign.status,
            outcomes: context.recorder.summary(campaign.id).await?,
            remaining,
        })
    }
}

impl fmt::Display for CampaignReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "campaign {} ({}) via relay {}: {}, {} remaining",
            self.id, self.title, self.relay, self.status, self.remaining
        )?;
        for (kind, count) in self.outcomes.iter() {
            write!(f, "\n  {:<16} {count}", kind.as_str())?;
        }
        Ok(())
    }
}

impl fmt::Display for RelayReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.quota == 0 {
            write!(f, "relay {} ({}): unthrottled", self.id, self.name)
        } else {
            write!(
                f,
                "relay {} ({}): {}/{} credits left",
                self.id, self.name, self.credits, self.quota
            )
        }
    }
}

/// Reports for every campaign (or just `only`) and every relay.
pub async fn status(
    context: &DispatchContext,
    only: Option<CampaignId>,
) -> Result<(Vec<CampaignReport>, Vec<RelayReport>)> {
    let campaigns = match only {
        Some(id) => vec![
            context
                .store
                .fetch_campaign(id)
                .await
                .map_err(DispatchError::store(format!("campaign {id}: loading")))?,
        ],
        None => context
            .store
            .campaigns()
            .await
            .map_err(DispatchError::store("listing campaigns"))?,
    };

    let mut campaign_reports = Vec::with_capacity(campaigns.len());
    for campaign in &campaigns {
        campaign_reports.push(CampaignReport::collect(context, campaign).await?);
    }

    let relays = context
        .store
        .relays()
        .await
        .map_err(DispatchError::store("listing relays"))?;

    let mut relay_reports = Vec::with_capacity(relays.len());
    for relay in relays {
        relay_reports.push(RelayReport {
            credits: context.quota.remaining_credits(&relay).await?,
            id: relay.id,
            name: relay.name,
            quota: relay.hourly_quota,
        });
    }

    Ok((campaign_reports, relay_reports))
}
