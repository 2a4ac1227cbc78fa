use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_common::{
    Campaign, CampaignId, CampaignStatus, OutcomeFilter, Recipient, RecipientId, Relay, RelayId,
    SendOutcome,
};

/// Persistence collaborator of the dispatcher.
///
/// Implementations must accept concurrent [`CampaignStore::insert_outcome`] calls from
/// several relay schedulers without blocking readers for longer than a single insert.
#[async_trait]
pub trait CampaignStore: Send + Sync + std::fmt::Debug {
    async fn fetch_campaign(&self, id: CampaignId) -> crate::Result<Campaign>;

    /// Every campaign, ordered by id.
    async fn campaigns(&self) -> crate::Result<Vec<Campaign>>;

    async fn campaigns_for_relay(&self, relay: RelayId) -> crate::Result<Vec<Campaign>> {
        Ok(self
            .campaigns()
            .await?
            .into_iter()
            .filter(|campaign| campaign.relay == relay)
            .collect())
    }

    async fn update_campaign_status(
        &self,
        id: CampaignId,
        status: CampaignStatus,
    ) -> crate::Result<()>;

    /// Subscribers of the campaign's mailing list, in list order, that are reachable and
    /// have no `SentLive` outcome for this campaign.
    async fn fetch_eligible_recipients(&self, campaign: CampaignId) -> crate::Result<Vec<Recipient>>;

    /// The campaign's designated test recipients, regardless of prior outcomes.
    async fn fetch_test_recipients(&self, campaign: CampaignId) -> crate::Result<Vec<Recipient>>;

    async fn fetch_recipient(&self, id: RecipientId) -> crate::Result<Recipient>;

    async fn fetch_relay(&self, id: RelayId) -> crate::Result<Relay>;

    /// Every relay, ordered by id.
    async fn relays(&self) -> crate::Result<Vec<Relay>>;

    /// Append an outcome. Once this returns `Ok` the row is durable.
    async fn insert_outcome(&self, outcome: SendOutcome) -> crate::Result<()>;

    async fn query_outcomes(&self, filter: &OutcomeFilter) -> crate::Result<Vec<SendOutcome>>;

    async fn count_outcomes(&self, filter: &OutcomeFilter) -> crate::Result<usize> {
        Ok(self.query_outcomes(filter).await?.len())
    }

    /// Permanently exclude a recipient from every campaign.
    async fn flag_recipient_invalid(&self, id: RecipientId) -> crate::Result<()>;

    /// Set the recipient's global unsubscribe flag and record an `Unsubscribed` outcome
    /// against the campaign the request came from.
    async fn unsubscribe(
        &self,
        recipient: RecipientId,
        campaign: CampaignId,
        at: DateTime<Utc>,
    ) -> crate::Result<()>;

    /// Make everything written so far durable in its compact form.
    async fn checkpoint(&self) -> crate::Result<()> {
        Ok(())
    }
}
