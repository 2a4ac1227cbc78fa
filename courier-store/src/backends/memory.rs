use std::{collections::BTreeMap, sync::Arc};

use ahash::{AHashMap, AHashSet};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_common::{
    Campaign, CampaignId, CampaignStatus, MailingList, MailingListId, OutcomeFilter, OutcomeId,
    OutcomeKind, Recipient, RecipientId, Relay, RelayId, SendOutcome,
};
use dashmap::DashSet;
use parking_lot::RwLock;

use crate::{CampaignStore, Dataset, StoreError};

#[derive(Debug, Default)]
struct Tables {
    relays: BTreeMap<RelayId, Relay>,
    mailing_lists: AHashMap<MailingListId, MailingList>,
    recipients: AHashMap<RecipientId, Recipient>,
    campaigns: BTreeMap<CampaignId, Campaign>,
}

/// In-memory store
///
/// Entities live behind a `parking_lot::RwLock`; outcomes are an append-only vector
/// behind their own lock so inserts never contend with entity reads. The
/// `(campaign, recipient)` pairs with a `SentLive` outcome are mirrored in a `DashSet`
/// so the "already sent" check never takes either lock.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    outcomes: Arc<RwLock<Vec<SendOutcome>>>,
    sent: Arc<DashSet<(CampaignId, RecipientId)>>,
    outcome_ids: Arc<DashSet<OutcomeId>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a snapshot, checking that every reference resolves.
    pub fn from_dataset(dataset: Dataset) -> crate::Result<Self> {
        let mut tables = Tables::default();

        for relay in dataset.relays {
            tables.relays.insert(relay.id, relay);
        }
        for list in dataset.mailing_lists {
            tables.mailing_lists.insert(list.id, list);
        }
        for recipient in dataset.recipients {
            tables.recipients.insert(recipient.id, recipient);
        }
        for campaign in dataset.campaigns {
            if !tables.relays.contains_key(&campaign.relay) {
                return Err(StoreError::Corrupted(format!(
                    "campaign {} references unknown relay {}",
                    campaign.id, campaign.relay
                )));
            }
            if !tables.mailing_lists.contains_key(&campaign.mailing_list) {
                return Err(StoreError::Corrupted(format!(
                    "campaign {} references unknown mailing list {}",
                    campaign.id, campaign.mailing_list
                )));
            }
            tables.campaigns.insert(campaign.id, campaign);
        }

        let store = Self {
            tables: Arc::new(RwLock::new(tables)),
            ..Self::default()
        };

        for outcome in dataset.outcomes {
            store.push_outcome(outcome);
        }

        Ok(store)
    }

    /// Capture the current contents.
    pub fn snapshot(&self) -> Dataset {
        let tables = self.tables.read();

        let mut mailing_lists: Vec<_> = tables.mailing_lists.values().cloned().collect();
        mailing_lists.sort_by_key(|list| list.id);
        let mut recipients: Vec<_> = tables.recipients.values().cloned().collect();
        recipients.sort_by_key(|recipient| recipient.id);

        Dataset {
            relays: tables.relays.values().cloned().collect(),
            mailing_lists,
            recipients,
            campaigns: tables.campaigns.values().cloned().collect(),
            outcomes: self.outcomes.read().clone(),
        }
    }

    pub fn add_relay(&self, relay: Relay) {
        self.tables.write().relays.insert(relay.id, relay);
    }

    pub fn add_mailing_list(&self, list: MailingList) {
        self.tables.write().mailing_lists.insert(list.id, list);
    }

    pub fn add_recipient(&self, recipient: Recipient) {
        self.tables.write().recipients.insert(recipient.id, recipient);
    }

    pub fn add_campaign(&self, campaign: Campaign) {
        self.tables.write().campaigns.insert(campaign.id, campaign);
    }

    /// Append an outcome unless one with the same id is already present.
    pub(crate) fn push_outcome(&self, outcome: SendOutcome) {
        if !self.outcome_ids.insert(outcome.id) {
            return;
        }
        if outcome.kind == OutcomeKind::SentLive {
            self.sent.insert((outcome.campaign, outcome.recipient));
        }
        self.outcomes.write().push(outcome);
    }

    pub(crate) fn set_status(&self, id: CampaignId, status: CampaignStatus) -> crate::Result<()> {
        let mut tables = self.tables.write();
        let campaign = tables
            .campaigns
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("campaign", id))?;
        campaign.status = status;
        Ok(())
    }

    pub(crate) fn set_invalid(&self, id: RecipientId) -> crate::Result<()> {
        let mut tables = self.tables.write();
        let recipient = tables
            .recipients
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("recipient", id))?;
        recipient.valid = false;
        Ok(())
    }

    pub(crate) fn set_unsubscribed(&self, id: RecipientId) -> crate::Result<()> {
        let mut tables = self.tables.write();
        let recipient = tables
            .recipients
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("recipient", id))?;
        recipient.unsubscribed = true;
        Ok(())
    }

    /// The outcome an unsubscribe request produces, without applying it.
    pub(crate) fn unsubscribe_outcome(
        &self,
        recipient: RecipientId,
        campaign: CampaignId,
        at: DateTime<Utc>,
    ) -> crate::Result<SendOutcome> {
        let tables = self.tables.read();
        if !tables.recipients.contains_key(&recipient) {
            return Err(StoreError::not_found("recipient", recipient));
        }
        let campaign = tables
            .campaigns
            .get(&campaign)
            .ok_or_else(|| StoreError::not_found("campaign", campaign))?;

        Ok(SendOutcome::new(
            campaign.id,
            recipient,
            campaign.relay,
            OutcomeKind::Unsubscribed,
            at,
        ))
    }

    pub(crate) fn has_campaign(&self, id: CampaignId) -> bool {
        self.tables.read().campaigns.contains_key(&id)
    }

    pub(crate) fn has_recipient(&self, id: RecipientId) -> bool {
        self.tables.read().recipients.contains_key(&id)
    }
}

#[async_trait]
impl CampaignStore for MemoryStore {
    async fn fetch_campaign(&self, id: CampaignId) -> crate::Result<Campaign> {
        self.tables
            .read()
            .campaigns
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("campaign", id))
    }

    async fn campaigns(&self) -> crate::Result<Vec<Campaign>> {
        Ok(self.tables.read().campaigns.values().cloned().collect())
    }

    async fn update_campaign_status(
        &self,
        id: CampaignId,
        status: CampaignStatus,
    ) -> crate::Result<()> {
        self.set_status(id, status)
    }

    async fn fetch_eligible_recipients(&self, campaign: CampaignId) -> crate::Result<Vec<Recipient>> {
        let tables = self.tables.read();
        let campaign = tables
            .campaigns
            .get(&campaign)
            .ok_or_else(|| StoreError::not_found("campaign", campaign))?;
        let list = tables
            .mailing_lists
            .get(&campaign.mailing_list)
            .ok_or_else(|| StoreError::not_found("mailing list", campaign.mailing_list))?;

        let mut seen = AHashSet::with_capacity(list.subscribers.len());
        let eligible = list
            .subscribers
            .iter()
            .filter(|id| seen.insert(**id))
            .filter_map(|id| {
                let recipient = tables.recipients.get(id);
                if recipient.is_none() {
                    tracing::warn!(
                        mailing_list = %list.id,
                        recipient = %id,
                        "Mailing list references an unknown recipient"
                    );
                }
                recipient
            })
            .filter(|recipient| {
                recipient.is_reachable() && !self.sent.contains(&(campaign.id, recipient.id))
            })
            .cloned()
            .collect();

        Ok(eligible)
    }

    async fn fetch_test_recipients(&self, campaign: CampaignId) -> crate::Result<Vec<Recipient>> {
        let tables = self.tables.read();
        let campaign = tables
            .campaigns
            .get(&campaign)
            .ok_or_else(|| StoreError::not_found("campaign", campaign))?;

        campaign
            .test_recipients
            .iter()
            .map(|id| {
                tables
                    .recipients
                    .get(id)
                    .cloned()
                    .ok_or_else(|| StoreError::not_found("recipient", id))
            })
            .collect()
    }

    async fn fetch_recipient(&self, id: RecipientId) -> crate::Result<Recipient> {
        self.tables
            .read()
            .recipients
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("recipient", id))
    }

    async fn fetch_relay(&self, id: RelayId) -> crate::Result<Relay> {
        self.tables
            .read()
            .relays
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("relay", id))
    }

    async fn relays(&self) -> crate::Result<Vec<Relay>> {
        Ok(self.tables.read().relays.values().cloned().collect())
    }

    async fn insert_outcome(&self, outcome: SendOutcome) -> crate::Result<()> {
        self.push_outcome(outcome);
        Ok(())
    }

    async fn query_outcomes(&self, filter: &OutcomeFilter) -> crate::Result<Vec<SendOutcome>> {
        Ok(self
            .outcomes
            .read()
            .iter()
            .filter(|outcome| filter.matches(outcome))
            .cloned()
            .collect())
    }

    async fn count_outcomes(&self, filter: &OutcomeFilter) -> crate::Result<usize> {
        Ok(self
            .outcomes
            .read()
            .iter()
            .filter(|outcome| filter.matches(outcome))
            .count())
    }

    async fn flag_recipient_invalid(&self, id: RecipientId) -> crate::Result<()> {
        self.set_invalid(id)
    }

    async fn unsubscribe(
        &self,
        recipient: RecipientId,
        campaign: CampaignId,
        at: DateTime<Utc>,
    ) -> crate::Result<()> {
        let outcome = self.unsubscribe_outcome(recipient, campaign, at)?;
        self.set_unsubscribed(recipient)?;
        self.push_outcome(outcome);
        Ok(())
    }
}
