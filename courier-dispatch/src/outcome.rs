//! Outcome Recorder: the append-only history that makes resumption safe.

use std::{collections::BTreeMap, sync::Arc};

use courier_common::{
    CampaignId, OutcomeFilter, OutcomeKind, RecipientId, RelayId, SendOutcome, audit,
};
use courier_store::CampaignStore;

use crate::{
    clock::Clock,
    error::{DispatchError, Result},
};

/// Outcome counts of one campaign, by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutcomeSummary {
    counts: BTreeMap<OutcomeKind, usize>,
}

impl OutcomeSummary {
    pub fn count(&self, kind: OutcomeKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or_default()
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    /// Every kind with at least one outcome, in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (OutcomeKind, usize)> + '_ {
        self.counts.iter().map(|(kind, count)| (*kind, *count))
    }
}

#[derive(Debug, Clone)]
pub struct OutcomeRecorder {
    store: Arc<dyn CampaignStore>,
    clock: Arc<dyn Clock>,
}

impl OutcomeRecorder {
    pub fn new(store: Arc<dyn CampaignStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Append the result of a send attempt.
    ///
    /// A failure is fatal to the calling run: losing this row could mean sending the
    /// same campaign to the same recipient twice after a restart.
    pub async fn record(
        &self,
        campaign: CampaignId,
        recipient: RecipientId,
        relay: RelayId,
        kind: OutcomeKind,
        detail: Option<String>,
    ) -> Result<SendOutcome> {
        let mut outcome = SendOutcome::new(campaign, recipient, relay, kind, self.clock.now());
        outcome.detail = detail;

        self.store
            .insert_outcome(outcome.clone())
            .await
            .map_err(DispatchError::store(format!(
                "relay {relay}, campaign {campaign}, recipient {recipient}: recording {kind} outcome"
            )))?;

        audit::log_outcome(campaign, recipient, kind, outcome.detail.as_deref());
        Ok(outcome)
    }

    /// Whether a live (non-test) send to this recipient was already recorded.
    pub async fn has_been_sent(&self, campaign: CampaignId, recipient: RecipientId) -> Result<bool> {
        let filter = OutcomeFilter::default()
            .campaign(campaign)
            .recipient(recipient)
            .kinds([OutcomeKind::SentLive]);

        self.count(&filter, campaign).await.map(|count| count > 0)
    }

    /// Number of live sends recorded for the campaign.
    pub async fn count_sent(&self, campaign: CampaignId) -> Result<usize> {
        let filter = OutcomeFilter::default()
            .campaign(campaign)
            .kinds([OutcomeKind::SentLive]);

        self.count(&filter, campaign).await
    }

    pub async fn summary(&self, campaign: CampaignId) -> Result<OutcomeSummary> {
        let outcomes = self
            .store
            .query_outcomes(&OutcomeFilter::default().campaign(campaign))
            .await
            .map_err(DispatchError::store(format!(
                "campaign {campaign}: reading outcomes"
            )))?;

        let mut summary = OutcomeSummary::default();
        for outcome in outcomes {
            *summary.counts.entry(outcome.kind).or_default() += 1;
        }
        Ok(summary)
    }

    /// Record something the recipient did after delivery.
    ///
    /// `Unsubscribed` also sets the recipient's global unsubscribe flag. Engagement never
    /// changes which recipients a campaign is sent to, except through that flag.
    pub async fn record_engagement(
        &self,
        campaign: CampaignId,
        recipient: RecipientId,
        kind: OutcomeKind,
    ) -> Result<()> {
        if !kind.is_engagement() {
            return Err(DispatchError::Configuration(format!(
                "{kind} is not an engagement outcome"
            )));
        }

        let context = format!("campaign {campaign}, recipient {recipient}: recording {kind}");

        if kind == OutcomeKind::Unsubscribed {
            self.store
                .unsubscribe(recipient, campaign, self.clock.now())
                .await
                .map_err(DispatchError::store(context))?;
            audit::log_outcome(campaign, recipient, kind, None);
            return Ok(());
        }

        let relay = self
            .store
            .fetch_campaign(campaign)
            .await
            .map_err(DispatchError::store(context.clone()))?
            .relay;
        self.record(campaign, recipient, relay, kind, None)
            .await
            .map(|_| ())
    }

    async fn count(&self, filter: &OutcomeFilter, campaign: CampaignId) -> Result<usize> {
        self.store
            .count_outcomes(filter)
            .await
            .map_err(DispatchError::store(format!(
                "campaign {campaign}: counting outcomes"
            )))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use courier_common::{Campaign, CampaignStatus, MailingListId, Recipient};
    use courier_store::MemoryStore;

    use super::*;
    use crate::clock::ManualClock;

    fn recorder() -> (OutcomeRecorder, MemoryStore) {
        let store = MemoryStore::new();
        store.add_recipient(Recipient::new(RecipientId(1), "reader@example.org"));
        store.add_campaign(Campaign {
            id: CampaignId(9),
            slug: "spring".to_string(),
            title: "Spring".to_string(),
            content: "<p>Spring</p>".to_string(),
            sender: "news@example.com".to_string(),
            reply_to: None,
            mailing_list: MailingListId(1),
            test_recipients: Vec::new(),
            relay: RelayId(2),
            status: CampaignStatus::Sending,
            scheduled_at: DateTime::<Utc>::MIN_UTC,
            attachments: Vec::new(),
        });

        let clock = ManualClock::new(Utc::now());
        let recorder = OutcomeRecorder::new(Arc::new(store.clone()), Arc::new(clock));
        (recorder, store)
    }

    #[tokio::test]
    async fn test_only_live_sends_count_as_sent() {
        let (recorder, _store) = recorder();
        let (campaign, recipient, relay) = (CampaignId(9), RecipientId(1), RelayId(2));

        recorder
            .record(campaign, recipient, relay, OutcomeKind::SentTest, None)
            .await
            .expect("Recorded");
        recorder
            .record(
                campaign,
                recipient,
                relay,
                OutcomeKind::TransportError,
                Some("421 busy".to_string()),
            )
            .await
            .expect("Recorded");
        assert!(!recorder.has_been_sent(campaign, recipient).await.expect("Counted"));

        recorder
            .record(campaign, recipient, relay, OutcomeKind::SentLive, None)
            .await
            .expect("Recorded");
        assert!(recorder.has_been_sent(campaign, recipient).await.expect("Counted"));
        assert!(
            !recorder
                .has_been_sent(CampaignId(10), recipient)
                .await
                .expect("Counted")
        );
        assert_eq!(recorder.count_sent(campaign).await.expect("Counted"), 1);

        let summary = recorder.summary(campaign).await.expect("Summarised");
        assert_eq!(summary.count(OutcomeKind::SentTest), 1);
        assert_eq!(summary.count(OutcomeKind::TransportError), 1);
        assert_eq!(summary.count(OutcomeKind::SentLive), 1);
        assert_eq!(summary.total(), 3);
    }

    #[tokio::test]
    async fn test_engagement() {
        let (recorder, store) = recorder();
        let (campaign, recipient) = (CampaignId(9), RecipientId(1));

        recorder
            .record_engagement(campaign, recipient, OutcomeKind::Opened)
            .await
            .expect("Recorded");
        recorder
            .record_engagement(campaign, recipient, OutcomeKind::Unsubscribed)
            .await
            .expect("Recorded");

        let summary = recorder.summary(campaign).await.expect("Summarised");
        assert_eq!(summary.count(OutcomeKind::Opened), 1);
        assert_eq!(summary.count(OutcomeKind::Unsubscribed), 1);

        let opened = store
            .query_outcomes(
                &OutcomeFilter::default()
                    .campaign(campaign)
                    .kinds([OutcomeKind::Opened]),
            )
            .await
            .expect("Queried");
        assert_eq!(opened[0].relay, RelayId(2));

        let recipient = store.fetch_recipient(recipient).await.expect("Recipient");
        assert!(recipient.unsubscribed);
    }

    #[tokio::test]
    async fn test_delivery_kinds_are_not_engagement() {
        let (recorder, _store) = recorder();
        let result = recorder
            .record_engagement(CampaignId(9), RecipientId(1), OutcomeKind::SentLive)
            .await;

        assert!(matches!(result, Err(DispatchError::Configuration(_))));
    }
}
