//! Seed data for dispatch tests
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use courier_common::{
    Campaign, CampaignId, CampaignStatus, MailingList, MailingListId, OutcomeFilter, OutcomeKind,
    Recipient, RecipientId, Relay, RelayId, RelaySecurity,
};
use courier_dispatch::{DispatchConfig, DispatchContext, ManualClock};
use courier_store::{CampaignStore, MemoryStore};

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

pub fn relay(id: u64, hourly_quota: u32) -> Relay {
    Relay {
        id: RelayId(id),
        name: format!("relay number {id}"),
        host: "smtp.example.com".to_string(),
        port: 587,
        security: RelaySecurity::Plain,
        credentials: None,
        hourly_quota,
        headers: "X-Mailer: courier".to_string(),
    }
}

pub fn campaign(id: u64, relay: u64, list: u64) -> Campaign {
    Campaign {
        id: CampaignId(id),
        slug: format!("issue-{id}"),
        title: format!("Issue {id} for {{{{recipient.address}}}}"),
        content: "<p>Hello {{recipient.address}}</p><p><a href=\"{{unsubscribe}}\">Unsubscribe</a></p>"
            .to_string(),
        sender: "news@example.com".to_string(),
        reply_to: None,
        mailing_list: MailingListId(list),
        test_recipients: Vec::new(),
        relay: RelayId(relay),
        status: CampaignStatus::Waiting,
        scheduled_at: start(),
        attachments: Vec::new(),
    }
}

/// Add recipients `first..first + count` as `reader{id}@example.org` and a list of them.
pub fn list(store: &MemoryStore, id: u64, first: u64, count: u64) -> Vec<RecipientId> {
    let subscribers: Vec<_> = (first..first + count).map(RecipientId).collect();
    for recipient in &subscribers {
        store.add_recipient(Recipient::new(*recipient, address(*recipient)));
    }
    store.add_mailing_list(MailingList {
        id: MailingListId(id),
        name: format!("list {id}"),
        subscribers: subscribers.clone(),
    });
    subscribers
}

pub fn address(recipient: RecipientId) -> String {
    format!("reader{}@example.org", recipient.0)
}

pub fn config() -> DispatchConfig {
    DispatchConfig {
        unsubscribe_secret: "s3cret".to_string(),
        ..DispatchConfig::default()
    }
}

pub fn context(store: &MemoryStore, clock: &ManualClock, config: DispatchConfig) -> DispatchContext {
    DispatchContext::new(Arc::new(store.clone()), config)
        .expect("valid config")
        .with_clock(Arc::new(clock.clone()))
}

pub async fn count(store: &MemoryStore, filter: OutcomeFilter) -> usize {
    store.count_outcomes(&filter).await.unwrap()
}

pub async fn sent_live(store: &MemoryStore, campaign: u64) -> usize {
    count(
        store,
        OutcomeFilter::default()
            .campaign(CampaignId(campaign))
            .kinds([OutcomeKind::SentLive]),
    )
    .await
}

pub async fn status(store: &MemoryStore, campaign: u64) -> CampaignStatus {
    store
        .fetch_campaign(CampaignId(campaign))
        .await
        .unwrap()
        .status
}

pub async fn eligible(store: &MemoryStore, campaign: u64) -> Vec<RecipientId> {
    store
        .fetch_eligible_recipients(CampaignId(campaign))
        .await
        .unwrap()
        .into_iter()
        .map(|recipient| recipient.id)
        .collect()
}
