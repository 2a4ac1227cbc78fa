#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::Path;

use chrono::{TimeDelta, Utc};
use courier_common::{
    CampaignId, CampaignStatus, OutcomeFilter, OutcomeKind, RecipientId, RelayId, SendOutcome,
};
use courier_store::{CampaignStore, Dataset, FileStore, StoreError};
use pretty_assertions::assert_eq;

const DATASET: &str = r#"(
    relays: [
        (id: 1, name: "primary", host: "smtp.example.com", port: 587, security: StartTls, hourly_quota: 2),
    ],
    mailing_lists: [
        (id: 1, name: "news", subscribers: [1, 2, 3]),
    ],
    recipients: [
        (id: 1, address: "one@example.com"),
        (id: 2, address: "two@example.com", attributes: {"name": "Two"}),
        (id: 3, address: "three@example.com"),
    ],
    campaigns: [
        (
            id: 5,
            slug: "spring",
            title: "Spring news",
            content: "<p>Hello</p>",
            sender: "news@example.com",
            mailing_list: 1,
            relay: 1,
            status: Waiting,
            scheduled_at: "2024-01-01T00:00:00Z",
        ),
    ],
)"#;

fn write_dataset(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
    let dataset = dir.join("dataset.ron");
    let journal = dir.join("journal.ron");
    std::fs::write(&dataset, DATASET).unwrap();
    (dataset, journal)
}

fn sent(recipient: u64) -> SendOutcome {
    SendOutcome::new(
        CampaignId(5),
        RecipientId(recipient),
        RelayId(1),
        OutcomeKind::SentLive,
        Utc::now(),
    )
}

fn eligible_ids(recipients: &[courier_common::Recipient]) -> Vec<u64> {
    recipients.iter().map(|r| r.id.0).collect()
}

#[tokio::test]
async fn test_loads_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let (dataset, journal) = write_dataset(dir.path());

    let store = FileStore::open(&dataset, &journal).await.expect("open");

    let relay = store.fetch_relay(RelayId(1)).await.expect("relay");
    assert_eq!(relay.hourly_quota, 2);
    assert_eq!(relay.port, 587);

    let campaign = store.fetch_campaign(CampaignId(5)).await.expect("campaign");
    assert_eq!(campaign.status, CampaignStatus::Waiting);

    let recipient = store.fetch_recipient(RecipientId(2)).await.expect("recipient");
    assert_eq!(recipient.attributes.get("name").map(String::as_str), Some("Two"));
}

#[tokio::test]
async fn test_mutations_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let (dataset, journal) = write_dataset(dir.path());

    {
        let store = FileStore::open(&dataset, &journal).await.expect("open");
        store.insert_outcome(sent(1)).await.expect("insert");
        store
            .flag_recipient_invalid(RecipientId(2))
            .await
            .expect("invalidate");
        store
            .update_campaign_status(CampaignId(5), CampaignStatus::Sending)
            .await
            .expect("status");
    }

    let store = FileStore::open(&dataset, &journal).await.expect("reopen");
    assert_eq!(
        store
            .fetch_campaign(CampaignId(5))
            .await
            .expect("campaign")
            .status,
        CampaignStatus::Sending
    );
    assert_eq!(
        eligible_ids(
            &store
                .fetch_eligible_recipients(CampaignId(5))
                .await
                .expect("eligible")
        ),
        vec![3]
    );
}

#[tokio::test]
async fn test_torn_last_line_is_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let (dataset, journal) = write_dataset(dir.path());

    {
        let store = FileStore::open(&dataset, &journal).await.expect("open");
        store.insert_outcome(sent(1)).await.expect("insert");
    }

    let mut content = std::fs::read_to_string(&journal).unwrap();
    content.push_str("Outcome((id: \"01H");
    std::fs::write(&journal, &content).unwrap();

    let store = FileStore::open(&dataset, &journal).await.expect("reopen");
    store.insert_outcome(sent(2)).await.expect("insert after repair");
    drop(store);

    let store = FileStore::open(&dataset, &journal).await.expect("reopen again");
    let count = store
        .count_outcomes(&OutcomeFilter::default().campaign(CampaignId(5)))
        .await
        .expect("count");
    assert_eq!(count, 2);
}

#[tokio::test]
async fn test_corrupt_middle_line_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let (dataset, journal) = write_dataset(dir.path());
    std::fs::write(&journal, "garbage\nInvalidated(1)\n").unwrap();

    let err = FileStore::open(&dataset, &journal).await.unwrap_err();
    assert!(matches!(err, StoreError::Corrupted(_)), "{err}");
}

#[tokio::test]
async fn test_compaction_folds_journal_into_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let (dataset, journal) = write_dataset(dir.path());

    let store = FileStore::open(&dataset, &journal).await.expect("open");
    store.insert_outcome(sent(1)).await.expect("insert");
    store
        .unsubscribe(RecipientId(3), CampaignId(5), Utc::now())
        .await
        .expect("unsubscribe");
    store.checkpoint().await.expect("compact");
    drop(store);

    assert_eq!(std::fs::read_to_string(&journal).unwrap(), "");

    let snapshot = Dataset::load(&dataset).await.expect("load");
    assert_eq!(snapshot.outcomes.len(), 2);
    assert!(
        snapshot
            .recipients
            .iter()
            .any(|r| r.id == RecipientId(3) && r.unsubscribed)
    );

    let store = FileStore::open(&dataset, &journal).await.expect("reopen");
    assert_eq!(
        eligible_ids(
            &store
                .fetch_eligible_recipients(CampaignId(5))
                .await
                .expect("eligible")
        ),
        vec![2]
    );
}

#[tokio::test]
async fn test_replaying_a_compacted_journal_does_not_duplicate() {
    let dir = tempfile::tempdir().unwrap();
    let (dataset, journal) = write_dataset(dir.path());

    let store = FileStore::open(&dataset, &journal).await.expect("open");
    store.insert_outcome(sent(1)).await.expect("insert");
    let lines = std::fs::read_to_string(&journal).unwrap();
    store.compact().await.expect("compact");
    drop(store);

    // Crash between the dataset rename and the journal truncation
    std::fs::write(&journal, lines).unwrap();

    let store = FileStore::open(&dataset, &journal).await.expect("reopen");
    let outcomes = store
        .query_outcomes(&OutcomeFilter::default())
        .await
        .expect("query");
    assert_eq!(outcomes.len(), 1);
}

#[tokio::test]
async fn test_rolling_window_query() {
    let dir = tempfile::tempdir().unwrap();
    let (dataset, journal) = write_dataset(dir.path());
    let store = FileStore::open(&dataset, &journal).await.expect("open");

    let now = Utc::now();
    let mut old = sent(1);
    old.recorded_at = now - TimeDelta::hours(2);
    store.insert_outcome(old).await.expect("insert");
    store.insert_outcome(sent(2)).await.expect("insert");

    let filter = OutcomeFilter::default()
        .relay(RelayId(1))
        .kinds(OutcomeKind::DELIVERIES)
        .since(now - TimeDelta::hours(1));
    assert_eq!(store.count_outcomes(&filter).await.expect("count"), 1);
}
