use std::{
    io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_common::{
    Campaign, CampaignId, CampaignStatus, OutcomeFilter, Recipient, RecipientId, Relay, RelayId,
    SendOutcome, internal,
};
use serde::{Deserialize, Serialize};
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};

use crate::{CampaignStore, Dataset, MemoryStore, StoreError};

/// One line of the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum JournalEntry {
    Outcome(SendOutcome),
    Status {
        campaign: CampaignId,
        status: CampaignStatus,
    },
    Invalidated(RecipientId),
    Unsubscribed(SendOutcome),
}

/// File-backed store
///
/// The dataset file is a RON [`Dataset`] snapshot. Every mutation is first appended to
/// the journal as a single RON line and synced, and only then applied in memory, so a
/// mutation that returned `Ok` survives a crash. Opening the store replays the journal
/// over the dataset.
///
/// [`FileStore::compact`] folds the journal into a fresh dataset. The dataset is written
/// to a temporary file and renamed into place before the journal is emptied; replaying a
/// journal over a dataset that already contains it is harmless because outcomes are
/// deduplicated by id and the other entries are idempotent.
#[derive(Debug)]
pub struct FileStore {
    dataset_path: PathBuf,
    journal_path: PathBuf,
    memory: MemoryStore,
    journal: Mutex<fs::File>,
    /// Set when a failed append could not be rolled back.
    poisoned: AtomicBool,
}

impl FileStore {
    /// Load the dataset and replay the journal.
    ///
    /// A final journal line without a terminating newline is a torn write from a crash;
    /// it is discarded and truncated away. Any other unreadable line is corruption.
    pub async fn open(
        dataset_path: impl Into<PathBuf>,
        journal_path: impl Into<PathBuf>,
    ) -> crate::Result<Self> {
        let dataset_path = dataset_path.into();
        let journal_path = journal_path.into();

        internal!("Opening store dataset {}", dataset_path.display());
        let memory = MemoryStore::from_dataset(Dataset::load(&dataset_path).await?)?;

        let existing = if fs::try_exists(&journal_path).await? {
            fs::read_to_string(&journal_path).await?
        } else {
            String::new()
        };
        let (replayed, valid_len) = replay(&memory, &existing, &journal_path)?;

        let journal = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&journal_path)
            .await?;

        if valid_len < existing.len() {
            tracing::warn!(
                journal = %journal_path.display(),
                discarded = existing.len() - valid_len,
                "Discarding torn journal entry"
            );
            journal.set_len(valid_len as u64).await?;
            journal.sync_all().await?;
        }

        internal!(
            level = DEBUG,
            "Replayed {replayed} journal entries from {}",
            journal_path.display()
        );

        Ok(Self {
            dataset_path,
            journal_path,
            memory,
            journal: Mutex::new(journal),
            poisoned: AtomicBool::new(false),
        })
    }

    pub fn dataset_path(&self) -> &Path {
        &self.dataset_path
    }

    pub fn journal_path(&self) -> &Path {
        &self.journal_path
    }

    /// Write the current state as the new dataset and empty the journal.
    #[tracing::instrument(level = "debug", skip(self), fields(dataset = %self.dataset_path.display()))]
    pub async fn compact(&self) -> crate::Result<()> {
        let journal = self.journal.lock().await;

        let content = self.memory.snapshot().to_ron()?;
        let file_name = self
            .dataset_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                StoreError::Internal(format!(
                    "dataset path has no file name: {}",
                    self.dataset_path.display()
                ))
            })?;
        let temp_path = self.dataset_path.with_file_name(format!(".tmp_{file_name}"));

        let mut temp = fs::File::create(&temp_path).await?;
        temp.write_all(content.as_bytes()).await?;
        temp.sync_all().await?;
        drop(temp);
        fs::rename(&temp_path, &self.dataset_path).await?;

        journal.set_len(0).await?;
        journal.sync_all().await?;

        internal!(level = INFO, "Compacted store into {}", self.dataset_path.display());
        Ok(())
    }

    /// Append `entry`, then apply it in memory while still holding the journal.
    ///
    /// A failed append is cut back off the journal so later entries start on a fresh
    /// line. If that fails too, the store refuses every further mutation.
    async fn commit(&self, entry: JournalEntry) -> crate::Result<()> {
        let mut line = ron::to_string(&entry)?;
        line.push('\n');

        let mut journal = self.journal.lock().await;
        if self.poisoned.load(Ordering::Acquire) {
            return Err(StoreError::Internal(format!(
                "journal {} holds a partial entry, reopen the store",
                self.journal_path.display()
            )));
        }

        let before = journal.metadata().await?.len();
        if let Err(error) = append(&mut journal, line.as_bytes()).await {
            if let Err(rollback) = rewind(&journal, before).await {
                tracing::error!(
                    journal = %self.journal_path.display(),
                    %error,
                    %rollback,
                    "Unable to remove a failed journal write, refusing further writes"
                );
                self.poisoned.store(true, Ordering::Release);
            }
            return Err(error.into());
        }

        apply(&self.memory, entry)
    }
}

async fn append(journal: &mut fs::File, line: &[u8]) -> io::Result<()> {
    journal.write_all(line).await?;
    journal.sync_data().await
}

async fn rewind(journal: &fs::File, len: u64) -> io::Result<()> {
    journal.set_len(len).await?;
    journal.sync_all().await
}

fn apply(memory: &MemoryStore, entry: JournalEntry) -> crate::Result<()> {
    match entry {
        JournalEntry::Outcome(outcome) => memory.push_outcome(outcome),
        JournalEntry::Status { campaign, status } => memory.set_status(campaign, status)?,
        JournalEntry::Invalidated(recipient) => memory.set_invalid(recipient)?,
        JournalEntry::Unsubscribed(outcome) => {
            memory.set_unsubscribed(outcome.recipient)?;
            memory.push_outcome(outcome);
        }
    }
    Ok(())
}

/// Apply every complete journal line, returning how many were applied and the byte
/// length of the intact prefix.
fn replay(memory: &MemoryStore, journal: &str, path: &Path) -> crate::Result<(usize, usize)> {
    let mut applied = 0;
    let mut valid_len = 0;

    for (index, line) in journal.split_inclusive('\n').enumerate() {
        let text = line.trim();

        if text.is_empty() {
            valid_len += line.len();
            continue;
        }

        // No newline means the write never finished
        if !line.ends_with('\n') {
            break;
        }

        let entry = ron::from_str::<JournalEntry>(text).map_err(|err| {
            StoreError::Corrupted(format!("{}:{}: {err}", path.display(), index + 1))
        })?;
        apply(memory, entry)?;
        applied += 1;
        valid_len += line.len();
    }

    Ok((applied, valid_len))
}

#[async_trait]
impl CampaignStore for FileStore {
    async fn fetch_campaign(&self, id: CampaignId) -> crate::Result<Campaign> {
        self.memory.fetch_campaign(id).await
    }

    async fn campaigns(&self) -> crate::Result<Vec<Campaign>> {
        self.memory.campaigns().await
    }

    async fn update_campaign_status(
        &self,
        id: CampaignId,
        status: CampaignStatus,
    ) -> crate::Result<()> {
        if !self.memory.has_campaign(id) {
            return Err(StoreError::not_found("campaign", id));
        }
        self.commit(JournalEntry::Status {
            campaign: id,
            status,
        })
        .await
    }

    async fn fetch_eligible_recipients(&self, campaign: CampaignId) -> crate::Result<Vec<Recipient>> {
        self.memory.fetch_eligible_recipients(campaign).await
    }

    async fn fetch_test_recipients(&self, campaign: CampaignId) -> crate::Result<Vec<Recipient>> {
        self.memory.fetch_test_recipients(campaign).await
    }

    async fn fetch_recipient(&self, id: RecipientId) -> crate::Result<Recipient> {
        self.memory.fetch_recipient(id).await
    }

    async fn fetch_relay(&self, id: RelayId) -> crate::Result<Relay> {
        self.memory.fetch_relay(id).await
    }

    async fn relays(&self) -> crate::Result<Vec<Relay>> {
        self.memory.relays().await
    }

    async fn insert_outcome(&self, outcome: SendOutcome) -> crate::Result<()> {
        self.commit(JournalEntry::Outcome(outcome)).await
    }

    async fn query_outcomes(&self, filter: &OutcomeFilter) -> crate::Result<Vec<SendOutcome>> {
        self.memory.query_outcomes(filter).await
    }

    async fn count_outcomes(&self, filter: &OutcomeFilter) -> crate::Result<usize> {
        self.memory.count_outcomes(filter).await
    }

    async fn flag_recipient_invalid(&self, id: RecipientId) -> crate::Result<()> {
        if !self.memory.has_recipient(id) {
            return Err(StoreError::not_found("recipient", id));
        }
        self.commit(JournalEntry::Invalidated(id)).await
    }

    async fn unsubscribe(
        &self,
        recipient: RecipientId,
        campaign: CampaignId,
        at: DateTime<Utc>,
    ) -> crate::Result<()> {
        let outcome = self.memory.unsubscribe_outcome(recipient, campaign, at)?;
        self.commit(JournalEntry::Unsubscribed(outcome)).await
    }

    async fn checkpoint(&self) -> crate::Result<()> {
        self.compact().await
    }
}
