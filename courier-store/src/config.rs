use std::{path::PathBuf, sync::Arc};

use serde::Deserialize;

use crate::{CampaignStore, Dataset, FileStore, MemoryStore};

/// Configuration for the store backend
///
/// File-backed store in RON config:
/// ```ron
/// Courier (
///     store: File(
///         dataset: "/var/lib/courier/dataset.ron",
///         journal: "/var/lib/courier/journal.ron",
///     ),
/// )
/// ```
///
/// Memory-backed store, optionally seeded from a dataset that is never written back:
/// ```ron
/// Courier (
///     store: Memory(seed: Some("./dataset.ron")),
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum StoreConfig {
    File { dataset: PathBuf, journal: PathBuf },
    Memory {
        #[serde(default)]
        seed: Option<PathBuf>,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::File {
            dataset: PathBuf::from("/var/lib/courier/dataset.ron"),
            journal: PathBuf::from("/var/lib/courier/journal.ron"),
        }
    }
}

impl StoreConfig {
    /// Open the configured backend.
    pub async fn open(&self) -> crate::Result<Arc<dyn CampaignStore>> {
        match self {
            Self::File { dataset, journal } => {
                Ok(Arc::new(FileStore::open(dataset, journal).await?))
            }
            Self::Memory { seed: Some(seed) } => Ok(Arc::new(MemoryStore::from_dataset(
                Dataset::load(seed).await?,
            )?)),
            Self::Memory { seed: None } => Ok(Arc::new(MemoryStore::new())),
        }
    }
}
