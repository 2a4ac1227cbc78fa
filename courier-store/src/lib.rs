//! Persistence for campaigns, recipients, relays and send outcomes.
//!
//! The dispatcher only talks to the [`CampaignStore`] trait. Two backends are provided:
//! [`MemoryStore`] for tests and dry runs, and [`FileStore`] which loads a RON dataset and
//! appends every mutation to a journal before acknowledging it.

pub mod backends;
pub mod config;
pub mod dataset;
pub mod error;
pub mod r#trait;

pub use backends::{FileStore, MemoryStore};
pub use config::StoreConfig;
pub use dataset::Dataset;
pub use error::{Result, StoreError};
pub use r#trait::CampaignStore;
