//! Backend implementations of [`crate::CampaignStore`]
//!
//! - `memory`: everything in process memory, used by tests and dry runs
//! - `file`: a RON dataset plus an append-only RON journal of mutations

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;
