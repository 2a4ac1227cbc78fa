//! Shared types for the courier workspace.
//!
//! The domain model here is owned by the persistence layer; the dispatch engine reads
//! campaigns, recipients and relays and only ever writes campaign status, recipient
//! validity and append-only [`outcome::SendOutcome`] records.

pub mod audit;
pub mod campaign;
pub mod logging;
pub mod outcome;
pub mod recipient;
pub mod relay;

pub use campaign::{Campaign, CampaignAttachment, CampaignId, CampaignStatus};
pub use outcome::{OutcomeFilter, OutcomeId, OutcomeKind, SendOutcome};
pub use recipient::{MailingList, MailingListId, Recipient, RecipientId};
pub use relay::{Relay, RelayCredentials, RelayId, RelaySecurity};
pub use tracing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
