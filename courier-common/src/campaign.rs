use std::{fmt, path::PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{MailingListId, RecipientId, RelayId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CampaignId(pub u64);

impl fmt::Display for CampaignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a campaign.
///
/// Only [`CampaignStatus::Waiting`] and [`CampaignStatus::Sending`] campaigns are dispatched.
/// The dispatcher moves `Waiting -> Sending -> Sent`; `Canceled` is set administratively.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CampaignStatus {
    #[default]
    Draft,
    Waiting,
    Sending,
    Sent,
    Canceled,
}

impl CampaignStatus {
    pub const fn is_dispatchable(self) -> bool {
        matches!(self, Self::Waiting | Self::Sending)
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Canceled)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Waiting => "waiting",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file attached to every message of a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignAttachment {
    /// File name presented to the recipient
    pub title: String,
    pub path: PathBuf,
}

/// A newsletter send job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub slug: String,
    /// Subject template
    pub title: String,
    /// HTML body template
    pub content: String,
    /// `From` header and envelope sender
    pub sender: String,
    #[serde(default)]
    pub reply_to: Option<String>,
    pub mailing_list: MailingListId,
    #[serde(default)]
    pub test_recipients: Vec<RecipientId>,
    pub relay: RelayId,
    #[serde(default)]
    pub status: CampaignStatus,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub attachments: Vec<CampaignAttachment>,
}

impl Campaign {
    /// Whether this campaign may be dispatched at `now`.
    ///
    /// Test runs ignore the lifecycle except for cancellation.
    pub fn is_sendable(&self, now: DateTime<Utc>, test_mode: bool) -> bool {
        if test_mode {
            return self.status != CampaignStatus::Canceled;
        }

        self.scheduled_at <= now && self.status.is_dispatchable()
    }
}
