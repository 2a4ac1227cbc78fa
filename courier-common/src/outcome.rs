use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CampaignId, RecipientId, RelayId};

/// Identifier of an outcome row.
///
/// ULIDs sort by creation time, so ordering by id is ordering by insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutcomeId(ulid::Ulid);

impl OutcomeId {
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new())
    }

    #[must_use]
    pub const fn ulid(&self) -> ulid::Ulid {
        self.0
    }
}

impl fmt::Display for OutcomeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OutcomeKind {
    SentLive,
    SentTest,
    TransportError,
    InvalidAddress,
    Unsubscribed,
    Opened,
    OpenedOnSite,
    LinkOpened,
}

impl OutcomeKind {
    pub const ALL: [Self; 8] = [
        Self::SentLive,
        Self::SentTest,
        Self::TransportError,
        Self::InvalidAddress,
        Self::Unsubscribed,
        Self::Opened,
        Self::OpenedOnSite,
        Self::LinkOpened,
    ];

    /// Outcomes that consume relay quota.
    pub const DELIVERIES: [Self; 2] = [Self::SentLive, Self::SentTest];

    pub const fn is_delivery(self) -> bool {
        matches!(self, Self::SentLive | Self::SentTest)
    }

    /// Outcomes reported after delivery by the recipient's own actions.
    pub const fn is_engagement(self) -> bool {
        matches!(
            self,
            Self::Unsubscribed | Self::Opened | Self::OpenedOnSite | Self::LinkOpened
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SentLive => "sent",
            Self::SentTest => "sent-test",
            Self::TransportError => "transport-error",
            Self::InvalidAddress => "invalid-address",
            Self::Unsubscribed => "unsubscribed",
            Self::Opened => "opened",
            Self::OpenedOnSite => "opened-on-site",
            Self::LinkOpened => "link-opened",
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of what happened when reaching one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOutcome {
    pub id: OutcomeId,
    pub campaign: CampaignId,
    pub recipient: RecipientId,
    pub relay: RelayId,
    pub kind: OutcomeKind,
    #[serde(default)]
    pub detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl SendOutcome {
    pub fn new(
        campaign: CampaignId,
        recipient: RecipientId,
        relay: RelayId,
        kind: OutcomeKind,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: OutcomeId::generate(),
            campaign,
            recipient,
            relay,
            kind,
            detail: None,
            recorded_at,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Selection over outcome rows. Unset fields match everything.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OutcomeFilter {
    pub campaign: Option<CampaignId>,
    pub recipient: Option<RecipientId>,
    pub relay: Option<RelayId>,
    /// Empty matches every kind
    pub kinds: Vec<OutcomeKind>,
    /// Inclusive lower bound on `recorded_at`
    pub since: Option<DateTime<Utc>>,
}

impl OutcomeFilter {
    #[must_use]
    pub fn campaign(mut self, campaign: CampaignId) -> Self {
        self.campaign = Some(campaign);
        self
    }

    #[must_use]
    pub fn recipient(mut self, recipient: RecipientId) -> Self {
        self.recipient = Some(recipient);
        self
    }

    #[must_use]
    pub fn relay(mut self, relay: RelayId) -> Self {
        self.relay = Some(relay);
        self
    }

    #[must_use]
    pub fn kinds(mut self, kinds: impl IntoIterator<Item = OutcomeKind>) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }

    #[must_use]
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn matches(&self, outcome: &SendOutcome) -> bool {
        self.campaign.is_none_or(|c| c == outcome.campaign)
            && self.recipient.is_none_or(|r| r == outcome.recipient)
            && self.relay.is_none_or(|r| r == outcome.relay)
            && (self.kinds.is_empty() || self.kinds.contains(&outcome.kind))
            && self.since.is_none_or(|since| outcome.recorded_at >= since)
    }
}
