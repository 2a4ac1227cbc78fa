use std::path::Path;

use courier_common::{Campaign, MailingList, Recipient, Relay, SendOutcome};
use serde::{Deserialize, Serialize};

/// A full snapshot of everything the store owns.
///
/// ```ron
/// Dataset(
///     relays: [(id: 1, name: "primary", host: "smtp.example.com", hourly_quota: 500)],
///     mailing_lists: [(id: 1, name: "news", subscribers: [1, 2])],
///     recipients: [(id: 1, address: "a@example.com"), (id: 2, address: "b@example.com")],
///     campaigns: [],
/// )
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub relays: Vec<Relay>,
    #[serde(default)]
    pub mailing_lists: Vec<MailingList>,
    #[serde(default)]
    pub recipients: Vec<Recipient>,
    #[serde(default)]
    pub campaigns: Vec<Campaign>,
    #[serde(default)]
    pub outcomes: Vec<SendOutcome>,
}

impl Dataset {
    /// Read a dataset from a RON file.
    pub async fn load(path: &Path) -> crate::Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(ron::from_str(&content)?)
    }

    pub fn to_ron(&self) -> crate::Result<String> {
        Ok(ron::ser::to_string_pretty(
            self,
            ron::ser::PrettyConfig::default(),
        )?)
    }
}
