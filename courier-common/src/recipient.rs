use std::fmt;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientId(pub u64);

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MailingListId(pub u64);

impl fmt::Display for MailingListId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An addressable target.
///
/// The address is the identity; `valid` and `unsubscribed` are global and exclude the
/// recipient from every campaign once cleared or set respectively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: RecipientId,
    pub address: String,
    #[serde(default = "default_true")]
    pub valid: bool,
    #[serde(default)]
    pub unsubscribed: bool,
    /// Free-form values exposed to templates (first name, company, ...)
    #[serde(default)]
    pub attributes: AHashMap<String, String>,
}

const fn default_true() -> bool {
    true
}

impl Recipient {
    pub fn new(id: RecipientId, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
            valid: true,
            unsubscribed: false,
            attributes: AHashMap::new(),
        }
    }

    /// Whether any campaign may still be delivered to this recipient.
    pub const fn is_reachable(&self) -> bool {
        self.valid && !self.unsubscribed
    }
}

/// A named set of recipients that campaigns target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailingList {
    pub id: MailingListId,
    pub name: String,
    #[serde(default)]
    pub subscribers: Vec<RecipientId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reachability() {
        let mut recipient = Recipient::new(RecipientId(1), "someone@example.com");
        assert!(recipient.is_reachable());

        recipient.unsubscribed = true;
        assert!(!recipient.is_reachable());

        recipient.unsubscribed = false;
        recipient.valid = false;
        assert!(!recipient.is_reachable());
    }

    #[test]
    fn defaults_when_deserializing() {
        let recipient: Recipient = ron::from_str(r#"(id: 4, address: "x@example.com")"#).unwrap();
        assert!(recipient.valid);
        assert!(!recipient.unsubscribed);
        assert!(recipient.attributes.is_empty());
    }
}
