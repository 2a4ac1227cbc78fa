use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelayId(pub u64);

impl fmt::Display for RelayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the connection to a relay is secured.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelaySecurity {
    /// Cleartext for the whole session
    #[default]
    Plain,
    /// Cleartext greeting upgraded with `STARTTLS`
    StartTls,
    /// TLS from the first byte (usually port 465)
    Tls,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for RelayCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An outbound mail endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relay {
    pub id: RelayId,
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub security: RelaySecurity,
    #[serde(default)]
    pub credentials: Option<RelayCredentials>,
    /// Sends allowed per rolling hour, `0` meaning no quota
    #[serde(default)]
    pub hourly_quota: u32,
    /// Extra headers stamped on every message, one `Name: value` per line
    #[serde(default)]
    pub headers: String,
}

const fn default_port() -> u16 {
    25
}

impl Relay {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub const fn is_throttled(&self) -> bool {
        self.hourly_quota > 0
    }

    /// Parse [`Relay::headers`] into name/value pairs.
    ///
    /// Blank lines are ignored and lines without a `:` are skipped.
    pub fn custom_headers(&self) -> Vec<(String, String)> {
        self.headers
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| {
                let Some((name, value)) = line.split_once(':') else {
                    tracing::warn!(relay = %self.id, line, "Ignoring malformed custom header");
                    return None;
                };

                let name = name.trim();
                if name.is_empty() {
                    tracing::warn!(relay = %self.id, line, "Ignoring custom header without a name");
                    return None;
                }

                Some((name.to_string(), value.trim().to_string()))
            })
            .collect()
    }
}
