//! Dispatch and relay session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

const fn default_hard_limit() -> u32 {
    10_000
}

const fn default_quota_window() -> u64 {
    3600
}

const fn default_idle_interval() -> u64 {
    600
}

const fn default_unique_key_length() -> usize {
    8
}

fn default_unique_key_charset() -> String {
    "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789".to_string()
}

fn default_site_domain() -> String {
    "www.example.com".to_string()
}

const fn default_true() -> bool {
    true
}

const fn default_text_wrap_width() -> usize {
    78
}

const fn default_shutdown_timeout() -> u64 {
    30
}

/// Settings shared by every scheduler and expedition of a process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Credits granted per window to a relay without an hourly quota
    #[serde(default = "default_hard_limit")]
    pub hard_limit: u32,

    /// Length of the rolling quota window (in seconds)
    #[serde(default = "default_quota_window")]
    pub quota_window_secs: u64,

    /// How long a scheduler sleeps when no campaign can make progress (in seconds)
    #[serde(default = "default_idle_interval")]
    pub idle_interval_secs: u64,

    /// Minimum pause after every send, whatever the relay quota (in milliseconds)
    #[serde(default)]
    pub sleep_between_sends_ms: u64,

    /// Close and reopen the relay session after every single send
    #[serde(default)]
    pub reconnect_per_send: bool,

    /// Length of the `UNIQUE_KEY` template variable
    #[serde(default = "default_unique_key_length")]
    pub unique_key_length: usize,

    /// Characters `UNIQUE_KEY` is drawn from, without replacement
    #[serde(default = "default_unique_key_charset")]
    pub unique_key_charset: String,

    /// Public host used for view-on-site and unsubscribe links
    #[serde(default = "default_site_domain")]
    pub site_domain: String,

    /// Add `List-Unsubscribe` headers and the `unsubscribe` template variable
    #[serde(default = "default_true")]
    pub include_unsubscribe: bool,

    /// Secret mixed into unsubscribe and tracking tokens
    #[serde(default)]
    pub unsubscribe_secret: String,

    /// Column at which the plain-text alternative is wrapped
    #[serde(default = "default_text_wrap_width")]
    pub text_wrap_width: usize,

    /// How long a stopping scheduler waits for the in-flight send (in seconds)
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            hard_limit: default_hard_limit(),
            quota_window_secs: default_quota_window(),
            idle_interval_secs: default_idle_interval(),
            sleep_between_sends_ms: 0,
            reconnect_per_send: false,
            unique_key_length: default_unique_key_length(),
            unique_key_charset: default_unique_key_charset(),
            site_domain: default_site_domain(),
            include_unsubscribe: true,
            unsubscribe_secret: String::new(),
            text_wrap_width: default_text_wrap_width(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl DispatchConfig {
    /// Reject settings that would make rendering or pacing impossible.
    pub fn validate(&self) -> Result<(), DispatchError> {
        let charset = self.unique_key_charset.chars().count();
        if self.unique_key_length > charset {
            return Err(DispatchError::Configuration(format!(
                "unique_key_length ({}) exceeds the {charset} characters of unique_key_charset",
                self.unique_key_length
            )));
        }
        if self.quota_window_secs == 0 {
            return Err(DispatchError::Configuration(
                "quota_window_secs must be positive".to_string(),
            ));
        }
        if self.text_wrap_width == 0 {
            return Err(DispatchError::Configuration(
                "text_wrap_width must be positive".to_string(),
            ));
        }
        if self.site_domain.trim().is_empty() {
            return Err(DispatchError::Configuration(
                "site_domain must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub const fn quota_window(&self) -> Duration {
        Duration::from_secs(self.quota_window_secs)
    }

    pub const fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_interval_secs)
    }

    pub const fn sleep_between_sends(&self) -> Duration {
        Duration::from_millis(self.sleep_between_sends_ms)
    }

    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

const fn default_connect_timeout() -> u64 {
    30
}

const fn default_command_timeout() -> u64 {
    30
}

const fn default_data_timeout() -> u64 {
    120
}

const fn default_quit_timeout() -> u64 {
    10
}

/// SMTP operation timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpTimeouts {
    /// Connection establishment, TLS handshake and greeting
    ///
    /// Default: 30 seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_secs: u64,

    /// Every command other than `DATA` and `QUIT`
    ///
    /// Default: 30 seconds
    #[serde(default = "default_command_timeout")]
    pub command_secs: u64,

    /// `DATA` and the transmission of the message
    ///
    /// Default: 120 seconds (2 minutes)
    #[serde(default = "default_data_timeout")]
    pub data_secs: u64,

    /// Default: 10 seconds
    #[serde(default = "default_quit_timeout")]
    pub quit_secs: u64,
}

impl Default for SmtpTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_timeout(),
            command_secs: default_command_timeout(),
            data_secs: default_data_timeout(),
            quit_secs: default_quit_timeout(),
        }
    }
}

fn default_helo_name() -> String {
    "localhost".to_string()
}

/// How sessions to relays are opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Name announced in `EHLO`
    #[serde(default = "default_helo_name")]
    pub helo_name: String,

    /// Accept invalid TLS certificates (for testing only)
    ///
    /// **SECURITY WARNING**: disables certificate validation for every relay.
    ///
    /// Default: `false` (secure)
    #[serde(default)]
    pub accept_invalid_certs: bool,

    #[serde(default)]
    pub timeouts: SmtpTimeouts,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            helo_name: default_helo_name(),
            accept_invalid_certs: false,
            timeouts: SmtpTimeouts::default(),
        }
    }
}
