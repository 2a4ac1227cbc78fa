//! Audit logging for dispatch lifecycle events
//!
//! Every event is emitted on the `courier::audit` target so it can be routed separately
//! from operational logs.
//!
//! ## Audit Events
//!
//! - `SendAttempt`: a rendered message is handed to a relay session
//! - `OutcomeRecorded`: an outcome row was appended for a (campaign, recipient) pair
//! - `CampaignStatusChanged`: the dispatcher moved a campaign to a new status
//! - `RecipientInvalidated`: a recipient address was permanently flagged invalid
//!
//! ## PII Redaction
//!
//! Recipient addresses can be redacted through [`AuditConfig::redact_recipients`]; the
//! domain is kept so per-provider problems remain visible.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{CampaignId, CampaignStatus, OutcomeKind, RecipientId, RelayId};

/// Audit logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Enable audit logging for dispatch events
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Redact recipient addresses from audit logs
    #[serde(default)]
    pub redact_recipients: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redact_recipients: false,
        }
    }
}

const fn default_true() -> bool {
    true
}

static AUDIT_CONFIG: std::sync::OnceLock<Arc<AuditConfig>> = std::sync::OnceLock::new();

/// Initialize audit logging with configuration
///
/// Only the first call takes effect.
pub fn init(config: AuditConfig) {
    AUDIT_CONFIG.get_or_init(|| Arc::new(config));
}

/// Get the current audit configuration
#[must_use]
pub fn config() -> Arc<AuditConfig> {
    AUDIT_CONFIG
        .get()
        .cloned()
        .unwrap_or_else(|| Arc::new(AuditConfig::default()))
}

/// Redact email address if redaction is enabled
#[must_use]
pub fn redact_email(email: &str, redact: bool) -> String {
    if redact {
        // Keep domain but redact local part
        if let Some((_, domain)) = email.rsplit_once('@') {
            format!("[REDACTED]@{domain}")
        } else {
            "[REDACTED]".to_string()
        }
    } else {
        email.to_string()
    }
}

/// Log a send attempt.
///
/// # Fields
/// - `relay`: relay the message is handed to
/// - `campaign`: campaign being dispatched
/// - `recipient`: recipient id
/// - `address`: recipient address (redacted if configured)
/// - `attempt`: 1-based position of this recipient in the current run
pub fn log_send_attempt(
    relay: RelayId,
    campaign: CampaignId,
    recipient: RecipientId,
    address: &str,
    attempt: usize,
) {
    let config = config();
    if !config.enabled {
        return;
    }

    tracing::event!(
        target: "courier::audit",
        tracing::Level::INFO,
        event = "SendAttempt",
        relay = %relay,
        campaign = %campaign,
        recipient = %recipient,
        address = %redact_email(address, config.redact_recipients),
        attempt = attempt,
        "Audit: Send attempt"
    );
}

/// Log an appended outcome.
pub fn log_outcome(
    campaign: CampaignId,
    recipient: RecipientId,
    kind: OutcomeKind,
    detail: Option<&str>,
) {
    let config = config();
    if !config.enabled {
        return;
    }

    let level_is_failure = matches!(
        kind,
        OutcomeKind::TransportError | OutcomeKind::InvalidAddress
    );

    if level_is_failure {
        tracing::event!(
            target: "courier::audit",
            tracing::Level::WARN,
            event = "OutcomeRecorded",
            campaign = %campaign,
            recipient = %recipient,
            outcome = %kind,
            detail = detail.unwrap_or_default(),
            "Audit: Outcome recorded"
        );
    } else {
        tracing::event!(
            target: "courier::audit",
            tracing::Level::INFO,
            event = "OutcomeRecorded",
            campaign = %campaign,
            recipient = %recipient,
            outcome = %kind,
            "Audit: Outcome recorded"
        );
    }
}

/// Log a campaign status transition made by the dispatcher.
pub fn log_status_change(campaign: CampaignId, from: CampaignStatus, to: CampaignStatus) {
    let config = config();
    if !config.enabled {
        return;
    }

    tracing::event!(
        target: "courier::audit",
        tracing::Level::INFO,
        event = "CampaignStatusChanged",
        campaign = %campaign,
        from = %from,
        to = %to,
        "Audit: Campaign status changed"
    );
}

/// Log a recipient being permanently flagged invalid.
pub fn log_recipient_invalidated(recipient: RecipientId, address: &str, reason: &str) {
    let config = config();
    if !config.enabled {
        return;
    }

    tracing::event!(
        target: "courier::audit",
        tracing::Level::WARN,
        event = "RecipientInvalidated",
        recipient = %recipient,
        address = %redact_email(address, config.redact_recipients),
        reason = %reason,
        "Audit: Recipient invalidated"
    );
}
