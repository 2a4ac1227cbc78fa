//! Typed error handling for dispatch.
//!
//! Two layers:
//! - [`SendError`] concerns a single recipient. It is always caught by the expedition
//!   and turned into an outcome row; it never stops a run.
//! - [`DispatchError`] is fatal to the scheduler run that raised it and is surfaced to the
//!   operator with the relay, campaign and recipient it concerns.

use courier_common::{OutcomeKind, RelayId};
use courier_smtp::client::ClientError;
use courier_store::StoreError;
use thiserror::Error;

/// Failure of one send attempt.
#[derive(Debug, Error)]
pub enum SendError {
    /// The address can never be delivered to; the recipient is flagged invalid.
    #[error("Permanent failure: {0}")]
    Permanent(#[from] PermanentError),

    /// Anything else; the recipient stays eligible for the next run.
    #[error("Temporary failure: {0}")]
    Temporary(#[from] TemporaryError),
}

#[derive(Debug, Error)]
pub enum PermanentError {
    /// The address could not be parsed or encoded for the envelope.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// The relay refused the recipient at `RCPT TO`.
    #[error("Recipient refused: {0}")]
    RecipientRefused(String),
}

#[derive(Debug, Error)]
pub enum TemporaryError {
    /// The message could not be rendered for this recipient.
    #[error("Render failed: {0}")]
    Render(String),

    /// The relay greeted with an error or closed the conversation early.
    #[error("Server busy: {0}")]
    ServerBusy(String),

    /// The relay answered with a 4xx reply.
    #[error("Temporary SMTP error: {0}")]
    SmtpTemporary(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    /// The relay refused the sender or the message body.
    #[error("Message rejected: {0}")]
    MessageRejected(String),
}

impl SendError {
    /// The outcome recorded for an attempt that failed with this error.
    pub const fn outcome_kind(&self) -> OutcomeKind {
        match self {
            Self::Permanent(_) => OutcomeKind::InvalidAddress,
            Self::Temporary(_) => OutcomeKind::TransportError,
        }
    }

    /// Whether the recipient must be excluded from every future campaign.
    pub const fn invalidates_recipient(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }
}

/// Replies that reach this conversion come from outside `RCPT TO`, which is classified
/// by the session itself.
impl From<ClientError> for SendError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::SmtpError { code, message } if (400..500).contains(&code) => {
                Self::Temporary(TemporaryError::SmtpTemporary(format!("{code} {message}")))
            }

            ClientError::SmtpError { code, message }
            | ClientError::UnexpectedResponse { code, message } => {
                Self::Temporary(TemporaryError::MessageRejected(format!("{code} {message}")))
            }

            ClientError::AuthenticationFailed { code, message } => Self::Temporary(
                TemporaryError::ConnectionFailed(format!("authentication failed: {code} {message}")),
            ),

            ClientError::Io(e) => {
                Self::Temporary(TemporaryError::ConnectionFailed(format!("I/O error: {e}")))
            }

            ClientError::ConnectionClosed => Self::Temporary(TemporaryError::ConnectionFailed(
                "Connection closed unexpectedly".to_string(),
            )),

            ClientError::TlsError(msg) => {
                Self::Temporary(TemporaryError::ConnectionFailed(format!("TLS: {msg}")))
            }

            ClientError::Timeout(msg) => Self::Temporary(TemporaryError::Timeout(msg)),

            ClientError::ParseError(msg) => Self::Temporary(TemporaryError::ServerBusy(format!(
                "unparsable reply: {msg}"
            ))),

            ClientError::Utf8Error(e) => Self::Temporary(TemporaryError::ServerBusy(format!(
                "reply is not UTF-8: {e}"
            ))),

            ClientError::BuilderError(msg) => Self::Temporary(TemporaryError::Render(msg)),
        }
    }
}

/// Failure that stops a scheduler run.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No campaign on the relay can proceed without a session.
    #[error("relay {relay}: unable to open a session: {source}")]
    Session {
        relay: RelayId,
        #[source]
        source: SendError,
    },

    /// A read or write against the store failed. Losing an outcome risks a duplicate
    /// send on resume, so nothing here is retried automatically.
    #[error("{context}: {source}")]
    Store {
        context: String,
        #[source]
        source: StoreError,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl DispatchError {
    /// Adapter for `map_err` that attaches the ids involved in a store call.
    pub fn store(context: impl Into<String>) -> impl FnOnce(StoreError) -> Self {
        let context = context.into();
        move |source| Self::Store { context, source }
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_errors_invalidate() {
        let error = SendError::from(PermanentError::RecipientRefused("550 no such user".into()));
        assert!(error.invalidates_recipient());
        assert!(!error.is_temporary());
        assert_eq!(error.outcome_kind(), OutcomeKind::InvalidAddress);
    }

    #[test]
    fn test_temporary_errors_keep_recipient() {
        let error = SendError::from(TemporaryError::Render("missing variable".into()));
        assert!(!error.invalidates_recipient());
        assert_eq!(error.outcome_kind(), OutcomeKind::TransportError);
    }

    #[test]
    fn test_client_error_conversion() {
        let error: SendError = ClientError::SmtpError {
            code: 451,
            message: "try later".into(),
        }
        .into();
        assert!(matches!(
            error,
            SendError::Temporary(TemporaryError::SmtpTemporary(_))
        ));

        let error: SendError = ClientError::SmtpError {
            code: 554,
            message: "spam".into(),
        }
        .into();
        assert!(matches!(
            error,
            SendError::Temporary(TemporaryError::MessageRejected(_))
        ));

        let error: SendError = ClientError::ConnectionClosed.into();
        assert!(matches!(
            error,
            SendError::Temporary(TemporaryError::ConnectionFailed(_))
        ));
    }

    #[test]
    fn test_error_display() {
        let error = SendError::from(PermanentError::InvalidAddress("bad@".into()));
        assert_eq!(
            error.to_string(),
            "Permanent failure: Invalid address: bad@"
        );

        let error = DispatchError::store("campaign 4: recording outcome")(StoreError::Corrupted(
            "journal".into(),
        ));
        assert!(error.to_string().starts_with("campaign 4: recording outcome: "));
    }
}
