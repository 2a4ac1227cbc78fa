//! The dispatch engine.
//!
//! A [`RelayScheduler`] per relay interleaves the [`Expedition`]s of every campaign bound
//! to it. Each expedition renders messages through the [`MessageRenderer`], sends them
//! over the relay session owned by a [`SessionManager`], and appends one outcome per
//! attempt through the [`OutcomeRecorder`]. The [`QuotaTracker`] is consulted before
//! every send. Progress lives entirely in the store, so any run may stop at any point
//! and the next one carries on where it left off.

pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod expedition;
pub mod mailer;
pub mod outcome;
pub mod quota;
pub mod render;
pub mod report;
pub mod scheduler;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DispatchConfig, SmtpConfig, SmtpTimeouts};
pub use context::DispatchContext;
pub use error::{DispatchError, PermanentError, SendError, TemporaryError};
pub use expedition::{Expedition, ExpeditionReport, ExpeditionState, StepResult};
pub use mailer::Mailer;
pub use outcome::{OutcomeRecorder, OutcomeSummary};
pub use quota::QuotaTracker;
pub use render::{MessageRenderer, RenderError, RenderedMessage};
pub use report::{CampaignReport, RelayReport};
pub use scheduler::{RelayScheduler, Tick};
pub use transport::{Connector, Session, SessionManager, smtp::SmtpConnector};
