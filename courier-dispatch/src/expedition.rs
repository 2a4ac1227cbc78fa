//! Campaign Expedition Stream
//!
//! One [`Expedition`] walks the eligible recipients of one campaign, one recipient per
//! [`Expedition::step`]:
//!
//! ```text
//! Idle --activate--> Active --cursor empty--> Exhausted
//!                      |
//!                      +--------cancel------> Cancelled
//! ```
//!
//! The cursor lives in memory only. It is recomputed from persisted outcomes every time
//! a fresh expedition activates, and every attempt is recorded before `step` returns, so
//! a run can stop anywhere and the next one resumes without sending twice.

use std::{collections::BTreeMap, collections::VecDeque, sync::Arc};

use courier_common::{
    Campaign, CampaignId, CampaignStatus, OutcomeKind, Recipient, RecipientId, Relay, audit,
    internal, tracing,
};

use crate::{
    context::DispatchContext,
    error::{DispatchError, Result, SendError, TemporaryError},
    render::MessageRenderer,
    transport::SessionManager,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpeditionState {
    Idle,
    Active,
    Exhausted,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    /// One recipient was attempted and its outcome recorded.
    Attempted {
        recipient: RecipientId,
        outcome: OutcomeKind,
    },
    /// Nothing is left to attempt.
    Exhausted,
}

/// What one expedition did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpeditionReport {
    pub campaign: CampaignId,
    pub label: String,
    /// Recipients selected at activation.
    pub planned: usize,
    pub outcomes: BTreeMap<OutcomeKind, usize>,
    pub status: CampaignStatus,
}

impl ExpeditionReport {
    pub fn attempted(&self) -> usize {
        self.outcomes.values().sum()
    }

    pub fn count(&self, kind: OutcomeKind) -> usize {
        self.outcomes.get(&kind).copied().unwrap_or_default()
    }
}

#[derive(Debug)]
pub struct Expedition {
    campaign: Campaign,
    context: DispatchContext,
    test_mode: bool,
    limit: Option<usize>,
    state: ExpeditionState,
    cursor: VecDeque<Recipient>,
    planned: usize,
    attempted: usize,
    outcomes: BTreeMap<OutcomeKind, usize>,
    /// Either the prepared builder or why it could not be prepared.
    renderer: Option<std::result::Result<Arc<MessageRenderer>, String>>,
    label: String,
}

impl Expedition {
    pub fn new(campaign: Campaign, context: DispatchContext, test_mode: bool) -> Self {
        Self {
            label: format!("nl-{} ({})", campaign.id, truncate(&campaign.title, 10)),
            campaign,
            context,
            test_mode,
            limit: None,
            state: ExpeditionState::Idle,
            cursor: VecDeque::new(),
            planned: 0,
            attempted: 0,
            outcomes: BTreeMap::new(),
            renderer: None,
        }
    }

    /// Attempt at most `limit` recipients in this run.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub const fn id(&self) -> CampaignId {
        self.campaign.id
    }

    pub const fn state(&self) -> ExpeditionState {
        self.state
    }

    /// Whether another `step` could attempt someone.
    pub fn has_remaining(&self) -> bool {
        match self.state {
            ExpeditionState::Idle => true,
            ExpeditionState::Active => !self.cursor.is_empty(),
            ExpeditionState::Exhausted | ExpeditionState::Cancelled => false,
        }
    }

    pub fn report(&self) -> ExpeditionReport {
        ExpeditionReport {
            campaign: self.campaign.id,
            label: self.label.clone(),
            planned: self.planned,
            outcomes: self.outcomes.clone(),
            status: self.campaign.status,
        }
    }

    /// Compute the cursor and prepare the message builder. No-op unless idle.
    #[tracing::instrument(level = "debug", skip_all, fields(campaign = %self.campaign.id, relay = %relay.id))]
    pub async fn activate(&mut self, relay: &Relay) -> Result<()> {
        if self.state != ExpeditionState::Idle {
            return Ok(());
        }

        self.label = format!(
            "smtp-{} ({}), {}",
            relay.id,
            truncate(&relay.name, 10),
            self.label
        );

        let now = self.context.clock.now();
        if !self.campaign.is_sendable(now, self.test_mode) {
            internal!(
                level = DEBUG,
                campaign = %self.campaign.id,
                "{}: campaign is not sendable ({})",
                self.label,
                self.campaign.status
            );
            self.state = ExpeditionState::Exhausted;
            return Ok(());
        }

        let id = self.campaign.id;
        let recipients = if self.test_mode {
            self.context.store.fetch_test_recipients(id).await
        } else {
            self.context.store.fetch_eligible_recipients(id).await
        }
        .map_err(DispatchError::store(format!(
            "relay {}, campaign {id}: computing eligible recipients",
            relay.id
        )))?;

        self.cursor = recipients.into();
        if let Some(limit) = self.limit {
            self.cursor.truncate(limit);
        }
        self.planned = self.cursor.len();

        if !self.cursor.is_empty() {
            self.renderer = Some(
                MessageRenderer::prepare(
                    self.campaign.clone(),
                    relay,
                    Arc::clone(&self.context.templates),
                    Arc::clone(&self.context.config),
                )
                .await
                .map(Arc::new)
                .map_err(|e| {
                    tracing::error!(campaign = %id, error = %e, "Unable to prepare campaign messages");
                    e.to_string()
                }),
            );
        }

        internal!(
            level = INFO,
            campaign = %id,
            "{}: {} emails will be sent",
            self.label,
            self.planned
        );
        self.state = ExpeditionState::Active;
        Ok(())
    }

    /// Attempt the next recipient.
    ///
    /// Per-recipient failures are recorded as outcomes and never returned. An `Err` means
    /// the run must stop: no session could be opened or an outcome could not be stored.
    pub async fn step(&mut self, sessions: &mut SessionManager) -> Result<StepResult> {
        if self.state == ExpeditionState::Idle {
            self.activate(sessions.relay()).await?;
        }
        if self.state != ExpeditionState::Active {
            return Ok(StepResult::Exhausted);
        }

        let Some(recipient) = self.next_unsent().await? else {
            self.finish().await?;
            self.state = ExpeditionState::Exhausted;
            return Ok(StepResult::Exhausted);
        };

        self.attempted += 1;
        internal!(
            level = INFO,
            campaign = %self.campaign.id,
            recipient = %recipient.id,
            "{}: processing {}/{} ({})",
            self.label,
            self.attempted,
            self.planned,
            recipient.id
        );

        let outcome = self.attempt(&recipient, sessions).await?;
        *self.outcomes.entry(outcome).or_default() += 1;

        Ok(StepResult::Attempted {
            recipient: recipient.id,
            outcome,
        })
    }

    /// Pop recipients until one that no other run has sent to since activation.
    async fn next_unsent(&mut self) -> Result<Option<Recipient>> {
        while let Some(recipient) = self.cursor.pop_front() {
            if self.test_mode
                || !self
                    .context
                    .recorder
                    .has_been_sent(self.campaign.id, recipient.id)
                    .await?
            {
                return Ok(Some(recipient));
            }
            tracing::warn!(campaign = %self.campaign.id, recipient = %recipient.id, "Recipient was sent to by another run, skipping");
        }
        Ok(None)
    }

    async fn attempt(
        &self,
        recipient: &Recipient,
        sessions: &mut SessionManager,
    ) -> Result<OutcomeKind> {
        let relay = sessions.relay().id;
        let campaign = self.campaign.id;

        let result = match self.deliver(recipient, sessions).await? {
            Ok(()) if self.test_mode => Ok(OutcomeKind::SentTest),
            Ok(()) => Ok(OutcomeKind::SentLive),
            Err(error) => Err(error),
        };

        let (kind, detail) = match result {
            Ok(kind) => (kind, None),
            Err(error) => {
                if error.invalidates_recipient() {
                    self.context
                        .store
                        .flag_recipient_invalid(recipient.id)
                        .await
                        .map_err(DispatchError::store(format!(
                            "relay {relay}, campaign {campaign}, recipient {}: flagging invalid",
                            recipient.id
                        )))?;
                    audit::log_recipient_invalidated(
                        recipient.id,
                        &recipient.address,
                        &error.to_string(),
                    );
                } else {
                    tracing::warn!(%relay, %campaign, recipient = %recipient.id, %error, "Send attempt failed");
                }
                (error.outcome_kind(), Some(error.to_string()))
            }
        };

        self.context
            .recorder
            .record(campaign, recipient.id, relay, kind, detail)
            .await?;

        Ok(kind)
    }

    /// Render and hand the message over. The outer error is fatal to the run.
    async fn deliver(
        &self,
        recipient: &Recipient,
        sessions: &mut SessionManager,
    ) -> Result<std::result::Result<(), SendError>> {
        let renderer = match &self.renderer {
            Some(Ok(renderer)) => renderer,
            Some(Err(reason)) => {
                return Ok(Err(TemporaryError::Render(reason.clone()).into()));
            }
            None => {
                return Ok(Err(TemporaryError::Render(
                    "message builder was not prepared".to_string(),
                )
                .into()));
            }
        };

        let raw = match renderer
            .render(recipient, self.context.clock.now())
            .and_then(|message| message.to_mime().map(|raw| (message, raw)))
        {
            Ok(built) => built,
            Err(error) => return Ok(Err(error.into())),
        };
        let (message, raw) = raw;

        audit::log_send_attempt(
            sessions.relay().id,
            self.campaign.id,
            recipient.id,
            &recipient.address,
            self.attempted,
        );

        sessions.send(&message.from, &message.to, &raw).await
    }

    /// Persist the campaign status implied by the recorded outcomes.
    ///
    /// Waiting becomes Sending once anyone was sent to; Sending becomes Sent once no
    /// eligible recipient is left. Test runs never touch the status.
    pub async fn finish(&mut self) -> Result<()> {
        if self.test_mode {
            return Ok(());
        }

        let id = self.campaign.id;
        let store = &self.context.store;
        let current = store
            .fetch_campaign(id)
            .await
            .map_err(DispatchError::store(format!("campaign {id}: reloading status")))?
            .status;
        self.campaign.status = current;

        if !current.is_dispatchable() {
            return Ok(());
        }

        let remaining = store
            .fetch_eligible_recipients(id)
            .await
            .map_err(DispatchError::store(format!(
                "campaign {id}: counting remaining recipients"
            )))?
            .len();
        let sent_any = self.context.recorder.count_sent(id).await? > 0;

        let mut next = current;
        if next == CampaignStatus::Waiting && (sent_any || remaining == 0) {
            next = CampaignStatus::Sending;
        }
        if next == CampaignStatus::Sending && remaining == 0 {
            next = CampaignStatus::Sent;
        }

        if next != current {
            store
                .update_campaign_status(id, next)
                .await
                .map_err(DispatchError::store(format!(
                    "campaign {id}: updating status to {next}"
                )))?;
            audit::log_status_change(id, current, next);
            self.campaign.status = next;
        }

        Ok(())
    }

    /// Stop attempting recipients. Progress so far is already recorded; the campaign
    /// status is brought up to date.
    pub async fn cancel(&mut self) -> Result<()> {
        let was_active = self.state == ExpeditionState::Active;
        self.cursor.clear();
        self.state = ExpeditionState::Cancelled;

        if was_active {
            internal!(
                level = INFO,
                campaign = %self.campaign.id,
                "{}: stopped after {}/{}",
                self.label,
                self.attempted,
                self.planned
            );
            self.finish().await?;
        }
        Ok(())
    }
}

fn truncate(value: &str, chars: usize) -> String {
    value.chars().take(chars).collect()
}
