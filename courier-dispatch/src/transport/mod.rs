//! Transport Session Manager
//!
//! A scheduler owns exactly one [`SessionManager`] for its relay. The session is opened
//! lazily before the first send, cycled after every send when `reconnect_per_send` is
//! set, dropped after a connection-level failure, and closed when the run ends.

pub mod smtp;

use std::sync::Arc;

use async_trait::async_trait;
use courier_common::{Relay, internal, tracing};

use crate::error::{DispatchError, SendError, TemporaryError};

/// Opens sessions to relays.
#[async_trait]
pub trait Connector: Send + Sync + std::fmt::Debug {
    async fn open(&self, relay: &Relay) -> Result<Box<dyn Session>, SendError>;
}

/// An open, authenticated conversation with one relay. Not shareable.
#[async_trait]
pub trait Session: Send + std::fmt::Debug {
    /// Hand one finished message to the relay.
    async fn send(
        &mut self,
        envelope_from: &str,
        envelope_to: &str,
        message: &str,
    ) -> Result<(), SendError>;

    /// End the conversation politely. Errors are not interesting at this point.
    async fn close(&mut self);
}

impl SendError {
    /// Whether the connection this error came from can still be used.
    pub const fn breaks_session(&self) -> bool {
        matches!(
            self,
            Self::Temporary(
                TemporaryError::ConnectionFailed(_)
                    | TemporaryError::Timeout(_)
                    | TemporaryError::ServerBusy(_)
            )
        )
    }
}

#[derive(Debug)]
pub struct SessionManager {
    relay: Relay,
    connector: Arc<dyn Connector>,
    reconnect_per_send: bool,
    session: Option<Box<dyn Session>>,
    opened: usize,
}

impl SessionManager {
    pub fn new(relay: Relay, connector: Arc<dyn Connector>, reconnect_per_send: bool) -> Self {
        Self {
            relay,
            connector,
            reconnect_per_send,
            session: None,
            opened: 0,
        }
    }

    pub const fn relay(&self) -> &Relay {
        &self.relay
    }

    /// Replace the relay settings used for the next session.
    pub fn refresh_relay(&mut self, relay: Relay) {
        self.relay = relay;
    }

    pub const fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Number of sessions opened so far.
    pub const fn opened(&self) -> usize {
        self.opened
    }

    /// Open the session if there is none. Failure is fatal to the run.
    pub async fn acquire(&mut self) -> Result<&mut Box<dyn Session>, DispatchError> {
        if self.session.is_none() {
            internal!(
                level = DEBUG,
                relay = %self.relay.id,
                "Opening session to {}",
                self.relay.address()
            );

            let session = self
                .connector
                .open(&self.relay)
                .await
                .map_err(|source| DispatchError::Session {
                    relay: self.relay.id,
                    source,
                })?;
            self.opened += 1;
            self.session = Some(session);
        }

        self.session.as_mut().ok_or_else(|| {
            DispatchError::Configuration("relay session vanished after opening".to_string())
        })
    }

    /// Send through the current session, opening one first if needed.
    ///
    /// The outer error is fatal (no session could be opened); the inner one concerns this
    /// recipient only.
    pub async fn send(
        &mut self,
        envelope_from: &str,
        envelope_to: &str,
        message: &str,
    ) -> Result<Result<(), SendError>, DispatchError> {
        let session = self.acquire().await?;
        let result = session.send(envelope_from, envelope_to, message).await;

        if let Err(error) = &result
            && error.breaks_session()
        {
            tracing::warn!(relay = %self.relay.id, %error, "Dropping broken relay session");
            self.session = None;
        }

        Ok(result)
    }

    /// Apply the reconnect-per-send policy after a send.
    pub async fn after_send(&mut self) {
        if self.reconnect_per_send {
            self.release().await;
        }
    }

    /// Close the session, if any.
    pub async fn release(&mut self) {
        if let Some(mut session) = self.session.take() {
            internal!(level = DEBUG, relay = %self.relay.id, "Closing relay session");
            session.close().await;
        }
    }
}
