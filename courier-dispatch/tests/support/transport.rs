//! In-memory relay for dispatch tests
//!
//! Records every envelope handed over and fails on request, per recipient address.
#![allow(dead_code)]

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use courier_common::Relay;
use courier_dispatch::{Connector, PermanentError, SendError, Session, TemporaryError};
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub from: String,
    pub to: String,
    pub message: String,
}

/// How a send to one address fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// `RCPT TO` answered with 550
    Refuse,
    /// The relay answered with a 4xx
    Temporary,
    /// The connection dropped mid-transaction
    Disconnect,
}

#[derive(Debug, Default)]
struct State {
    delivered: Vec<Envelope>,
    failures: HashMap<String, Failure>,
    refuse_open: bool,
    opens: usize,
    closes: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<State>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, address: &str, failure: Failure) {
        self.state.lock().failures.insert(address.to_string(), failure);
    }

    pub fn refuse_open(&self) {
        self.state.lock().refuse_open = true;
    }

    pub fn delivered(&self) -> Vec<Envelope> {
        self.state.lock().delivered.clone()
    }

    /// Recipients delivered to, in order.
    pub fn delivered_to(&self) -> Vec<String> {
        self.state
            .lock()
            .delivered
            .iter()
            .map(|envelope| envelope.to.clone())
            .collect()
    }

    pub fn opens(&self) -> usize {
        self.state.lock().opens
    }

    pub fn closes(&self) -> usize {
        self.state.lock().closes
    }

    pub fn arc(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, relay: &Relay) -> Result<Box<dyn Session>, SendError> {
        let mut state = self.state.lock();
        if state.refuse_open {
            return Err(TemporaryError::ConnectionFailed(format!(
                "{} refused the connection",
                relay.address()
            ))
            .into());
        }
        state.opens += 1;

        Ok(Box::new(MockSession {
            state: Arc::clone(&self.state),
        }))
    }
}

#[derive(Debug)]
struct MockSession {
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl Session for MockSession {
    async fn send(
        &mut self,
        envelope_from: &str,
        envelope_to: &str,
        message: &str,
    ) -> Result<(), SendError> {
        let mut state = self.state.lock();
        let failure = state.failures.get(envelope_to).copied();

        match failure {
            Some(Failure::Refuse) => Err(PermanentError::RecipientRefused(format!(
                "{envelope_to}: 550 No such user"
            ))
            .into()),
            Some(Failure::Temporary) => Err(TemporaryError::SmtpTemporary(
                "RCPT TO rejected: 451 Try again later".to_string(),
            )
            .into()),
            Some(Failure::Disconnect) => {
                Err(TemporaryError::ConnectionFailed("connection reset".to_string()).into())
            }
            None => {
                state.delivered.push(Envelope {
                    from: envelope_from.to_string(),
                    to: envelope_to.to_string(),
                    message: message.to_string(),
                });
                Ok(())
            }
        }
    }

    async fn close(&mut self) {
        self.state.lock().closes += 1;
    }
}
