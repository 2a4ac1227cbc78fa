//! SMTP sessions to relays.
//!
//! Every protocol step is bounded by a timeout from [`SmtpTimeouts`]. Replies are
//! classified as follows:
//! - `RCPT TO` 5xx: the recipient is refused (permanent)
//! - any other 4xx: temporary
//! - any other 5xx: the message is rejected, the recipient stays eligible

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use courier_common::{Relay, RelayId, RelaySecurity, tracing};
use courier_smtp::client::{Response, SmtpClient};

use super::{Connector, Session};
use crate::{
    config::{SmtpConfig, SmtpTimeouts},
    error::{PermanentError, SendError, TemporaryError},
};

/// Run one protocol step under a deadline.
async fn within<T>(
    limit: Duration,
    step: &str,
    future: impl Future<Output = courier_smtp::client::Result<T>>,
) -> Result<T, SendError> {
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| TemporaryError::Timeout(format!("{step} timed out after {limit:?}")))?
        .map_err(SendError::from)
}

fn rejected(step: &str, response: &Response) -> SendError {
    let message = format!("{step} rejected: {} {}", response.code, response.message());
    if response.is_temporary_error() {
        TemporaryError::SmtpTemporary(message).into()
    } else {
        TemporaryError::MessageRejected(message).into()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SmtpConnector {
    config: SmtpConfig,
}

impl SmtpConnector {
    pub const fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    async fn greet(&self, client: &mut SmtpClient, timeouts: &SmtpTimeouts) -> Result<Response, SendError> {
        let command = Duration::from_secs(timeouts.command_secs);
        let helo_name = &self.config.helo_name;

        let ehlo = within(command, "EHLO", client.ehlo(helo_name)).await?;
        if ehlo.is_success() {
            return Ok(ehlo);
        }

        let helo = within(command, "HELO", client.helo(helo_name)).await?;
        if helo.is_success() {
            Ok(helo)
        } else {
            Err(TemporaryError::ServerBusy(format!(
                "relay refused EHLO and HELO: {} {}",
                helo.code,
                helo.message()
            ))
            .into())
        }
    }

    async fn authenticate(
        client: &mut SmtpClient,
        relay: &Relay,
        capabilities: &Response,
        timeouts: &SmtpTimeouts,
    ) -> Result<(), SendError> {
        let Some(credentials) = &relay.credentials else {
            return Ok(());
        };
        let command = Duration::from_secs(timeouts.command_secs);
        let mechanisms = capabilities.extension_params("AUTH");

        if mechanisms.iter().any(|m| m.eq_ignore_ascii_case("LOGIN"))
            && !mechanisms.iter().any(|m| m.eq_ignore_ascii_case("PLAIN"))
        {
            within(
                command,
                "AUTH LOGIN",
                client.auth_login(&credentials.username, &credentials.password),
            )
            .await?;
        } else {
            within(
                command,
                "AUTH PLAIN",
                client.auth_plain(&credentials.username, &credentials.password),
            )
            .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl Connector for SmtpConnector {
    async fn open(&self, relay: &Relay) -> Result<Box<dyn Session>, SendError> {
        let timeouts = self.config.timeouts;
        let connect = Duration::from_secs(timeouts.connect_secs);
        let address = relay.address();

        if self.config.accept_invalid_certs && relay.security != RelaySecurity::Plain {
            tracing::warn!(
                relay = %relay.id,
                "SECURITY WARNING: TLS certificate validation is disabled for this relay"
            );
        }

        let mut client = match relay.security {
            RelaySecurity::Tls => {
                within(
                    connect,
                    "connect",
                    SmtpClient::connect_tls(&address, relay.host.clone(), self.config.accept_invalid_certs),
                )
                .await?
            }
            RelaySecurity::Plain | RelaySecurity::StartTls => within(
                connect,
                "connect",
                SmtpClient::connect(&address, relay.host.clone()),
            )
            .await?
            .accept_invalid_certs(self.config.accept_invalid_certs),
        };

        let greeting = within(connect, "greeting", client.read_greeting()).await?;
        if !greeting.is_success() {
            return Err(TemporaryError::ServerBusy(format!(
                "relay {} refused the connection: {} {}",
                relay.id,
                greeting.code,
                greeting.message()
            ))
            .into());
        }

        let mut capabilities = self.greet(&mut client, &timeouts).await?;

        if relay.security == RelaySecurity::StartTls {
            let response = within(connect, "STARTTLS", client.starttls()).await?;
            if !response.is_success() {
                return Err(TemporaryError::ConnectionFailed(format!(
                    "relay {} refused STARTTLS: {} {}",
                    relay.id,
                    response.code,
                    response.message()
                ))
                .into());
            }
            capabilities = self.greet(&mut client, &timeouts).await?;
        }

        Self::authenticate(&mut client, relay, &capabilities, &timeouts).await?;

        tracing::debug!(relay = %relay.id, tls = client.is_tls(), "Relay session ready");

        Ok(Box::new(SmtpSession {
            client,
            relay: relay.id,
            timeouts,
        }))
    }
}

#[derive(Debug)]
pub struct SmtpSession {
    client: SmtpClient,
    relay: RelayId,
    timeouts: SmtpTimeouts,
}

impl SmtpSession {
    async fn transaction(
        &mut self,
        envelope_from: &str,
        envelope_to: &str,
        message: &str,
    ) -> Result<(), SendError> {
        let command = Duration::from_secs(self.timeouts.command_secs);
        let data = Duration::from_secs(self.timeouts.data_secs);

        let response = within(command, "MAIL FROM", self.client.mail_from(envelope_from)).await?;
        if !response.is_success() {
            return Err(rejected("MAIL FROM", &response));
        }

        let response = within(command, "RCPT TO", self.client.rcpt_to(envelope_to)).await?;
        if response.is_permanent_error() {
            return Err(PermanentError::RecipientRefused(format!(
                "{envelope_to}: {} {}",
                response.code,
                response.message()
            ))
            .into());
        }
        if !response.is_success() {
            return Err(rejected("RCPT TO", &response));
        }

        let response = within(data, "DATA", self.client.data()).await?;
        if !response.is_intermediate() {
            return Err(rejected("DATA", &response));
        }

        let response = within(data, "message", self.client.send_data(message)).await?;
        if !response.is_success() {
            return Err(rejected("message", &response));
        }

        Ok(())
    }
}

#[async_trait]
impl Session for SmtpSession {
    async fn send(
        &mut self,
        envelope_from: &str,
        envelope_to: &str,
        message: &str,
    ) -> Result<(), SendError> {
        let result = self.transaction(envelope_from, envelope_to, message).await;

        // A refused step leaves a half-open transaction behind.
        if let Err(error) = &result
            && !error.breaks_session()
        {
            let command = Duration::from_secs(self.timeouts.command_secs);
            if let Err(reset) = within(command, "RSET", self.client.rset()).await {
                tracing::debug!(relay = %self.relay, %reset, "RSET after a refused transaction failed");
            }
        }

        result
    }

    async fn close(&mut self) {
        let quit = Duration::from_secs(self.timeouts.quit_secs);
        if let Err(e) = within(quit, "QUIT", self.client.quit()).await {
            tracing::debug!(relay = %self.relay, "QUIT failed: {e}");
        }
    }
}
