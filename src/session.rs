/*
 * Copyright Stalwart Labs Ltd. See the COPYING
 * file at the top-level directory of this distribution.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use log::debug;
use smtp_proto::EhloResponse;

use crate::{
    config::ServerConfig,
    recipients::RecipientAddress,
    render::RenderedMessage,
    smtp::{
        auth::Credentials,
        builder::TransportMode,
        message::{Message, Parameters},
        stream::MailStream,
    },
    SmtpClient, SmtpClientBuilder,
};

/// Progress of a [`DispatchSession`]. A closed session is consumed, so it
/// has no state of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Authenticated,
    Sending,
}

/// One SMTP connection used to deliver a whole mailing.
pub struct DispatchSession {
    client: SmtpClient<MailStream>,
    capabilities: EhloResponse<String>,
    mode: TransportMode,
    state: SessionState,
}

/// Result of delivering one message.
#[derive(Debug)]
pub enum DispatchOutcome {
    Sent {
        recipient: RecipientAddress,
    },
    Failed {
        recipient: RecipientAddress,
        error: crate::Error,
    },
}

impl DispatchSession {
    /// Opens a session, securing it as conventionally expected on the
    /// configured port.
    pub async fn connect(config: &ServerConfig) -> crate::Result<Self> {
        Self::connect_with_mode(config, TransportMode::from_port(config.port)).await
    }

    pub async fn connect_with_mode(
        config: &ServerConfig,
        mode: TransportMode,
    ) -> crate::Result<Self> {
        let mut builder =
            SmtpClientBuilder::new(config.host.as_str(), config.port).timeout(config.timeout);
        if let Some(helo_host) = &config.helo_host {
            builder = builder.helo_host(helo_host);
        }
        if config.allow_invalid_certs {
            builder = builder.allow_invalid_certs();
        }

        let (client, capabilities) = builder.connect(mode).await?;
        debug!(
            "Connected to {}:{} ({mode}, TLS {})",
            config.host,
            config.port,
            if client.stream.is_tls() { "on" } else { "off" }
        );

        Ok(DispatchSession {
            client,
            capabilities,
            mode,
            state: SessionState::Connected,
        })
    }

    /// Logs in using the strongest mechanism the server offers.
    pub async fn authenticate(&mut self, username: &str, password: &str) -> crate::Result<()> {
        self.client
            .authenticate(&Credentials::new(username, password), &self.capabilities)
            .await?;
        self.state = SessionState::Authenticated;
        Ok(())
    }

    /// Delivers `message` to `to` in its own mail transaction.
    pub async fn send(
        &mut self,
        message: &RenderedMessage,
        from: &str,
        to: &RecipientAddress,
    ) -> DispatchOutcome {
        self.state = SessionState::Sending;

        let transaction = Message::single(from, to.as_str(), message.as_bytes())
            .sender_parameters(Parameters::negotiated(&self.capabilities));

        match self.client.send(transaction).await {
            Ok(()) => DispatchOutcome::Sent {
                recipient: to.clone(),
            },
            Err(error) => DispatchOutcome::Failed {
                recipient: to.clone(),
                error,
            },
        }
    }

    /// Says goodbye to the server and drops the connection.
    pub async fn close(self) -> crate::Result<()> {
        self.client.quit().await
    }

    pub fn capabilities(&self) -> &EhloResponse<String> {
        &self.capabilities
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_tls(&self) -> bool {
        self.client.stream.is_tls()
    }
}

impl DispatchOutcome {
    pub fn recipient(&self) -> &RecipientAddress {
        match self {
            DispatchOutcome::Sent { recipient } | DispatchOutcome::Failed { recipient, .. } => {
                recipient
            }
        }
    }

    pub fn is_sent(&self) -> bool {
        matches!(self, DispatchOutcome::Sent { .. })
    }
}
