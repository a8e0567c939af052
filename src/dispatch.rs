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

//! Mailing orchestration.
//!
//! [`Dispatcher::run`] loads the recipients, opens one SMTP session and
//! delivers one rendered message per recipient, in list order. The first
//! delivery failure stops the run; a failed login does not.

use std::fmt::Display;

use log::{info, warn};

use crate::{
    config::{self, SessionConfig},
    recipients::{self, RecipientAddress, RecipientList},
    render::{self, MessageBuilder},
    session::{DispatchOutcome, DispatchSession},
};

pub struct Dispatcher {
    config: SessionConfig,
    verbosity: u8,
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: Vec<Delivery>,
    pub auth: AuthStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// One-based index in the recipient list.
    pub position: usize,
    pub total: usize,
    pub recipient: RecipientAddress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    NotRequired,
    Succeeded,
    /// Login was rejected and messages were sent without it.
    Failed,
}

#[derive(Debug)]
pub enum Error {
    Config(config::Error),
    Recipients(recipients::Error),
    Render(render::Error),
    Connect(crate::Error),
    Send {
        recipient: RecipientAddress,
        position: usize,
        total: usize,
        source: crate::Error,
    },
}

impl Dispatcher {
    pub fn new(config: SessionConfig) -> Self {
        Dispatcher {
            config,
            verbosity: 0,
        }
    }

    /// Builds a dispatcher from the configuration file at `path`.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
        Ok(Dispatcher::new(SessionConfig::load(path)?))
    }

    /// Prints the first rendered message when at least 1.
    pub fn verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Runs the whole mailing.
    pub async fn run(&self) -> Result<DispatchReport, Error> {
        let recipients = RecipientList::load(&self.config.message.recipients)?;
        let builder = MessageBuilder::from(&self.config.message);
        let server = &self.config.server;

        let mut session = DispatchSession::connect(server)
            .await
            .map_err(Error::Connect)?;

        info!(
            "Here is your configuration:\nServer: {}\nPort: {}\nUsername: {}\n",
            server.host, server.port, server.username
        );

        let auth = if server.auth_required {
            match session
                .authenticate(&server.username, &server.password)
                .await
            {
                Ok(()) => {
                    info!("Logged to mail server");
                    AuthStatus::Succeeded
                }
                Err(err) => {
                    warn!("Can't login to mail server: {err}");
                    AuthStatus::Failed
                }
            }
        } else {
            AuthStatus::NotRequired
        };

        let result = self.deliver_all(&mut session, &builder, &recipients).await;

        if let Err(err) = session.close().await {
            warn!("Failed to close the SMTP session: {err}");
        }

        let delivered = result?;
        info!("Success.");

        Ok(DispatchReport { delivered, auth })
    }

    async fn deliver_all(
        &self,
        session: &mut DispatchSession,
        builder: &MessageBuilder,
        recipients: &RecipientList,
    ) -> Result<Vec<Delivery>, Error> {
        let total = recipients.len();
        let from = self.config.envelope_sender();
        let mut delivered = Vec::with_capacity(total);

        info!("Count of E-Mails: {total}");

        for (position, recipient) in recipients.iter().enumerate().map(|(i, r)| (i + 1, r)) {
            info!("Sending message to: {recipient} [ {position} / {total} ]");

            let message = builder.render(recipient)?;
            if self.verbosity > 0 && position == 1 {
                info!("The first created message body:\n{message}");
            }

            match session.send(&message, from, recipient).await {
                DispatchOutcome::Sent { recipient } => delivered.push(Delivery {
                    position,
                    total,
                    recipient,
                }),
                DispatchOutcome::Failed { recipient, error } => {
                    return Err(Error::Send {
                        recipient,
                        position,
                        total,
                        source: error,
                    });
                }
            }
        }

        Ok(delivered)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Config(err) => err.fmt(f),
            Error::Recipients(err) => err.fmt(f),
            Error::Render(err) => err.fmt(f),
            Error::Connect(err) => write!(f, "Can't connect to mail server: {err}"),
            Error::Send {
                recipient,
                position,
                total,
                source,
            } => write!(
                f,
                "Can't send message to {recipient} [ {position} / {total} ]: {source}"
            ),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config(err) => Some(err),
            Error::Recipients(err) => Some(err),
            Error::Render(err) => Some(err),
            Error::Connect(err) | Error::Send { source: err, .. } => Some(err),
        }
    }
}

impl From<config::Error> for Error {
    fn from(err: config::Error) -> Self {
        Error::Config(err)
    }
}

impl From<recipients::Error> for Error {
    fn from(err: recipients::Error) -> Self {
        Error::Recipients(err)
    }
}

impl From<render::Error> for Error {
    fn from(err: render::Error) -> Self {
        Error::Render(err)
    }
}
