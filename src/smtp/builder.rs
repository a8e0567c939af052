/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::{fmt::Display, time::Duration};

use log::debug;
use smtp_proto::{EhloResponse, EXT_START_TLS};
use tokio::net::TcpStream;

use crate::{SmtpClient, SmtpClientBuilder};

use super::{stream::MailStream, tls::build_tls_connector, AssertReply};

/// How the connection is secured, conventionally derived from the port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// TLS from the first byte (port 465).
    ImplicitTls,
    /// Clear text upgraded with STARTTLS (port 587).
    StartTls,
    /// Clear text for the whole session.
    Plain,
}

impl TransportMode {
    pub fn from_port(port: u16) -> Self {
        match port {
            465 => TransportMode::ImplicitTls,
            587 => TransportMode::StartTls,
            _ => TransportMode::Plain,
        }
    }
}

impl Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportMode::ImplicitTls => write!(f, "implicit TLS"),
            TransportMode::StartTls => write!(f, "STARTTLS"),
            TransportMode::Plain => write!(f, "plain text"),
        }
    }
}

impl<T: AsRef<str>> SmtpClientBuilder<T> {
    pub fn new(hostname: T, port: u16) -> Self {
        SmtpClientBuilder {
            addr: format!("{}:{}", hostname.as_ref(), port),
            timeout: Duration::from_secs(60 * 60),
            tls_connector: build_tls_connector(false),
            tls_hostname: hostname,
            local_host: gethostname::gethostname()
                .to_str()
                .unwrap_or("[127.0.0.1]")
                .to_string(),
        }
    }

    /// Allow invalid TLS certificates
    pub fn allow_invalid_certs(mut self) -> Self {
        self.tls_connector = build_tls_connector(true);
        self
    }

    /// Set the EHLO hostname
    pub fn helo_host(mut self, host: impl Into<String>) -> Self {
        self.local_host = host.into();
        self
    }

    /// Sets the SMTP connection timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Connects to the server, secures the connection as requested by `mode`
    /// and returns the client together with the capabilities advertised
    /// in the final EHLO reply.
    pub async fn connect(
        &self,
        mode: TransportMode,
    ) -> crate::Result<(SmtpClient<MailStream>, EhloResponse<String>)> {
        debug!("Connecting to {} ({mode})", self.addr);
        tokio::time::timeout(self.timeout, async {
            let mut client = SmtpClient {
                stream: TcpStream::connect(&self.addr).await?,
                timeout: self.timeout,
            };
            let hostname = self.tls_hostname.as_ref();

            let mut client = match mode {
                TransportMode::ImplicitTls => {
                    let mut client = client.into_tls(&self.tls_connector, hostname).await?;
                    client.read().await?.assert_positive_completion()?;
                    client
                }
                TransportMode::StartTls => {
                    client.read().await?.assert_positive_completion()?;
                    if !client.ehlo(&self.local_host).await?.has_capability(EXT_START_TLS) {
                        return Err(crate::Error::MissingStartTls);
                    }
                    client.start_tls(&self.tls_connector, hostname).await?
                }
                TransportMode::Plain => {
                    client.read().await?.assert_positive_completion()?;
                    SmtpClient {
                        stream: MailStream::from(client.stream),
                        timeout: client.timeout,
                    }
                }
            };

            let capabilities = client.ehlo(&self.local_host).await?;
            Ok((client, capabilities))
        })
        .await
        .map_err(|_| crate::Error::Timeout)?
    }
}
