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

//! # mail-hammer
//!
//! _mail-hammer_ delivers one message per recipient of a mailing list over a single
//! SMTP session. It includes the following features:
//!
//! - Loads a newline-delimited recipient list, skipping lines that do not look like
//!   an e-mail address.
//! - Renders an HTML template into a **MIME** message (_RFC 2045 - 2049_) for each
//!   recipient, with _RFC 2047_ encoded headers and an optional binary attachment.
//! - Optionally injects a per-recipient tracking pixel into the HTML body.
//! - Simple Mail Transfer Protocol (**SMTP**; _RFC 5321_) delivery over plain text,
//!   implicit TLS or STARTTLS (_RFC 3207_), chosen from the server port.
//! - SMTP Service Extension for Authentication (_RFC 4954_) with automatic mechanism
//!   negotiation (from most secure to least secure):
//!   - CRAM-MD5 (_RFC 2195_)
//!   - LOGIN
//!   - PLAIN
//! - `8BITMIME` and `SMTPUTF8` envelope parameters whenever the server advertises them.
//!
//! ## Usage Example
//!
//! Deliver a mailing using a configuration file:
//!
//! ```rust
//!     let config = SessionConfig::load("mailing.ini")?;
//!
//!     let report = Dispatcher::new(config)
//!         .verbosity(1)
//!         .run()
//!         .await?;
//!
//!     println!("Delivered {} messages", report.delivered.len());
//! ```
//!
//! The configuration file has two sections:
//!
//! ```ini
//! [Server]
//! server = smtp.example.com
//! port = 587
//! auth_required = yes
//! username = john@example.com
//! password = p4ssw0rd
//!
//! [Message]
//! message = template.html
//! from_header = John Doe <john@example.com>
//! subject = Hello!
//! attachment =
//! emails = recipients.txt
//! tracking_handler =
//! ```
//!
//! The lower level SMTP client is also available on its own:
//!
//! ```rust
//!     let (mut client, capabilities) = SmtpClientBuilder::new("smtp.gmail.com", 587)
//!         .connect(TransportMode::StartTls)
//!         .await?;
//!
//!     client
//!         .authenticate(&Credentials::new("john", "p4ssw0rd"), &capabilities)
//!         .await?;
//!     client.send(message).await?;
//!     client.quit().await?;
//! ```
//!
//! ## License
//!
//! Licensed under either of
//!
//!  * Apache License, Version 2.0 ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
//!  * MIT license ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)
//!
//! at your option.
//!

pub mod config;
pub mod dispatch;
pub mod recipients;
pub mod render;
pub mod session;
pub mod smtp;

use std::{fmt::Display, time::Duration};

use smtp_proto::Response;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector;

pub use config::SessionConfig;
pub use dispatch::{DispatchReport, Dispatcher};
pub use smtp::{auth::Credentials, builder::TransportMode, message::Message};

#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// TLS error
    Tls(Box<rustls::Error>),

    /// Base64 decode error
    Base64(base64::DecodeError),

    /// SMTP authentication error.
    Auth(smtp::auth::Error),

    /// Failure parsing SMTP reply
    UnparseableReply,

    /// Unexpected SMTP reply.
    UnexpectedReply(Response<String>),

    /// SMTP authentication failure.
    AuthenticationFailed(Response<String>),

    /// Invalid TLS name provided.
    InvalidTLSName,

    /// Missing message recipients.
    MissingRcptTo,

    /// The server does no support any of the available authentication methods.
    UnsupportedAuthMechanism,

    /// Connection timeout.
    Timeout,

    /// STARTTLS not available
    MissingStartTls,
}

pub type Result<T> = std::result::Result<T, Error>;

/// SMTP client connection.
pub struct SmtpClient<T: AsyncRead + AsyncWrite> {
    pub stream: T,
    pub timeout: Duration,
}

/// Settings used to open an [`SmtpClient`] connection.
#[derive(Clone)]
pub struct SmtpClientBuilder<T: AsRef<str>> {
    pub addr: String,
    pub timeout: Duration,
    pub tls_connector: TlsConnector,
    pub tls_hostname: T,
    pub local_host: String,
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Tls(err) => Some(err.as_ref()),
            Error::Base64(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Tls(e) => write!(f, "TLS error: {e}"),
            Error::Base64(e) => write!(f, "Base64 decode error: {e}"),
            Error::Auth(e) => write!(f, "SMTP authentication error: {e}"),
            Error::UnparseableReply => write!(f, "Unparseable SMTP reply"),
            Error::UnexpectedReply(e) => {
                write!(f, "Unexpected reply: {} {}", e.code(), e.message())
            }
            Error::AuthenticationFailed(e) => {
                write!(f, "Authentication failed: {} {}", e.code(), e.message())
            }
            Error::InvalidTLSName => write!(f, "Invalid TLS name provided"),
            Error::MissingRcptTo => write!(f, "Missing message recipients"),
            Error::UnsupportedAuthMechanism => write!(
                f,
                "The server does no support any of the available authentication methods"
            ),
            Error::Timeout => write!(f, "Connection timeout"),
            Error::MissingStartTls => write!(f, "STARTTLS extension unavailable"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::Base64(err)
    }
}

impl From<smtp::auth::Error> for Error {
    fn from(err: smtp::auth::Error) -> Self {
        Error::Auth(err)
    }
}
