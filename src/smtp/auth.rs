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

use std::fmt::Display;

use base64::{engine::general_purpose::STANDARD, Engine};
use smtp_proto::{EhloResponse, AUTH_CRAM_MD5, AUTH_LOGIN, AUTH_PLAIN};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::SmtpClient;

/// Mechanisms tried in order, from most secure to least secure.
const PREFERENCE: [u64; 3] = [AUTH_CRAM_MD5, AUTH_LOGIN, AUTH_PLAIN];

/// Username and password used for SASL authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    InvalidChallenge,
}

impl<T: AsyncRead + AsyncWrite + Unpin> SmtpClient<T> {
    /// Authenticates with the server, trying every mechanism both sides
    /// support until one succeeds or the server rejects the credentials.
    pub async fn authenticate(
        &mut self,
        credentials: &Credentials,
        capabilities: &EhloResponse<String>,
    ) -> crate::Result<&mut Self> {
        let available = capabilities.auth_mechanisms;
        let mut last_err = None;

        for mechanism in PREFERENCE.into_iter().filter(|m| available & m != 0) {
            match self.auth(mechanism, credentials).await {
                Ok(_) => return Ok(self),
                Err(crate::Error::UnexpectedReply(reply)) => {
                    // 535: credentials are wrong, other mechanisms will not help
                    let rejected = reply.code() == 535;
                    last_err = Some(reply);
                    if rejected {
                        break;
                    }
                }
                Err(crate::Error::UnsupportedAuthMechanism) => (),
                Err(err) => return Err(err),
            }
        }

        match last_err {
            Some(reply) => Err(crate::Error::AuthenticationFailed(reply)),
            None => Err(crate::Error::UnsupportedAuthMechanism),
        }
    }

    pub(crate) async fn auth(
        &mut self,
        mechanism: u64,
        credentials: &Credentials,
    ) -> crate::Result<()> {
        let name = mechanism_name(mechanism).ok_or(crate::Error::UnsupportedAuthMechanism)?;
        let mut reply = if mechanism == AUTH_PLAIN {
            self.cmd_sensitive(
                format!("AUTH {} {}\r\n", name, credentials.encode(mechanism, "")?),
                &format!("AUTH {name} <credentials>"),
            )
            .await?
        } else {
            self.cmd(format!("AUTH {name}\r\n")).await?
        };

        for _ in 0..3 {
            match reply.code() {
                334 => {
                    reply = self
                        .cmd_sensitive(
                            format!("{}\r\n", credentials.encode(mechanism, reply.message())?),
                            "<credentials>",
                        )
                        .await?;
                }
                235 => {
                    return Ok(());
                }
                _ => {
                    return Err(crate::Error::UnexpectedReply(reply));
                }
            }
        }

        Err(crate::Error::UnexpectedReply(reply))
    }
}

fn mechanism_name(mechanism: u64) -> Option<&'static str> {
    match mechanism {
        AUTH_PLAIN => Some("PLAIN"),
        AUTH_LOGIN => Some("LOGIN"),
        AUTH_CRAM_MD5 => Some("CRAM-MD5"),
        _ => None,
    }
}

impl Credentials {
    /// Creates a new `Credentials` instance.
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Credentials {
        Credentials {
            username: username.into(),
            secret: secret.into(),
        }
    }

    pub fn encode(&self, mechanism: u64, challenge: &str) -> crate::Result<String> {
        let Credentials { username, secret } = self;
        Ok(STANDARD.encode(
            match mechanism {
                AUTH_PLAIN => {
                    format!("\u{0}{username}\u{0}{secret}")
                }

                AUTH_LOGIN => {
                    let challenge = STANDARD.decode(challenge)?;

                    let value = if challenge
                        .get(0..9)
                        .map_or(false, |c| b"user name".eq_ignore_ascii_case(c))
                        || challenge
                            .get(0..8)
                            .map_or(false, |c| b"username".eq_ignore_ascii_case(c))
                    {
                        username
                    } else if challenge
                        .get(0..8)
                        .map_or(false, |c| b"password".eq_ignore_ascii_case(c))
                    {
                        secret
                    } else {
                        return Err(Error::InvalidChallenge.into());
                    };
                    value.to_string()
                }

                AUTH_CRAM_MD5 => {
                    let mut secret_opad: Vec<u8> = vec![0x5c; 64];
                    let mut secret_ipad: Vec<u8> = vec![0x36; 64];

                    if secret.len() < 64 {
                        for (pos, byte) in secret.as_bytes().iter().enumerate() {
                            secret_opad[pos] = *byte ^ 0x5c;
                            secret_ipad[pos] = *byte ^ 0x36;
                        }
                    } else {
                        for (pos, byte) in md5::compute(secret.as_bytes()).iter().enumerate() {
                            secret_opad[pos] = *byte ^ 0x5c;
                            secret_ipad[pos] = *byte ^ 0x36;
                        }
                    }

                    secret_ipad.extend_from_slice(&STANDARD.decode(challenge)?);
                    secret_opad.extend_from_slice(&md5::compute(&secret_ipad).0);

                    format!("{} {:x}", username, md5::compute(&secret_opad))
                }

                _ => return Err(crate::Error::UnsupportedAuthMechanism),
            }
            .as_bytes(),
        ))
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidChallenge => write!(f, "Invalid challenge received."),
        }
    }
}

impl std::error::Error for Error {}
