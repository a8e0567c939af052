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

use std::{borrow::Cow, fmt::Display};

use smtp_proto::{EhloResponse, EXT_8BIT_MIME, EXT_SMTP_UTF8};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::SmtpClient;

/// An SMTP transaction: envelope sender, envelope recipients and the
/// already serialized message.
#[derive(Debug, Default)]
pub struct Message<'x> {
    pub mail_from: Address<'x>,
    pub rcpt_to: Vec<Address<'x>>,
    pub body: Cow<'x, [u8]>,
}

/// A mailbox plus the ESMTP parameters sent along with it.
#[derive(Debug, Default)]
pub struct Address<'x> {
    pub email: Cow<'x, str>,
    pub parameters: Parameters<'x>,
}

/// ESMTP parameters, written in insertion order.
#[derive(Debug, Default)]
pub struct Parameters<'x> {
    params: Vec<(Cow<'x, str>, Option<Cow<'x, str>>)>,
}

impl<'x> Message<'x> {
    /// Transaction delivering `body` to a single mailbox.
    pub fn single(
        from: impl Into<Address<'x>>,
        to: impl Into<Address<'x>>,
        body: impl Into<Cow<'x, [u8]>>,
    ) -> Self {
        Message {
            mail_from: from.into(),
            rcpt_to: vec![to.into()],
            body: body.into(),
        }
    }

    /// Replaces the `MAIL FROM` parameters.
    pub fn sender_parameters(mut self, parameters: Parameters<'x>) -> Self {
        self.mail_from.parameters = parameters;
        self
    }
}

impl<'x> From<&'x str> for Address<'x> {
    fn from(email: &'x str) -> Self {
        Address::new(email, Parameters::default())
    }
}

impl<'x> Address<'x> {
    pub fn new(email: impl Into<Cow<'x, str>>, parameters: Parameters<'x>) -> Self {
        Address {
            email: email.into(),
            parameters,
        }
    }
}

impl<'x> Parameters<'x> {
    pub fn new() -> Self {
        Self::default()
    }

    /// `BODY=8BITMIME` and `SMTPUTF8`, each only when the server offers it.
    pub fn negotiated(capabilities: &EhloResponse<String>) -> Self {
        let mut params = Parameters::new();
        if capabilities.has_capability(EXT_8BIT_MIME) {
            params.param("BODY", "8BITMIME");
        }
        if capabilities.has_capability(EXT_SMTP_UTF8) {
            params.keyword("SMTPUTF8");
        }
        params
    }

    pub fn param(&mut self, key: impl Into<Cow<'x, str>>, value: impl Into<Cow<'x, str>>) {
        self.params.push((key.into(), Some(value.into())));
    }

    pub fn keyword(&mut self, key: impl Into<Cow<'x, str>>) {
        self.params.push((key.into(), None));
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl Display for Parameters<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.params.iter().try_for_each(|(key, value)| match value {
            Some(value) => write!(f, " {key}={value}"),
            None => write!(f, " {key}"),
        })
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> SmtpClient<T> {
    /// Runs a complete mail transaction: MAIL FROM, one RCPT TO per
    /// recipient and DATA.
    pub async fn send(&mut self, message: Message<'_>) -> crate::Result<()> {
        let Message {
            mail_from,
            rcpt_to,
            body,
        } = message;
        if rcpt_to.is_empty() {
            return Err(crate::Error::MissingRcptTo);
        }

        self.mail_from(&mail_from.email, &mail_from.parameters).await?;
        for rcpt in &rcpt_to {
            self.rcpt_to(&rcpt.email, &rcpt.parameters).await?;
        }
        self.data(body).await
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use smtp_proto::{EhloResponse, EXT_8BIT_MIME, EXT_SMTP_UTF8};

    use crate::SmtpClient;

    use super::{Message, Parameters};

    #[test]
    fn negotiated_parameters() {
        let mut capabilities = EhloResponse::<String>::default();
        assert!(Parameters::negotiated(&capabilities).is_empty());

        capabilities.capabilities = EXT_SMTP_UTF8;
        assert_eq!(Parameters::negotiated(&capabilities).to_string(), " SMTPUTF8");

        capabilities.capabilities |= EXT_8BIT_MIME;
        assert_eq!(
            Parameters::negotiated(&capabilities).to_string(),
            " BODY=8BITMIME SMTPUTF8"
        );
    }

    #[test]
    fn single_recipient() {
        let mut params = Parameters::new();
        params.keyword("SMTPUTF8");
        let message = Message::single("jdoe@example.com", "jane@example.com", &b"Hi"[..])
            .sender_parameters(params);

        assert_eq!(message.mail_from.email, "jdoe@example.com");
        assert_eq!(message.mail_from.parameters.to_string(), " SMTPUTF8");
        assert_eq!(message.rcpt_to.len(), 1);
        assert!(message.rcpt_to[0].parameters.is_empty());
    }

    #[tokio::test]
    async fn no_recipients() {
        let (client_end, _server_end) = tokio::io::duplex(64);
        let mut client = SmtpClient {
            stream: client_end,
            timeout: Duration::from_secs(1),
        };
        assert!(matches!(
            client.send(Message::default()).await,
            Err(crate::Error::MissingRcptTo)
        ));
    }
}
