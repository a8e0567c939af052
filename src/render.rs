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

//! Per recipient MIME rendering.
//!
//! A [`MessageBuilder`] holds the parts shared by every message of a mailing
//! and produces one [`RenderedMessage`] per recipient. Template and attachment
//! are read from disk on every call, so edits made while a mailing runs are
//! picked up by the next message.
//!
//! Output is deterministic: headers are written in a fixed order, no `Date`
//! or `Message-ID` is generated and the multipart boundary is derived from
//! the content itself.

use std::{
    fmt::Display,
    io::{self, Write},
    path::{Path, PathBuf},
};

use base64::{engine::general_purpose, Engine};
use mail_builder::{
    encoders::base64::base64_encode_mime,
    headers::{content_type::ContentType, raw::Raw, Header},
    mime::{BodyPart, MimePart},
};

use crate::{config::MessageConfig, recipients::RecipientAddress};

/// Longest header line written before folding.
const MAX_LINE: usize = 76;
/// `=?utf-8?b?` plus `?=`.
const WORD_OVERHEAD: usize = 12;

#[derive(Debug, Clone)]
pub struct MessageBuilder {
    template: PathBuf,
    subject: String,
    from_header: String,
    attachment: Option<PathBuf>,
    tracking_url: Option<String>,
}

/// A serialized MIME document addressed to a single recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    recipient: RecipientAddress,
    document: String,
}

#[derive(Debug)]
pub enum Error {
    /// The HTML template is missing or not valid UTF-8.
    Template { path: PathBuf, source: io::Error },

    /// The attachment could not be read.
    Attachment { path: PathBuf, source: io::Error },

    /// The MIME serializer failed.
    Write(io::Error),
}

/// Value of a `From`, `To` or `Subject` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderValue<'x> {
    /// Plain ASCII, written as is.
    Ascii(&'x str),
    /// Base64 encoded words.
    Encoded(&'x str),
    /// Encoded display name followed by the `<address>` part as is.
    Mailbox { name: &'x str, address: &'x str },
}

impl MessageBuilder {
    pub fn new(
        template: impl Into<PathBuf>,
        subject: impl Into<String>,
        from_header: impl Into<String>,
    ) -> Self {
        MessageBuilder {
            template: template.into(),
            subject: subject.into(),
            from_header: from_header.into(),
            attachment: None,
            tracking_url: None,
        }
    }

    /// Attach the file at `path` to every message.
    pub fn attachment(mut self, path: impl Into<PathBuf>) -> Self {
        self.attachment = Some(path.into());
        self
    }

    /// Embed a tracking pixel pointing at `url`.
    pub fn tracking_url(mut self, url: impl Into<String>) -> Self {
        self.tracking_url = Some(url.into());
        self
    }

    /// Renders the message sent to `recipient`.
    pub fn render(&self, recipient: &RecipientAddress) -> Result<RenderedMessage, Error> {
        let mut html =
            std::fs::read_to_string(&self.template).map_err(|source| Error::Template {
                path: self.template.clone(),
                source,
            })?;
        if let Some(url) = &self.tracking_url {
            inject_tracking_pixel(&mut html, &tracking_pixel(url, recipient.as_str()));
        }

        let body = match &self.attachment {
            None => html_part(&html)?,
            Some(path) => {
                let contents = std::fs::read(path).map_err(|source| Error::Attachment {
                    path: path.clone(),
                    source,
                })?;
                let filename = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();

                MimePart::new(
                    ContentType::new("multipart/mixed").attribute(
                        "boundary",
                        boundary(recipient.as_str(), html.as_bytes(), &contents),
                    ),
                    BodyPart::Multipart(vec![
                        html_part(&html)?,
                        MimePart::new(
                            ContentType::new("application/octet-stream")
                                .attribute("name", filename.clone()),
                            BodyPart::Binary(contents.into()),
                        )
                        .attachment(filename),
                    ]),
                )
            }
        };

        let mut document = Vec::with_capacity(html.len() * 4 / 3 + 512);
        for (name, value) in [
            ("From", from_header(&self.from_header)),
            ("To", ascii_safe(recipient.as_str())),
            ("Subject", HeaderValue::Encoded(&self.subject)),
        ] {
            document.write_all(name.as_bytes()).map_err(Error::Write)?;
            document.write_all(b": ").map_err(Error::Write)?;
            value
                .write_header(&mut document, name.len() + 2)
                .map_err(Error::Write)?;
        }
        document
            .write_all(b"MIME-Version: 1.0\r\n")
            .map_err(Error::Write)?;
        body.write_part(&mut document).map_err(Error::Write)?;

        Ok(RenderedMessage {
            recipient: recipient.clone(),
            document: String::from_utf8(document)
                .map_err(|err| Error::Write(io::Error::other(err)))?,
        })
    }
}

/// HTML part, base64 encoded up front so every template line length is safe.
fn html_part(html: &str) -> Result<MimePart<'static>, Error> {
    let mut encoded = Vec::with_capacity(html.len() * 4 / 3 + html.len() / 38 + 4);
    base64_encode_mime(html.as_bytes(), &mut encoded, false).map_err(Error::Write)?;
    let encoded = String::from_utf8(encoded).map_err(|err| Error::Write(io::Error::other(err)))?;

    Ok(MimePart::new(
        ContentType::new("text/html").attribute("charset", "utf-8"),
        BodyPart::Text(encoded.into()),
    )
    .transfer_encoding("base64"))
}

impl From<&MessageConfig> for MessageBuilder {
    fn from(config: &MessageConfig) -> Self {
        let mut builder = MessageBuilder::new(
            &config.template,
            &config.subject,
            &config.from_header,
        );
        if let Some(path) = &config.attachment {
            builder = builder.attachment(path);
        }
        if let Some(url) = &config.tracking_url {
            builder = builder.tracking_url(url);
        }
        builder
    }
}

impl RenderedMessage {
    pub fn recipient(&self) -> &RecipientAddress {
        &self.recipient
    }

    pub fn as_str(&self) -> &str {
        &self.document
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.document.as_bytes()
    }

    pub fn into_string(self) -> String {
        self.document
    }
}

impl Display for RenderedMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.document)
    }
}

pub(crate) fn has_cyrillic(text: &str) -> bool {
    text.chars()
        .any(|ch| matches!(ch, 'а'..='я' | 'А'..='Я' | 'ё' | 'Ё'))
}

/// Cyrillic senders get their display name encoded while the `<address>`
/// part stays readable, anything else goes through the ASCII-safe encoding.
fn from_header(header: &str) -> HeaderValue<'_> {
    if !has_cyrillic(header) {
        return ascii_safe(header);
    }

    match header.find('<') {
        Some(pos) => {
            let name = header[..pos].trim();
            let address = &header[pos..];
            if name.is_empty() {
                ascii_safe(address)
            } else {
                HeaderValue::Mailbox { name, address }
            }
        }
        None => HeaderValue::Encoded(header.trim()),
    }
}

fn ascii_safe(text: &str) -> HeaderValue<'_> {
    if text.is_ascii() {
        HeaderValue::Ascii(text)
    } else {
        HeaderValue::Encoded(text)
    }
}

impl Header for HeaderValue<'_> {
    fn write_header(&self, mut output: impl Write, bytes_written: usize) -> io::Result<usize> {
        match self {
            HeaderValue::Ascii(text) => Raw::new(*text).write_header(output, bytes_written),
            HeaderValue::Encoded(text) => {
                write_words(text, &mut output, bytes_written)?;
                output.write_all(b"\r\n")?;
                Ok(0)
            }
            HeaderValue::Mailbox { name, address } => {
                let bytes_written = write_words(name, &mut output, bytes_written)?;
                if bytes_written + 1 + address.len() > MAX_LINE {
                    output.write_all(b"\r\n ")?;
                } else {
                    output.write_all(b" ")?;
                }
                output.write_all(address.as_bytes())?;
                output.write_all(b"\r\n")?;
                Ok(0)
            }
        }
    }
}

/// Writes `text` as `=?utf-8?b?...?=` words split on character boundaries,
/// folding before a word that would overflow the line. Returns the length of
/// the last line.
fn write_words(text: &str, mut output: impl Write, mut bytes_written: usize) -> io::Result<usize> {
    let mut start = 0;
    for (pos, ch) in text.char_indices() {
        let end = pos + ch.len_utf8();
        if pos > start && bytes_written + WORD_OVERHEAD + (end - start).div_ceil(3) * 4 > MAX_LINE
        {
            write_word(&text[start..pos], &mut output)?;
            output.write_all(b"\r\n ")?;
            bytes_written = 1;
            start = pos;
        }
    }
    if start < text.len() {
        bytes_written += write_word(&text[start..], &mut output)?;
    }
    Ok(bytes_written)
}

fn write_word(chunk: &str, mut output: impl Write) -> io::Result<usize> {
    output.write_all(b"=?utf-8?b?")?;
    let encoded = base64_encode_mime(chunk.as_bytes(), &mut output, true)?;
    output.write_all(b"?=")?;
    Ok(WORD_OVERHEAD + encoded)
}

pub(crate) fn tracking_pixel(url: &str, recipient: &str) -> String {
    format!(
        "<img alt=\"\" src=\"{url}?u={}\" width=\"1\" height=\"1\" border=\"0\" />",
        general_purpose::STANDARD.encode(recipient)
    )
}

pub(crate) fn inject_tracking_pixel(html: &mut String, pixel: &str) {
    match html.find("</body>") {
        Some(pos) => html.insert_str(pos, pixel),
        None => html.push_str(pixel),
    }
}

/// Base64 never contains `-`, so a hex digest cannot collide with the body.
fn boundary(recipient: &str, html: &[u8], attachment: &[u8]) -> String {
    let mut context = md5::Context::new();
    context.consume(recipient.as_bytes());
    context.consume(html);
    context.consume(attachment);
    format!("{:x}", context.compute())
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Template { path, source } => {
                write!(f, "Can't read message template {}: {source}", path.display())
            }
            Error::Attachment { path, source } => {
                write!(f, "Can't read attachment {}: {source}", path.display())
            }
            Error::Write(err) => write!(f, "Can't serialize message: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Template { source, .. } | Error::Attachment { source, .. } => Some(source),
            Error::Write(err) => Some(err),
        }
    }
}

impl Error {
    /// File that could not be read, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Error::Template { path, .. } | Error::Attachment { path, .. } => Some(path),
            Error::Write(_) => None,
        }
    }
}
