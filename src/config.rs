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

//! Session configuration.
//!
//! Settings are read from an INI file with a `[Server]` and a `[Message]`
//! section. Every documented key must be present, although most of them may
//! be left empty to disable the feature they control. Section names are
//! matched exactly, key names ignoring ASCII case.

use std::{
    fmt::Display,
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use ini::{Ini, ParseOption, Properties};

const SERVER: &str = "Server";
const MESSAGE: &str = "Message";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Everything needed to run one mailing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub server: ServerConfig,
    pub message: MessageConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub auth_required: bool,
    pub username: String,
    pub password: String,
    /// Name sent with EHLO, the local host name when unset.
    pub helo_host: Option<String>,
    /// Upper bound for every SMTP exchange.
    pub timeout: Duration,
    pub allow_invalid_certs: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageConfig {
    /// HTML template, read on every render.
    pub template: PathBuf,
    /// Raw `From` header, the username when left empty.
    pub from_header: String,
    pub subject: String,
    pub attachment: Option<PathBuf>,
    /// Newline delimited recipient list.
    pub recipients: PathBuf,
    /// Base URL of the tracking pixel.
    pub tracking_url: Option<String>,
}

#[derive(Debug)]
pub enum Error {
    /// The configuration file could not be read.
    Read { path: PathBuf, source: io::Error },

    /// The configuration file is not valid INI.
    Parse { path: PathBuf, source: ini::ParseError },

    /// A required section is absent.
    MissingSection(&'static str),

    /// A required key is absent.
    MissingKey {
        section: &'static str,
        key: &'static str,
    },

    /// A key holds a value of the wrong type.
    InvalidValue {
        section: &'static str,
        key: &'static str,
        value: String,
    },
}

impl SessionConfig {
    /// Reads and validates the configuration file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_with_path(&contents, path)
    }

    /// Validates configuration text held in memory.
    pub fn parse(contents: &str) -> Result<Self, Error> {
        Self::parse_with_path(contents, Path::new("<memory>"))
    }

    fn parse_with_path(contents: &str, path: &Path) -> Result<Self, Error> {
        // Passwords and headers are taken literally.
        let ini = Ini::load_from_str_opt(
            contents,
            ParseOption {
                enabled_quote: false,
                enabled_escape: false,
                ..Default::default()
            },
        )
        .map_err(|source| Error::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let server = Section::find(&ini, SERVER)?;
        let message = Section::find(&ini, MESSAGE)?;

        let username = server.string("username")?;
        let server = ServerConfig {
            host: server.string("server")?,
            port: server.parse("port")?,
            auth_required: server.boolean("auth_required")?,
            password: server.string("password")?,
            helo_host: server.optional("helo_host"),
            timeout: match server.optional("timeout") {
                Some(value) => match value.parse::<u64>() {
                    Ok(secs) if secs > 0 => Duration::from_secs(secs),
                    _ => return Err(server.invalid("timeout", value)),
                },
                None => DEFAULT_TIMEOUT,
            },
            allow_invalid_certs: match server.optional("allow_invalid_certs") {
                Some(value) => {
                    parse_bool(&value).ok_or_else(|| server.invalid("allow_invalid_certs", value))?
                }
                None => false,
            },
            username,
        };

        let from_header = message.string("from_header")?;
        let message = MessageConfig {
            template: message.string("message")?.into(),
            from_header: if from_header.is_empty() {
                server.username.clone()
            } else {
                from_header
            },
            subject: message.string("subject")?,
            attachment: non_empty(message.string("attachment")?).map(PathBuf::from),
            recipients: message.string("emails")?.into(),
            tracking_url: non_empty(message.string("tracking_handler")?),
        };

        Ok(SessionConfig { server, message })
    }

    /// Reverse path used for `MAIL FROM`: the login name, or the address
    /// found in the `From` header when logging in anonymously.
    pub fn envelope_sender(&self) -> &str {
        if !self.server.username.is_empty() {
            return &self.server.username;
        }

        let from = self.message.from_header.trim();
        match (from.rfind('<'), from.rfind('>')) {
            (Some(start), Some(end)) if start < end => from[start + 1..end].trim(),
            _ => from,
        }
    }
}

struct Section<'x> {
    name: &'static str,
    properties: &'x Properties,
}

impl<'x> Section<'x> {
    fn find(ini: &'x Ini, name: &'static str) -> Result<Self, Error> {
        ini.section(Some(name))
            .map(|properties| Section { name, properties })
            .ok_or(Error::MissingSection(name))
    }

    fn get(&self, key: &str) -> Option<&'x str> {
        self.properties
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value)
    }

    fn string(&self, key: &'static str) -> Result<String, Error> {
        self.get(key)
            .map(|value| value.trim().to_string())
            .ok_or(Error::MissingKey {
                section: self.name,
                key,
            })
    }

    fn optional(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|value| non_empty(value.trim().to_string()))
    }

    fn parse<T: std::str::FromStr>(&self, key: &'static str) -> Result<T, Error> {
        let value = self.string(key)?;
        value.parse().map_err(|_| self.invalid(key, value))
    }

    fn boolean(&self, key: &'static str) -> Result<bool, Error> {
        let value = self.string(key)?;
        parse_bool(&value).ok_or_else(|| self.invalid(key, value))
    }

    fn invalid(&self, key: &'static str, value: String) -> Error {
        Error::InvalidValue {
            section: self.name,
            key,
            value,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Some(true),
        "0" | "no" | "false" | "off" => Some(false),
        _ => None,
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Read { path, source } => write!(
                f,
                "Non-existent path to config file {}: {source}",
                path.display()
            ),
            Error::Parse { path, source } => {
                write!(f, "In config file {}: {source}", path.display())
            }
            Error::MissingSection(section) => {
                write!(f, "In config file: No section: '{section}'")
            }
            Error::MissingKey { section, key } => {
                write!(f, "In config file: No option '{key}' in section: '{section}'")
            }
            Error::InvalidValue {
                section,
                key,
                value,
            } => write!(
                f,
                "In config file: Invalid value '{value}' for option '{key}' in section: '{section}'"
            ),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Read { source, .. } => Some(source),
            Error::Parse { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use std::{io::Write, path::PathBuf, time::Duration};

    use super::{Error, SessionConfig};

    const FULL: &str = concat!(
        "[Server]\n",
        "server = smtp.example.com\n",
        "port = 587\n",
        "auth_required = yes\n",
        "username = john@example.com\n",
        "password = p4ss;w0rd\"x\n",
        "\n",
        "[Message]\n",
        "message = template.html\n",
        "from_header = Иван Петров <john@example.com>\n",
        "subject = Hello!\n",
        "attachment = files/report.pdf\n",
        "emails = recipients.txt\n",
        "tracking_handler = https://t.example.com/open\n",
    );

    #[test]
    fn parse_full() {
        let config = SessionConfig::parse(FULL).unwrap();

        assert_eq!(config.server.host, "smtp.example.com");
        assert_eq!(config.server.port, 587);
        assert!(config.server.auth_required);
        assert_eq!(config.server.username, "john@example.com");
        assert_eq!(config.server.password, "p4ss;w0rd\"x");
        assert_eq!(config.server.helo_host, None);
        assert_eq!(config.server.timeout, Duration::from_secs(3600));
        assert!(!config.server.allow_invalid_certs);

        assert_eq!(config.message.template, PathBuf::from("template.html"));
        assert_eq!(config.message.from_header, "Иван Петров <john@example.com>");
        assert_eq!(config.message.subject, "Hello!");
        assert_eq!(
            config.message.attachment,
            Some(PathBuf::from("files/report.pdf"))
        );
        assert_eq!(config.message.recipients, PathBuf::from("recipients.txt"));
        assert_eq!(
            config.message.tracking_url.as_deref(),
            Some("https://t.example.com/open")
        );
    }

    #[test]
    fn empty_values_disable_features() {
        let config = SessionConfig::parse(concat!(
            "[Server]\n",
            "server = localhost\n",
            "port = 25\n",
            "auth_required = off\n",
            "username = jane@example.com\n",
            "password =\n",
            "helo_host = mailer.example.com\n",
            "timeout = 30\n",
            "allow_invalid_certs = TRUE\n",
            "[Message]\n",
            "message = t.html\n",
            "from_header =\n",
            "subject =\n",
            "attachment =\n",
            "emails = list.txt\n",
            "tracking_handler =\n",
        ))
        .unwrap();

        assert!(!config.server.auth_required);
        assert_eq!(config.server.helo_host.as_deref(), Some("mailer.example.com"));
        assert_eq!(config.server.timeout, Duration::from_secs(30));
        assert!(config.server.allow_invalid_certs);
        assert_eq!(config.message.from_header, "jane@example.com");
        assert_eq!(config.message.attachment, None);
        assert_eq!(config.message.tracking_url, None);
    }

    #[test]
    fn keys_ignore_case() {
        let config = SessionConfig::parse(&FULL.replace("auth_required", "Auth_Required")).unwrap();
        assert!(config.server.auth_required);
    }

    #[test]
    fn missing_and_invalid() {
        match SessionConfig::parse(&FULL.replace("emails = recipients.txt\n", "")) {
            Err(err @ Error::MissingKey { .. }) => assert_eq!(
                err.to_string(),
                "In config file: No option 'emails' in section: 'Message'"
            ),
            other => panic!("unexpected result {other:?}"),
        }

        assert!(matches!(
            SessionConfig::parse("[Server]\nserver = x\n"),
            Err(Error::MissingSection("Message"))
        ));
        assert!(matches!(
            SessionConfig::parse(&FULL.replace("port = 587", "port = smtp")),
            Err(Error::InvalidValue { key: "port", .. })
        ));
        assert!(matches!(
            SessionConfig::parse(&FULL.replace("port = 587", "port = 70000")),
            Err(Error::InvalidValue { key: "port", .. })
        ));
        assert!(matches!(
            SessionConfig::parse(&FULL.replace("auth_required = yes", "auth_required = maybe")),
            Err(Error::InvalidValue {
                key: "auth_required",
                ..
            })
        ));
        assert!(matches!(
            SessionConfig::parse(&FULL.replace("port = 587\n", "port = 587\ntimeout = 0\n")),
            Err(Error::InvalidValue { key: "timeout", .. })
        ));
    }

    #[test]
    fn envelope_sender() {
        let mut config = SessionConfig::parse(FULL).unwrap();
        assert_eq!(config.envelope_sender(), "john@example.com");

        config.server.username.clear();
        config.message.from_header = "Sales <sales@example.com>".to_string();
        assert_eq!(config.envelope_sender(), "sales@example.com");

        config.message.from_header = " sales@example.com ".to_string();
        assert_eq!(config.envelope_sender(), "sales@example.com");
    }

    #[test]
    fn load_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();
        assert_eq!(
            SessionConfig::load(file.path()).unwrap(),
            SessionConfig::parse(FULL).unwrap()
        );

        assert!(matches!(
            SessionConfig::load(file.path().with_extension("missing")),
            Err(Error::Read { .. })
        ));
    }
}
