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

//! Recipient list loading.
//!
//! The list is a plain text file with one address per line. Lines are kept
//! exactly as written (only the line terminator is removed) and must start
//! with the shape `local@domain.tld`; anything else is skipped with a warning.

use std::{
    fmt::Display,
    fs::File,
    io::{self, BufRead, BufReader},
    path::{Path, PathBuf},
};

use lazy_static::lazy_static;
use log::warn;
use regex::Regex;

lazy_static! {
    static ref ADDRESS_SHAPE: Regex = Regex::new(r"^[^@]+@[^@]+\.[^@]+").unwrap();
}

#[derive(Debug)]
pub enum Error {
    /// The list could not be opened or read.
    Read { path: PathBuf, source: io::Error },

    /// No line of the list holds a valid address.
    Empty { path: PathBuf, rejected: usize },
}

/// An address that passed the shape check.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecipientAddress(String);

/// Validated, non-empty recipients in file order. Duplicates are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientList {
    addresses: Vec<RecipientAddress>,
}

impl RecipientAddress {
    /// Returns `None` unless `line` is one or more non-`@` characters, `@`,
    /// one or more non-`@` characters, `.`, one or more non-`@` characters.
    pub fn parse(line: &str) -> Option<Self> {
        ADDRESS_SHAPE
            .is_match(line)
            .then(|| RecipientAddress(line.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl RecipientList {
    /// Loads and validates the list stored at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(BufReader::new(file), path)
    }

    /// Validates the lines produced by `reader`; `path` only labels errors.
    pub fn from_reader(reader: impl BufRead, path: impl AsRef<Path>) -> Result<Self, Error> {
        let mut addresses = Vec::new();
        let mut rejected = 0;

        for line in reader.lines() {
            let line = line.map_err(|source| Error::Read {
                path: path.as_ref().to_path_buf(),
                source,
            })?;

            match RecipientAddress::parse(&line) {
                Some(address) => addresses.push(address),
                None => {
                    warn!("Non-correct E-Mail: {line}");
                    rejected += 1;
                }
            }
        }

        if addresses.is_empty() {
            return Err(Error::Empty {
                path: path.as_ref().to_path_buf(),
                rejected,
            });
        }

        Ok(RecipientList { addresses })
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// Always `false`, construction rejects empty lists.
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RecipientAddress> {
        self.addresses.iter()
    }
}

impl<'x> IntoIterator for &'x RecipientList {
    type Item = &'x RecipientAddress;
    type IntoIter = std::slice::Iter<'x, RecipientAddress>;

    fn into_iter(self) -> Self::IntoIter {
        self.addresses.iter()
    }
}

impl AsRef<str> for RecipientAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for RecipientAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Read { path, source } => write!(
                f,
                "Non-existent path to emails file {}: {source}",
                path.display()
            ),
            Error::Empty { path, rejected } => write!(
                f,
                "E-Mail list {} is empty ({rejected} invalid lines skipped).",
                path.display()
            ),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Read { source, .. } => Some(source),
            Error::Empty { .. } => None,
        }
    }
}
