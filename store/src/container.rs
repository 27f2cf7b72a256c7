//! Container identifiers carried in URL fragments.
//!
//! A container id is opaque to everything except the sequencer that issued
//! it. Clients pass it around as the fragment of a share link
//! (`https://host/app#<id>`); an empty fragment means "create a new one".

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

const MAX_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContainerIdError {
    #[error("container id is empty")]
    Empty,
    #[error("container id longer than 128 characters")]
    TooLong,
    #[error("container id contains invalid character {0:?}")]
    InvalidChar(char),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContainerId(String);

impl ContainerId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse the fragment part of a share link, with or without the `#`.
    /// Returns `Ok(None)` for an empty fragment.
    ///
    /// # Errors
    ///
    /// Returns `ContainerIdError` if the fragment is not a valid id.
    pub fn from_fragment(fragment: &str) -> Result<Option<Self>, ContainerIdError> {
        let raw = fragment.trim();
        let raw = raw.strip_prefix('#').unwrap_or(raw);
        if raw.is_empty() {
            return Ok(None);
        }
        raw.parse().map(Some)
    }

    #[must_use]
    pub fn to_fragment(&self) -> String {
        format!("#{}", self.0)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ContainerId {
    type Err = ContainerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ContainerIdError::Empty);
        }
        if s.len() > MAX_LEN {
            return Err(ContainerIdError::TooLong);
        }
        if let Some(bad) = s.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_')) {
            return Err(ContainerIdError::InvalidChar(bad));
        }
        Ok(Self(s.to_owned()))
    }
}

impl TryFrom<String> for ContainerId {
    type Error = ContainerIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContainerId> for String {
    fn from(id: ContainerId) -> Self {
        id.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
#[path = "container_test.rs"]
mod tests;
