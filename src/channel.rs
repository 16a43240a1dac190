//! Acquisition channel identities.
//!
//! The set of channels is closed. `ChannelType::All` is a selector meaning
//! "every concrete channel" and is never an acquisition source itself.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One independently acquired measurement stream, or the `All` selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    /// Fan-out selector over every concrete channel.
    All,
    /// VAC measurement channel.
    Vac,
    /// LAC measurement channel.
    Lac,
}

const CONCRETE: [ChannelType; 2] = [ChannelType::Vac, ChannelType::Lac];

impl ChannelType {
    /// Concrete acquisition channels, in display order. Never yields `All`.
    pub fn concrete() -> impl Iterator<Item = ChannelType> {
        CONCRETE.into_iter()
    }

    /// Returns `true` for the `All` selector.
    pub fn is_all(self) -> bool {
        self == ChannelType::All
    }

    /// Resolves a selector into the concrete channels it addresses.
    pub fn expand(self) -> Vec<ChannelType> {
        if self.is_all() {
            Self::concrete().collect()
        } else {
            vec![self]
        }
    }

    /// Upper-case label used in logs and status lines.
    pub fn label(self) -> &'static str {
        match self {
            ChannelType::All => "ALL",
            ChannelType::Vac => "VAC",
            ChannelType::Lac => "LAC",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Error returned when a string names no known channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown channel '{0}'")]
pub struct UnknownChannel(pub String);

impl FromStr for ChannelType {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(ChannelType::All),
            "vac" => Ok(ChannelType::Vac),
            "lac" => Ok(ChannelType::Lac),
            _ => Err(UnknownChannel(s.to_string())),
        }
    }
}
