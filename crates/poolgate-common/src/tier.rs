use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Service class of an account or request.
///
/// External consumers (status views, history keys written by older
/// deployments) call the basic tier "normal"; parsing accepts both names and
/// `external_name` reports the alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Basic,
    Plus,
}

pub const SONNET_MODEL: &str = "claude-3-5-sonnet";
pub const OPUS_MODEL: &str = "claude-3-opus";

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Basic => "basic",
            Tier::Plus => "plus",
        }
    }

    pub fn external_name(&self) -> &'static str {
        match self {
            Tier::Basic => "normal",
            Tier::Plus => "plus",
        }
    }

    /// Models whose cooldown windows are tracked for accounts of this tier.
    pub fn known_models(&self) -> &'static [&'static str] {
        match self {
            Tier::Basic => &[SONNET_MODEL],
            Tier::Plus => &[OPUS_MODEL, SONNET_MODEL],
        }
    }

    /// True when `name` refers to this tier, including the external alias.
    pub fn matches_name(&self, name: &str) -> bool {
        match self {
            Tier::Basic => name == "basic" || name == "normal",
            Tier::Plus => name == "plus",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown tier: {0}")]
pub struct TierParseError(pub String);

impl FromStr for Tier {
    type Err = TierParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "basic" | "normal" => Ok(Tier::Basic),
            "plus" => Ok(Tier::Plus),
            other => Err(TierParseError(other.to_string())),
        }
    }
}
