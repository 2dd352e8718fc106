use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Upper bound reputation is clamped to before a tier is chosen.
pub const MAX_REPUTATION: i64 = 1_000_000;

/// Reputation-gated chat room. Variants are declared in ascending threshold
/// order, so the derived `Ord` matches the threshold order.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoomTier {
    #[default]
    Silver,
    Gold,
    Platinum,
    Diamond,
}

impl RoomTier {
    pub const ALL: [RoomTier; 4] = [
        RoomTier::Silver,
        RoomTier::Gold,
        RoomTier::Platinum,
        RoomTier::Diamond,
    ];

    pub const COUNT: usize = Self::ALL.len();

    /// Minimum reputation needed to read or post in this room.
    pub const fn min_reputation(self) -> i64 {
        match self {
            Self::Silver => 0,
            Self::Gold => 100,
            Self::Platinum => 500,
            Self::Diamond => 1000,
        }
    }

    /// Human-readable room label for room pickers.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Silver => "Silver",
            Self::Gold => "Gold",
            Self::Platinum => "Platinum",
            Self::Diamond => "Diamond",
        }
    }

    /// Canonical wire/storage name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Silver => "SILVER",
            Self::Gold => "GOLD",
            Self::Platinum => "PLATINUM",
            Self::Diamond => "DIAMOND",
        }
    }

    /// The highest tier whose threshold does not exceed the clamped reputation.
    pub fn for_reputation(reputation: i64) -> Self {
        let clamped = reputation.clamp(0, MAX_REPUTATION);
        Self::ALL
            .iter()
            .rev()
            .copied()
            .find(|tier| tier.min_reputation() <= clamped)
            .unwrap_or(Self::Silver)
    }

    /// Access is "at least": any reputation at or above the threshold qualifies,
    /// so high-reputation users may also enter lower rooms. Reputation is
    /// clamped the same way as in `for_reputation`, so a negative score still
    /// reaches SILVER.
    pub fn can_access(self, reputation: i64) -> bool {
        reputation.clamp(0, MAX_REPUTATION) >= self.min_reputation()
    }

    /// Case-insensitive lookup. Blank and unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|tier| tier.as_str().eq_ignore_ascii_case(name))
    }

    /// Malformed selectors degrade to `fallback` instead of failing.
    pub fn parse_or(name: Option<&str>, fallback: Self) -> Self {
        name.and_then(Self::parse).unwrap_or(fallback)
    }
}

impl fmt::Display for RoomTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTier(pub String);

impl fmt::Display for UnknownTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown room tier '{}'", self.0)
    }
}

impl std::error::Error for UnknownTier {}

impl FromStr for RoomTier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| UnknownTier(s.to_string()))
    }
}
