//! Achievement-based rank ladder.
//!
//! Ranks are derived from accumulated achievement points and gate two
//! things: only [`Rank::Leader`] principals may declare or end conflicts,
//! and each rank maps to a claim allowance that the reconcile worker
//! pushes to the protection service when a rank change is detected.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A principal's rank within their faction.
///
/// Bands are half-open on the top rank: any point total at or above the
/// [`Rank::Leader`] threshold stays `Leader`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rank {
    /// Entry rank, 0–49 points.
    Initiate,
    /// 50–119 points.
    Adept,
    /// 120–179 points.
    Veteran,
    /// 180–204 points.
    Elite,
    /// 205+ points. The only rank permitted to declare or end conflicts.
    Leader,
}

impl Rank {
    /// Derives the rank for a point total.
    #[must_use]
    pub fn from_points(points: u32) -> Self {
        let mut rank = Self::Initiate;
        for candidate in [Self::Adept, Self::Veteran, Self::Elite, Self::Leader] {
            if points >= candidate.min_points() {
                rank = candidate;
            }
        }
        rank
    }

    /// Minimum point total for this rank.
    #[must_use]
    pub const fn min_points(self) -> u32 {
        match self {
            Self::Initiate => 0,
            Self::Adept => 50,
            Self::Veteran => 120,
            Self::Elite => 180,
            Self::Leader => 205,
        }
    }

    /// Whether this rank may declare conflicts and be a conflict party.
    #[must_use]
    pub const fn is_leader_equivalent(self) -> bool {
        matches!(self, Self::Leader)
    }

    /// The next rank in progression, or `None` at the top.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Initiate => Some(Self::Adept),
            Self::Adept => Some(Self::Veteran),
            Self::Veteran => Some(Self::Elite),
            Self::Elite => Some(Self::Leader),
            Self::Leader => None,
        }
    }

    /// Claim allowance pushed to the protection service for this rank.
    #[must_use]
    pub const fn claim_allowance(self) -> u32 {
        match self {
            Self::Initiate => 2,
            Self::Adept => 4,
            Self::Veteran => 6,
            Self::Elite => 8,
            Self::Leader => 75,
        }
    }
}

impl Default for Rank {
    fn default() -> Self {
        Self::Initiate
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initiate => write!(f, "initiate"),
            Self::Adept => write!(f, "adept"),
            Self::Veteran => write!(f, "veteran"),
            Self::Elite => write!(f, "elite"),
            Self::Leader => write!(f, "leader"),
        }
    }
}
