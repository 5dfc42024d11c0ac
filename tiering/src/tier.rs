//! UI tiers: the four richness levels a client can be asked to render
//!
//! Tiers are totally ordered by rank: `D < C < B < A`. `A` is the richest
//! experience, `D` is the survival tier used during emergencies.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::TierError;

/// Discrete UI richness level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Full experience: animations, realtime, prefetch, high quality media
    A,
    /// Reduced media quality, animations and realtime kept
    B,
    /// Realtime only, low quality media
    C,
    /// Survival mode
    D,
}

impl Tier {
    /// All tiers, richest first
    pub fn all() -> &'static [Tier] {
        &[Tier::A, Tier::B, Tier::C, Tier::D]
    }

    /// Numeric rank (`D = 1` .. `A = 4`)
    pub fn rank(self) -> u8 {
        match self {
            Self::A => 4,
            Self::B => 3,
            Self::C => 2,
            Self::D => 1,
        }
    }

    /// Richer of the two tiers
    pub fn richest(self, other: Tier) -> Tier {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }

    /// Poorer of the two tiers
    pub fn poorest(self, other: Tier) -> Tier {
        if other.rank() < self.rank() {
            other
        } else {
            self
        }
    }

    /// Rendering constraints for this tier
    pub fn constraints(self) -> TierConstraints {
        match self {
            Self::A => TierConstraints {
                animations: true,
                realtime_updates: true,
                prefetch: true,
                max_image_quality: ImageQuality::High,
                video_autoplay: true,
                poll_interval_secs: 15,
            },
            Self::B => TierConstraints {
                animations: true,
                realtime_updates: true,
                prefetch: false,
                max_image_quality: ImageQuality::Medium,
                video_autoplay: false,
                poll_interval_secs: 30,
            },
            Self::C => TierConstraints {
                animations: false,
                realtime_updates: true,
                prefetch: false,
                max_image_quality: ImageQuality::Low,
                video_autoplay: false,
                poll_interval_secs: 60,
            },
            Self::D => TierConstraints {
                animations: false,
                realtime_updates: false,
                prefetch: false,
                max_image_quality: ImageQuality::None,
                video_autoplay: false,
                poll_interval_secs: 300,
            },
        }
    }
}

impl PartialOrd for Tier {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Tier {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
            Self::C => write!(f, "C"),
            Self::D => write!(f, "D"),
        }
    }
}

impl FromStr for Tier {
    type Err = TierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            "D" => Ok(Self::D),
            _ => Err(TierError::UnknownTier(s.to_string())),
        }
    }
}

/// Maximum media quality a tier may load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageQuality {
    High,
    Medium,
    Low,
    None,
}

/// What the presentation layer is allowed to do at a given tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierConstraints {
    pub animations: bool,
    pub realtime_updates: bool,
    pub prefetch: bool,
    pub max_image_quality: ImageQuality,
    pub video_autoplay: bool,
    /// Suggested refresh cadence when realtime updates are off or degraded
    pub poll_interval_secs: u32,
}
