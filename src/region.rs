//! Region topology: latency map and proximity fallback ranking
//!
//! Regions come in two flavors: serving regions (nodes may register there and
//! carry a fixed round-trip latency to the router) and client-only regions
//! (requests may originate there, but allocation always falls through the
//! proximity table to a serving region).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named topological zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Region {
    UsEast,
    UsWest,
    CaCentral,
    EuWest,
    MeCentral,
    AsiaSouth,
    Oceania,
}

impl Region {
    /// Regions nodes may register in (the ones with a latency entry)
    pub const SERVING: [Region; 5] = [
        Region::UsEast,
        Region::EuWest,
        Region::AsiaSouth,
        Region::Oceania,
        Region::CaCentral,
    ];

    /// Fixed round-trip latency from this region to the router, in milliseconds.
    ///
    /// Returns None for client-only regions (us-west, me-central).
    pub fn latency_ms(&self) -> Option<u64> {
        match self {
            Region::UsEast => Some(10),
            Region::CaCentral => Some(30),
            Region::EuWest => Some(50),
            Region::AsiaSouth => Some(100),
            Region::Oceania => Some(150),
            Region::UsWest | Region::MeCentral => None,
        }
    }

    /// Whether nodes may register in this region
    pub fn is_serving(&self) -> bool {
        self.latency_ms().is_some()
    }

    /// Ordered fallback regions for allocation: self first (when serving),
    /// then nearest-to-farthest.
    pub fn proximity(&self) -> &'static [Region] {
        use Region::*;
        match self {
            UsEast => &[UsEast, CaCentral, EuWest, AsiaSouth, Oceania],
            UsWest => &[UsEast, CaCentral, EuWest, AsiaSouth, Oceania],
            CaCentral => &[CaCentral, UsEast, EuWest, AsiaSouth, Oceania],
            EuWest => &[EuWest, UsEast, CaCentral, AsiaSouth, Oceania],
            MeCentral => &[EuWest, AsiaSouth, UsEast, CaCentral, Oceania],
            AsiaSouth => &[AsiaSouth, Oceania, EuWest, UsEast, CaCentral],
            Oceania => &[Oceania, AsiaSouth, EuWest, UsEast, CaCentral],
        }
    }

    /// Canonical kebab-case name (matches the wire format)
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::UsEast => "us-east",
            Region::UsWest => "us-west",
            Region::CaCentral => "ca-central",
            Region::EuWest => "eu-west",
            Region::MeCentral => "me-central",
            Region::AsiaSouth => "asia-south",
            Region::Oceania => "oceania",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = UnknownRegion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "us-east" => Ok(Region::UsEast),
            "us-west" => Ok(Region::UsWest),
            "ca-central" => Ok(Region::CaCentral),
            "eu-west" => Ok(Region::EuWest),
            "me-central" => Ok(Region::MeCentral),
            "asia-south" => Ok(Region::AsiaSouth),
            "oceania" => Ok(Region::Oceania),
            other => Err(UnknownRegion(other.to_string())),
        }
    }
}

/// Parse error for an unrecognized region name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRegion(pub String);

impl fmt::Display for UnknownRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown region: {}", self.0)
    }
}

impl std::error::Error for UnknownRegion {}
