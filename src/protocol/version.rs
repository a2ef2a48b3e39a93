//! Server version parsing and protocol variant selection.
//!
//! Servers report versions like `a121-v0.7.0-37-gce2d06dd2e`: an optional
//! product prefix, a semantic version, an optional build count and an
//! optional git hash. Protocol variants are picked from an ordered table of
//! first supporting versions.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ClientError;

const KNOWN_PREFIXES: [&str; 3] = ["a111-", "a121-", "acc-"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    /// Commits after the release tag; a plain release counts as 0.
    pub build: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            build: 0,
        }
    }

    pub const fn with_build(major: u32, minor: u32, patch: u32, build: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            build,
        }
    }

    /// Parse a server version string; `None` when it is not recognizable.
    pub fn parse(s: &str) -> Option<Self> {
        let mut rest = s.trim();
        for prefix in KNOWN_PREFIXES {
            if let Some(r) = rest.strip_prefix(prefix) {
                rest = r;
                break;
            }
        }
        let rest = rest.strip_prefix('v').unwrap_or(rest);

        let mut parts = rest.split('-');
        let semver = parts.next()?;
        let mut nums = semver.split('.');
        let major = nums.next()?.parse().ok()?;
        let minor = nums.next()?.parse().ok()?;
        let patch = nums.next()?.parse().ok()?;
        if nums.next().is_some() {
            return None;
        }

        let mut build = 0;
        for part in parts {
            if let Ok(n) = part.parse::<u32>() {
                build = n;
            } else if part.starts_with('g') || part == "dirty" {
                // git hash or dirty marker
            } else {
                return None;
            }
        }
        Some(Self {
            major,
            minor,
            patch,
            build,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if self.build > 0 {
            write!(f, "-{}", self.build)?;
        }
        Ok(())
    }
}

/// Optional exploration protocol features, decided by server version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolFeatures {
    /// Setup accepts previously captured sensor calibration.
    pub calibration_reuse: bool,
    /// Subsweep config carries `iq_imbalance_compensation`.
    pub iq_imbalance_compensation: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplorationVariant {
    NoCalibrationReuse,
    NoIqImbalance,
    Latest,
}

impl ExplorationVariant {
    pub fn features(&self) -> ProtocolFeatures {
        match self {
            ExplorationVariant::NoCalibrationReuse => ProtocolFeatures {
                calibration_reuse: false,
                iq_imbalance_compensation: false,
            },
            ExplorationVariant::NoIqImbalance => ProtocolFeatures {
                calibration_reuse: true,
                iq_imbalance_compensation: false,
            },
            ExplorationVariant::Latest => ProtocolFeatures {
                calibration_reuse: true,
                iq_imbalance_compensation: true,
            },
        }
    }
}

/// First server version supporting each variant, oldest first.
pub const EXPLORATION_VARIANTS: [(Version, ExplorationVariant); 3] = [
    (Version::new(0, 3, 0), ExplorationVariant::NoCalibrationReuse),
    (Version::with_build(0, 4, 2, 280), ExplorationVariant::NoIqImbalance),
    (Version::new(0, 7, 1), ExplorationVariant::Latest),
];

/// Oldest A111 streaming server / module software we can talk to.
pub const A111_BASELINE: Version = Version::new(2, 0, 0);

/// Newest variant whose minimum version is at or below `version`.
pub fn select<T: Copy>(table: &[(Version, T)], version: &Version) -> Option<T> {
    table
        .iter()
        .rev()
        .find(|(min, _)| min <= version)
        .map(|(_, v)| *v)
}

/// Pick the exploration protocol variant for a reported version string.
pub fn exploration_variant(version_string: &str) -> Result<(Version, ExplorationVariant), ClientError> {
    let version = Version::parse(version_string)
        .ok_or_else(|| ClientError::UnsupportedVersion(version_string.to_string()))?;
    let variant = select(&EXPLORATION_VARIANTS, &version)
        .ok_or_else(|| ClientError::UnsupportedVersion(version_string.to_string()))?;
    Ok((version, variant))
}

/// Check an A111 version string against the supported baseline.
pub fn check_a111(version_string: &str) -> Result<Version, ClientError> {
    match Version::parse(version_string) {
        Some(v) if v >= A111_BASELINE => Ok(v),
        _ => Err(ClientError::UnsupportedVersion(version_string.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_build_and_hash() {
        let v = Version::parse("a121-v0.7.0-37-gce2d06dd2e").unwrap();
        assert_eq!(v, Version::with_build(0, 7, 0, 37));
        assert_eq!(Version::parse("v2.1.3").unwrap(), Version::new(2, 1, 3));
        assert_eq!(Version::parse("acc-2.14.0").unwrap(), Version::new(2, 14, 0));
        assert!(Version::parse("a121-vX.1").is_none());
        assert!(Version::parse("1.2").is_none());
        assert!(Version::parse("1.2.3-beta").is_none());
    }

    #[test]
    fn dispatch_scenarios() {
        let pick = |s| exploration_variant(s).map(|(_, v)| v);
        assert_eq!(pick("a121-v0.4.1").unwrap(), ExplorationVariant::NoCalibrationReuse);
        assert_eq!(pick("a121-v0.7.0-37-gce2d06dd2e").unwrap(), ExplorationVariant::NoIqImbalance);
        assert_eq!(pick("a121-v1.9.0-84-g605f449bc9").unwrap(), ExplorationVariant::Latest);
        assert!(matches!(pick("a121-v0.2.0"), Err(ClientError::UnsupportedVersion(_))));
        assert!(matches!(pick("garbage"), Err(ClientError::UnsupportedVersion(_))));
    }

    #[test]
    fn build_count_orders_within_a_patch_release() {
        let pick = |s| exploration_variant(s).map(|(_, v)| v).unwrap();
        assert_eq!(pick("a121-v0.4.2-279-gdeadbeef"), ExplorationVariant::NoCalibrationReuse);
        assert_eq!(pick("a121-v0.4.2-280-gdeadbeef"), ExplorationVariant::NoIqImbalance);
    }

    #[test]
    fn variants_are_feature_sets() {
        assert!(!ExplorationVariant::NoCalibrationReuse.features().calibration_reuse);
        let f = ExplorationVariant::NoIqImbalance.features();
        assert!(f.calibration_reuse && !f.iq_imbalance_compensation);
        assert!(ExplorationVariant::Latest.features().iq_imbalance_compensation);
    }

    #[test]
    fn a111_baseline() {
        assert!(check_a111("a111-v2.3.0").is_ok());
        assert!(check_a111("1.9.9").is_err());
    }
}
