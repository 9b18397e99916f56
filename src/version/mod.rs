// src/version/mod.rs

//! Version handling and constraint satisfaction for recipe dependencies
//!
//! Upstream projects rarely follow semver, so versions are compared segment
//! by segment: `1.2.10 > 1.2.9`, `2.40 > 2.4`, `9.4p1 > 9.4`. Missing
//! trailing numeric segments count as zero, so `1.0 == 1.0.0`.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("empty version")]
    Empty,

    #[error("invalid version '{0}': must start with a digit and contain only [A-Za-z0-9._+~-]")]
    InvalidVersion(String),

    #[error("invalid version constraint '{0}'")]
    InvalidConstraint(String),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Segment {
    // Alphabetic segments sort before numeric ones: 1.0rc1 < 1.0.1
    Alpha(String),
    Numeric(u64),
}

/// A package version as written in a recipe
#[derive(Debug, Clone)]
pub struct PackageVersion {
    raw: String,
    segments: Vec<Segment>,
}

impl PackageVersion {
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(VersionError::Empty);
        }
        let valid_chars = raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+' | '~'));
        if !valid_chars || !raw.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(VersionError::InvalidVersion(raw.to_string()));
        }

        let mut segments = Vec::new();
        for part in raw.split(['.', '-', '_', '+', '~']) {
            let mut rest = part;
            while !rest.is_empty() {
                let numeric = rest.starts_with(|c: char| c.is_ascii_digit());
                let end = rest
                    .find(|c: char| c.is_ascii_digit() != numeric)
                    .unwrap_or(rest.len());
                let (chunk, tail) = rest.split_at(end);
                if numeric {
                    // Absurdly long numeric runs saturate instead of failing
                    segments.push(Segment::Numeric(chunk.parse().unwrap_or(u64::MAX)));
                } else {
                    segments.push(Segment::Alpha(chunk.to_ascii_lowercase()));
                }
                rest = tail;
            }
        }

        // Normalise trailing zeros so 1.0 and 1.0.0 compare and hash equal
        while matches!(segments.last(), Some(Segment::Numeric(0))) && segments.len() > 1 {
            segments.pop();
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for PackageVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.segments.cmp(&other.segments)
    }
}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PackageVersion {
    fn eq(&self, other: &Self) -> bool {
        self.segments == other.segments
    }
}

impl Eq for PackageVersion {}

impl Hash for PackageVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.segments.hash(state);
    }
}

/// A version requirement on a dependency
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum VersionConstraint {
    #[default]
    Any,
    Exact(PackageVersion),
    GreaterThan(PackageVersion),
    GreaterOrEqual(PackageVersion),
    LessThan(PackageVersion),
    LessOrEqual(PackageVersion),
    NotEqual(PackageVersion),
    /// Range such as `>= 1.0, < 2.0`
    All(Vec<VersionConstraint>),
}

impl VersionConstraint {
    /// Parse a constraint such as `>= 1.2`, `< 2`, `= 1.5.0`, `*`
    ///
    /// A bare version means an exact match.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let s = s.trim();
        if s.is_empty() || s == "*" {
            return Ok(VersionConstraint::Any);
        }

        if s.contains(',') {
            let parts = s
                .split(',')
                .map(|p| {
                    if p.trim().is_empty() {
                        Err(VersionError::InvalidConstraint(s.to_string()))
                    } else {
                        Self::parse(p)
                    }
                })
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(VersionConstraint::All(parts));
        }

        let version = |rest: &str| {
            PackageVersion::parse(rest).map_err(|_| VersionError::InvalidConstraint(s.to_string()))
        };

        if let Some(rest) = s.strip_prefix(">=") {
            Ok(VersionConstraint::GreaterOrEqual(version(rest)?))
        } else if let Some(rest) = s.strip_prefix("<=") {
            Ok(VersionConstraint::LessOrEqual(version(rest)?))
        } else if let Some(rest) = s.strip_prefix("!=") {
            Ok(VersionConstraint::NotEqual(version(rest)?))
        } else if let Some(rest) = s.strip_prefix("==") {
            Ok(VersionConstraint::Exact(version(rest)?))
        } else if let Some(rest) = s.strip_prefix('>') {
            Ok(VersionConstraint::GreaterThan(version(rest)?))
        } else if let Some(rest) = s.strip_prefix('<') {
            Ok(VersionConstraint::LessThan(version(rest)?))
        } else if let Some(rest) = s.strip_prefix('=') {
            Ok(VersionConstraint::Exact(version(rest)?))
        } else {
            Ok(VersionConstraint::Exact(version(s)?))
        }
    }

    pub fn satisfies(&self, version: &PackageVersion) -> bool {
        match self {
            VersionConstraint::Any => true,
            VersionConstraint::Exact(v) => version == v,
            VersionConstraint::GreaterThan(v) => version > v,
            VersionConstraint::GreaterOrEqual(v) => version >= v,
            VersionConstraint::LessThan(v) => version < v,
            VersionConstraint::LessOrEqual(v) => version <= v,
            VersionConstraint::NotEqual(v) => version != v,
            VersionConstraint::All(parts) => parts.iter().all(|c| c.satisfies(version)),
        }
    }

    #[inline]
    pub fn is_any(&self) -> bool {
        matches!(self, VersionConstraint::Any)
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionConstraint::Any => write!(f, "*"),
            VersionConstraint::Exact(v) => write!(f, "= {}", v),
            VersionConstraint::GreaterThan(v) => write!(f, "> {}", v),
            VersionConstraint::GreaterOrEqual(v) => write!(f, ">= {}", v),
            VersionConstraint::LessThan(v) => write!(f, "< {}", v),
            VersionConstraint::LessOrEqual(v) => write!(f, "<= {}", v),
            VersionConstraint::NotEqual(v) => write!(f, "!= {}", v),
            VersionConstraint::All(parts) => {
                let rendered: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
                write!(f, "{}", rendered.join(", "))
            }
        }
    }
}
