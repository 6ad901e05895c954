//! Semantic version parsing and ordering.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::TkupError;

/// A `[v]major.minor.patch[-suffix]` version.
///
/// Ordering and equality only consider the numeric triple. The pre-release
/// suffix is kept for display and for [`Version::is_identical`].
#[derive(Debug, Clone)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Option<String>,
}

/// Outcome of comparing a current version against another version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Older,
    Equal,
    Newer,
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Older => write!(f, "Older"),
            Self::Equal => write!(f, "Equal"),
            Self::Newer => write!(f, "Newer"),
        }
    }
}

impl Version {
    /// Parse a version string, accepting an optional leading `v`.
    pub fn parse(s: &str) -> Result<Self, TkupError> {
        let invalid = || TkupError::InvalidVersion(s.to_string());

        let trimmed = s.strip_prefix('v').unwrap_or(s);
        let (core, pre) = match trimmed.split_once('-') {
            Some((core, suffix)) => (core, Some(suffix.to_string())),
            None => (trimmed, None),
        };

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() != 3 {
            return Err(invalid());
        }

        let mut numbers = [0u64; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            *slot = part.parse().map_err(|_| invalid())?;
        }

        Ok(Self {
            major: numbers[0],
            minor: numbers[1],
            patch: numbers[2],
            pre,
        })
    }

    /// Compare `self` (the current version) against `other`.
    pub fn compare(&self, other: &Version) -> Comparison {
        match self.cmp(other) {
            Ordering::Less => Comparison::Older,
            Ordering::Equal => Comparison::Equal,
            Ordering::Greater => Comparison::Newer,
        }
    }

    /// `v{major}.{minor}`
    pub fn major_minor(&self) -> String {
        format!("v{}.{}", self.major, self.minor)
    }

    /// Same numeric triple and same pre-release suffix.
    pub fn is_identical(&self, other: &Version) -> bool {
        self == other && self.pre == other.pre
    }

    fn triple(&self) -> (u64, u64, u64) {
        (self.major, self.minor, self.patch)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.triple() == other.triple()
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then_with(|| self.minor.cmp(&other.minor))
            .then_with(|| self.patch.cmp(&other.patch))
    }
}

impl FromStr for Version {
    type Err = TkupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

/// Compare two version strings.
pub fn compare(current: &str, other: &str) -> Result<Comparison, TkupError> {
    Ok(Version::parse(current)?.compare(&Version::parse(other)?))
}

/// True iff `current` is strictly older than `target`.
///
/// A target older than the current version yields `false`: downgrades are
/// never requested by this function's callers.
pub fn needs_upgrade(current: &str, target: &str) -> Result<bool, TkupError> {
    Ok(compare(current, target)? == Comparison::Older)
}

/// True iff both versions share major and minor.
pub fn is_compatible(a: &str, b: &str) -> Result<bool, TkupError> {
    let (a, b) = (Version::parse(a)?, Version::parse(b)?);
    Ok(a.major == b.major && a.minor == b.minor)
}

pub fn major_minor(version: &str) -> Result<String, TkupError> {
    Ok(Version::parse(version)?.major_minor())
}

/// Validate a configured target version. Requires the leading `v`.
pub fn validate(version: &str) -> Result<(), TkupError> {
    if !version.starts_with('v') {
        return Err(TkupError::InvalidVersion(format!(
            "{version} (must start with 'v')"
        )));
    }
    Version::parse(version).map(|_| ())
}
