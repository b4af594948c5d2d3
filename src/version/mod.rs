// src/version/mod.rs

//! Version ordering and range constraints for recipes
//!
//! Recipe versions are not semver. They range from plain release numbers
//! (`4.7.0`) to tags (`rliv-1.0`) and branch names (`develop`, `master`).
//! Versions are split into numeric and alphabetic components and compared
//! component by component:
//!
//! - numeric components sort above alphabetic ones
//! - a strict prefix sorts below the longer version (`1.0 < 1.0.1`)
//! - development branch names (`develop`, `main`, `master`, `head`, `trunk`)
//!   sort above every release, `develop` highest
//!
//! Constraints use the `lo:hi` range syntax. Both ends are inclusive and the
//! upper end matches by prefix, so `:2.2` admits `2.2.7`. A bare version
//! (`2.2`) is shorthand for `2.2:2.2`; `=2.2` pins exactly. Comma separated
//! ranges form a union (`0.3.1:,master:`).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Branch-like names that sort above every numbered release, highest first
const DEVELOPMENT_NAMES: [&str; 5] = ["develop", "main", "master", "head", "trunk"];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Component {
    Numeric(u64),
    Alpha(String),
}

impl Component {
    /// Rank among development names (higher is newer)
    fn development_rank(&self) -> Option<usize> {
        match self {
            Self::Alpha(s) => DEVELOPMENT_NAMES
                .iter()
                .position(|name| name == s)
                .map(|pos| DEVELOPMENT_NAMES.len() - pos),
            Self::Numeric(_) => None,
        }
    }
}

impl Ord for Component {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.development_rank(), other.development_rank()) {
            (Some(a), Some(b)) => return a.cmp(&b),
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (None, None) => {}
        }

        match (self, other) {
            (Self::Numeric(a), Self::Numeric(b)) => a.cmp(b),
            (Self::Alpha(a), Self::Alpha(b)) => a.cmp(b),
            (Self::Numeric(_), Self::Alpha(_)) => Ordering::Greater,
            (Self::Alpha(_), Self::Numeric(_)) => Ordering::Less,
        }
    }
}

impl PartialOrd for Component {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A recipe version such as `4.7.0`, `rliv-1.0` or `develop`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    text: String,
    components: Vec<Component>,
}

impl Version {
    /// Parse a version string
    pub fn parse(s: &str) -> Result<Self> {
        let text = s.trim();
        if text.is_empty() {
            return Err(Error::ParseError("Empty version".to_string()));
        }

        if let Some(bad) = text
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')))
        {
            return Err(Error::ParseError(format!(
                "Invalid character '{}' in version '{}'",
                bad, text
            )));
        }

        let mut components = Vec::new();
        for segment in text.split(['.', '-', '_']) {
            if segment.is_empty() {
                return Err(Error::ParseError(format!(
                    "Empty component in version '{}'",
                    text
                )));
            }
            split_alnum_runs(segment, &mut components)?;
        }

        Ok(Self {
            text: text.to_string(),
            components,
        })
    }

    /// Original text of the version
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Whether every component of `self` leads `other`
    ///
    /// `2.2` is a prefix of `2.2.1`; every version is a prefix of itself.
    pub fn is_prefix_of(&self, other: &Version) -> bool {
        self.components.len() <= other.components.len()
            && self.components == other.components[..self.components.len()]
    }

    /// Whether this is a development branch version like `develop`
    pub fn is_development(&self) -> bool {
        self.components
            .first()
            .is_some_and(|c| c.development_rank().is_some())
    }
}

/// Split `1rc2` into `1`, `rc`, `2`
fn split_alnum_runs(segment: &str, out: &mut Vec<Component>) -> Result<()> {
    let mut current = String::new();
    let mut numeric = false;

    let flush = |current: &mut String, numeric: bool, out: &mut Vec<Component>| -> Result<()> {
        if current.is_empty() {
            return Ok(());
        }
        let component = if numeric {
            let value = current
                .parse::<u64>()
                .map_err(|e| Error::ParseError(format!("Invalid number '{}': {}", current, e)))?;
            Component::Numeric(value)
        } else {
            Component::Alpha(current.to_ascii_lowercase())
        };
        out.push(component);
        current.clear();
        Ok(())
    };

    for c in segment.chars() {
        let is_digit = c.is_ascii_digit();
        if !current.is_empty() && is_digit != numeric {
            flush(&mut current, numeric, out)?;
        }
        numeric = is_digit;
        current.push(c);
    }
    flush(&mut current, numeric, out)
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.components == other.components
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.components.hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.components.cmp(&other.components)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = Error;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        Version::parse(&s)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.text
    }
}

/// A single contiguous range of versions
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionRange {
    /// Exactly one version (`=1.0`)
    Exact(Version),
    /// Inclusive bounds; the upper bound also admits versions it prefixes
    Between {
        lo: Option<Version>,
        hi: Option<Version>,
    },
}

impl VersionRange {
    /// The unbounded range
    pub fn any() -> Self {
        Self::Between { lo: None, hi: None }
    }

    pub fn contains(&self, version: &Version) -> bool {
        match self {
            Self::Exact(v) => v == version,
            Self::Between { lo, hi } => {
                let above = lo.as_ref().is_none_or(|lo| version >= lo);
                let below = hi
                    .as_ref()
                    .is_none_or(|hi| version <= hi || hi.is_prefix_of(version));
                above && below
            }
        }
    }

    /// Intersection of two ranges, `None` when they share no version
    pub fn intersect(&self, other: &VersionRange) -> Option<VersionRange> {
        match (self, other) {
            (Self::Exact(v), range) | (range, Self::Exact(v)) => {
                range.contains(v).then(|| Self::Exact(v.clone()))
            }
            (Self::Between { lo: lo1, hi: hi1 }, Self::Between { lo: lo2, hi: hi2 }) => {
                let lo = match (lo1, lo2) {
                    (Some(a), Some(b)) => Some(a.max(b).clone()),
                    (a, b) => a.clone().or_else(|| b.clone()),
                };
                let hi = match (hi1, hi2) {
                    (Some(a), Some(b)) => Some(tighter_upper(a, b).clone()),
                    (a, b) => a.clone().or_else(|| b.clone()),
                };

                if let (Some(lo), Some(hi)) = (&lo, &hi) {
                    if lo > hi && !hi.is_prefix_of(lo) {
                        return None;
                    }
                }
                Some(Self::Between { lo, hi })
            }
        }
    }

    fn is_any(&self) -> bool {
        matches!(self, Self::Between { lo: None, hi: None })
    }
}

/// The upper bound admitting fewer versions
fn tighter_upper<'a>(a: &'a Version, b: &'a Version) -> &'a Version {
    if a.is_prefix_of(b) {
        b
    } else if b.is_prefix_of(a) {
        a
    } else {
        a.min(b)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(v) => write!(f, "={}", v),
            Self::Between {
                lo: Some(lo),
                hi: Some(hi),
            } if lo == hi => write!(f, "{}", lo),
            Self::Between { lo, hi } => {
                if let Some(lo) = lo {
                    write!(f, "{}", lo)?;
                }
                f.write_str(":")?;
                if let Some(hi) = hi {
                    write!(f, "{}", hi)?;
                }
                Ok(())
            }
        }
    }
}

/// A union of version ranges
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionConstraint {
    ranges: Vec<VersionRange>,
}

impl VersionConstraint {
    /// Constraint admitting every version
    pub fn any() -> Self {
        Self {
            ranges: vec![VersionRange::any()],
        }
    }

    /// Constraint admitting exactly one version
    pub fn exact(version: Version) -> Self {
        Self {
            ranges: vec![VersionRange::Exact(version)],
        }
    }

    /// Parse a constraint such as `4.7.0:`, `:3`, `=1.0` or `0.3.1:,master:`
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s == ":" || s == "*" {
            return Ok(Self::any());
        }

        let mut ranges = Vec::new();
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(Error::ParseError(format!(
                    "Empty range in version constraint '{}'",
                    s
                )));
            }

            let range = if let Some(exact) = part.strip_prefix('=') {
                VersionRange::Exact(Version::parse(exact)?)
            } else if let Some((lo, hi)) = part.split_once(':') {
                let bound = |b: &str| -> Result<Option<Version>> {
                    let b = b.trim();
                    if b.is_empty() { Ok(None) } else { Version::parse(b).map(Some) }
                };
                let range = VersionRange::Between {
                    lo: bound(lo)?,
                    hi: bound(hi)?,
                };
                if is_inverted(&range) {
                    return Err(Error::ParseError(format!(
                        "Empty version range '{}'",
                        part
                    )));
                }
                range
            } else {
                let v = Version::parse(part)?;
                VersionRange::Between {
                    lo: Some(v.clone()),
                    hi: Some(v),
                }
            };
            ranges.push(range);
        }

        Ok(Self { ranges })
    }

    pub fn is_any(&self) -> bool {
        self.ranges.iter().any(VersionRange::is_any)
    }

    pub fn satisfies(&self, version: &Version) -> bool {
        self.ranges.iter().any(|r| r.contains(version))
    }

    /// Intersection of two constraints, `None` when no version can satisfy both
    pub fn intersect(&self, other: &VersionConstraint) -> Option<VersionConstraint> {
        if self.is_any() {
            return Some(other.clone());
        }
        if other.is_any() {
            return Some(self.clone());
        }

        let mut ranges: Vec<VersionRange> = Vec::new();
        for a in &self.ranges {
            for b in &other.ranges {
                if let Some(r) = a.intersect(b) {
                    if !ranges.contains(&r) {
                        ranges.push(r);
                    }
                }
            }
        }

        if ranges.is_empty() {
            None
        } else {
            Some(Self { ranges })
        }
    }

    pub fn ranges(&self) -> &[VersionRange] {
        &self.ranges
    }
}

fn is_inverted(range: &VersionRange) -> bool {
    match range {
        VersionRange::Between {
            lo: Some(lo),
            hi: Some(hi),
        } => lo > hi && !hi.is_prefix_of(lo),
        _ => false,
    }
}

impl Default for VersionConstraint {
    fn default() -> Self {
        Self::any()
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            return f.write_str(":");
        }
        let parts: Vec<String> = self.ranges.iter().map(|r| r.to_string()).collect();
        f.write_str(&parts.join(","))
    }
}

impl FromStr for VersionConstraint {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        VersionConstraint::parse(s)
    }
}

impl TryFrom<String> for VersionConstraint {
    type Error = Error;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        VersionConstraint::parse(&s)
    }
}

impl From<VersionConstraint> for String {
    fn from(c: VersionConstraint) -> Self {
        c.to_string()
    }
}
