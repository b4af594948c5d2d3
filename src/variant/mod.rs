// src/variant/mod.rs
//! Build variants: named build-time choices declared by a recipe
//!
//! Variants are either boolean switches (`+mpi`, `~mpi`) or single-valued
//! enumerations (`timer=auto`). A [`VariantMap`] holds an assignment and
//! renders it canonically: boolean switches first in name order, then
//! enumerated values, so identity keys are stable.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use strum_macros::{Display, EnumString};

/// Kind of a variant declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VariantKind {
    /// On/off switch written `+name` or `~name`
    Boolean,
    /// One value from a declared set, written `name=value`
    Enum,
}

/// Value assigned to a variant
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariantValue {
    Bool(bool),
    Str(String),
}

impl VariantValue {
    /// Interpret the right-hand side of `name=value`
    pub fn from_text(s: &str) -> Self {
        match s {
            "true" | "True" => Self::Bool(true),
            "false" | "False" => Self::Bool(false),
            other => Self::Str(other.to_string()),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Str(_) => None,
        }
    }
}

impl fmt::Display for VariantValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<bool> for VariantValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for VariantValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

/// A variant declared by a recipe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantDef {
    pub name: String,
    pub kind: VariantKind,
    pub default: VariantValue,
    /// Allowed values (enumerations only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
    #[serde(default)]
    pub description: String,
}

impl VariantDef {
    pub fn boolean(name: impl Into<String>, default: bool, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: VariantKind::Boolean,
            default: VariantValue::Bool(default),
            values: Vec::new(),
            description: description.into(),
        }
    }

    pub fn enumerated(
        name: impl Into<String>,
        default: impl Into<String>,
        values: &[&str],
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: VariantKind::Enum,
            default: VariantValue::Str(default.into()),
            values: values.iter().map(|v| v.to_string()).collect(),
            description: description.into(),
        }
    }

    /// Check the declaration itself, returning a reason on failure
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !is_valid_name(&self.name) {
            return Err(format!("invalid variant name '{}'", self.name));
        }

        match (self.kind, &self.default) {
            (VariantKind::Boolean, VariantValue::Bool(_)) => Ok(()),
            (VariantKind::Boolean, other) => Err(format!(
                "boolean variant '{}' has non-boolean default '{}'",
                self.name, other
            )),
            (VariantKind::Enum, VariantValue::Str(default)) => {
                if self.values.is_empty() {
                    Err(format!("variant '{}' declares no allowed values", self.name))
                } else if !self.values.contains(default) {
                    Err(format!(
                        "default '{}' of variant '{}' is not among its allowed values",
                        default, self.name
                    ))
                } else {
                    Ok(())
                }
            }
            (VariantKind::Enum, VariantValue::Bool(_)) => Err(format!(
                "multi-valued variant '{}' has a boolean default",
                self.name
            )),
        }
    }

    /// Normalize a requested value, returning a reason when it is not allowed
    pub fn coerce(&self, value: &VariantValue) -> std::result::Result<VariantValue, String> {
        match (self.kind, value) {
            (VariantKind::Boolean, VariantValue::Bool(b)) => Ok(VariantValue::Bool(*b)),
            (VariantKind::Boolean, VariantValue::Str(s)) => {
                Err(format!("expected true or false, got '{}'", s))
            }
            (VariantKind::Enum, VariantValue::Str(s)) if self.values.contains(s) => {
                Ok(VariantValue::Str(s.clone()))
            }
            (VariantKind::Enum, VariantValue::Str(s)) => Err(format!(
                "'{}' is not one of [{}]",
                s,
                self.values.join(", ")
            )),
            (VariantKind::Enum, VariantValue::Bool(_)) => Err(format!(
                "'{}' takes a value, write {}=<value>",
                self.name, self.name
            )),
        }
    }
}

/// Names may contain letters, digits, `_` and `-`
pub(crate) fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        && !name.starts_with('-')
}

/// An assignment of values to variants
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantMap {
    values: BTreeMap<String, VariantValue>,
}

impl VariantMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, returning the previous one
    pub fn insert(&mut self, name: impl Into<String>, value: VariantValue) -> Option<VariantValue> {
        self.values.insert(name.into(), value)
    }

    pub fn get(&self, name: &str) -> Option<&VariantValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &VariantValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether every entry of `required` holds in this assignment
    pub fn satisfies(&self, required: &VariantMap) -> bool {
        required
            .iter()
            .all(|(name, value)| self.values.get(name) == Some(value))
    }

    /// Parse a bare variant list such as `+mpi~cuda timer=auto`
    pub fn parse(s: &str) -> Result<Self> {
        let mut map = Self::new();

        for word in s.split_whitespace() {
            if let Some((name, value)) = word.split_once('=') {
                map.set_once(name, VariantValue::from_text(value))?;
                continue;
            }

            let mut rest = word;
            while !rest.is_empty() {
                let enabled = match rest.as_bytes()[0] {
                    b'+' => true,
                    b'~' => false,
                    _ => {
                        return Err(Error::ParseError(format!(
                            "Expected '+' or '~' in variant list '{}'",
                            s
                        )));
                    }
                };
                let body = &rest[1..];
                let end = body.find(['+', '~']).unwrap_or(body.len());
                map.set_once(&body[..end], VariantValue::Bool(enabled))?;
                rest = &body[end..];
            }
        }

        Ok(map)
    }

    /// Insert a parsed value, rejecting contradictory repeats like `+mpi~mpi`
    pub(crate) fn set_once(&mut self, name: &str, value: VariantValue) -> Result<()> {
        if !is_valid_name(name) {
            return Err(Error::ParseError(format!("Invalid variant name '{}'", name)));
        }
        match self.values.get(name) {
            Some(existing) if *existing != value => Err(Error::ParseError(format!(
                "Variant '{}' given both as {} and {}",
                name, existing, value
            ))),
            _ => {
                self.values.insert(name.to_string(), value);
                Ok(())
            }
        }
    }
}

impl fmt::Display for VariantMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.values {
            if let VariantValue::Bool(b) = value {
                write!(f, "{}{}", if *b { '+' } else { '~' }, name)?;
            }
        }
        for (name, value) in &self.values {
            if let VariantValue::Str(s) = value {
                write!(f, " {}={}", name, s)?;
            }
        }
        Ok(())
    }
}

impl FromStr for VariantMap {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        VariantMap::parse(s)
    }
}

impl FromIterator<(String, VariantValue)> for VariantMap {
    fn from_iter<I: IntoIterator<Item = (String, VariantValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // === VariantDef tests ===

    #[test]
    fn test_boolean_def_validates() {
        let def = VariantDef::boolean("shared", false, "Build shared library");
        assert!(def.validate().is_ok());
        assert_eq!(def.kind.to_string(), "boolean");
    }

    #[test]
    fn test_enum_default_must_be_allowed() {
        let def = VariantDef::enumerated("timer", "auto", &["auto", "std", "posix"], "Timer");
        assert!(def.validate().is_ok());

        let bad = VariantDef::enumerated("timer", "cpu", &["auto", "std"], "Timer");
        assert!(bad.validate().is_err());

        let empty = VariantDef::enumerated("timer", "auto", &[], "Timer");
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_coerce_values() {
        let timer = VariantDef::enumerated("timer", "auto", &["auto", "mpi"], "");
        assert_eq!(
            timer.coerce(&VariantValue::from("mpi")).unwrap(),
            VariantValue::from("mpi")
        );
        assert!(timer.coerce(&VariantValue::from("gpu")).is_err());
        assert!(timer.coerce(&VariantValue::Bool(true)).is_err());

        let mpi = VariantDef::boolean("mpi", true, "");
        assert!(mpi.coerce(&VariantValue::Bool(false)).is_ok());
        assert!(mpi.coerce(&VariantValue::from("yes")).is_err());
    }

    // === VariantMap tests ===

    #[test]
    fn test_parse_switches() {
        let map = VariantMap::parse("+petsc~mpi").unwrap();
        assert_eq!(map.get("petsc"), Some(&VariantValue::Bool(true)));
        assert_eq!(map.get("mpi"), Some(&VariantValue::Bool(false)));
    }

    #[test]
    fn test_parse_hyphenated_and_key_value() {
        let map = VariantMap::parse("+superlu-dist timer=auto shared=false").unwrap();
        assert_eq!(map.get("superlu-dist"), Some(&VariantValue::Bool(true)));
        assert_eq!(map.get("timer"), Some(&VariantValue::from("auto")));
        assert_eq!(map.get("shared"), Some(&VariantValue::Bool(false)));
    }

    #[test]
    fn test_parse_contradiction() {
        assert!(VariantMap::parse("+mpi~mpi").is_err());
        assert!(VariantMap::parse("+mpi+mpi").is_ok());
        assert!(VariantMap::parse("mpi").is_err());
    }

    #[test]
    fn test_canonical_display() {
        let map = VariantMap::parse("timer=auto ~static +shared").unwrap();
        assert_eq!(map.to_string(), "+shared~static timer=auto");
        assert_eq!(VariantMap::new().to_string(), "");
    }

    #[test]
    fn test_satisfies() {
        let full = VariantMap::parse("+mpi~cuda timer=auto").unwrap();
        assert!(full.satisfies(&VariantMap::parse("+mpi").unwrap()));
        assert!(full.satisfies(&VariantMap::new()));
        assert!(!full.satisfies(&VariantMap::parse("+cuda").unwrap()));
        assert!(!full.satisfies(&VariantMap::parse("+openmp").unwrap()));
    }
}
