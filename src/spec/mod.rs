// src/spec/mod.rs
//! Abstract and concrete package specs
//!
//! A [`Spec`] starts life as a request (`mfem-mgis@develop+petsc ^hypre+cuda`)
//! carrying a version constraint and a partial variant assignment. The
//! concretizer turns it into a tree of concrete specs, each with exactly one
//! version and a complete variant assignment.

mod parser;

pub use parser::{SpecNode, parse_nodes};

use crate::error::{Error, Result};
use crate::variant::VariantMap;
use crate::version::{Version, VersionConstraint};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use strum_macros::{Display, EnumString};

/// Number of hex characters kept from the identity hash
const SHORT_HASH_LEN: usize = 12;

/// How a dependency is used by its dependent
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DepType {
    /// Needed while building (tools, headers)
    Build,
    /// Linked into the dependent
    Link,
    /// Needed when the dependent runs
    Run,
}

/// Set of dependency types; defaults to build and link
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DepTypes(BTreeSet<DepType>);

impl DepTypes {
    pub fn new(types: impl IntoIterator<Item = DepType>) -> Self {
        Self(types.into_iter().collect())
    }

    pub fn contains(&self, dep_type: DepType) -> bool {
        self.0.contains(&dep_type)
    }

    /// Whether any of the given types is present
    pub fn any_of(&self, types: &[DepType]) -> bool {
        types.iter().any(|t| self.0.contains(t))
    }

    pub fn merge(&mut self, other: &DepTypes) {
        self.0.extend(other.0.iter().copied());
    }

    pub fn iter(&self) -> impl Iterator<Item = DepType> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for DepTypes {
    fn default() -> Self {
        Self::new([DepType::Build, DepType::Link])
    }
}

impl fmt::Display for DepTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.0.iter().map(|t| t.to_string()).collect();
        f.write_str(&names.join(","))
    }
}

impl FromStr for DepTypes {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut types = BTreeSet::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let t = DepType::from_str(part)
                .map_err(|_| Error::ParseError(format!("Unknown dependency type '{}'", part)))?;
            types.insert(t);
        }
        if types.is_empty() {
            return Err(Error::ParseError("Empty dependency type list".to_string()));
        }
        Ok(Self(types))
    }
}

/// Resolution state of a spec node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SpecState {
    #[default]
    Unresolved,
    Resolving,
    Concrete,
    Conflicted,
}

/// Edge from a spec to one of its dependencies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub spec: Spec,
    #[serde(default)]
    pub types: DepTypes,
}

/// A package request or a concretized package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spec {
    pub name: String,
    #[serde(default)]
    pub versions: VersionConstraint,
    /// Chosen version, set once concrete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    #[serde(default)]
    pub variants: VariantMap,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub state: SpecState,
}

impl Spec {
    /// An unconstrained request for a package
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            versions: VersionConstraint::any(),
            version: None,
            variants: VariantMap::new(),
            dependencies: Vec::new(),
            state: SpecState::Unresolved,
        }
    }

    /// A concrete node without dependencies
    pub fn concrete(name: impl Into<String>, version: Version, variants: VariantMap) -> Self {
        Self {
            name: name.into(),
            versions: VersionConstraint::exact(version.clone()),
            version: Some(version),
            variants,
            dependencies: Vec::new(),
            state: SpecState::Concrete,
        }
    }

    /// Parse a request such as `mfem@4.7.0:+miniapps ^hypre+int64`
    ///
    /// `^` nodes become direct dependency constraints of the root.
    pub fn parse(s: &str) -> Result<Self> {
        let mut nodes = parse_nodes(s)?.into_iter();
        let root = nodes
            .next()
            .ok_or_else(|| Error::ParseError("Empty spec".to_string()))?;
        let name = root
            .name
            .ok_or_else(|| Error::ParseError(format!("Spec '{}' has no package name", s)))?;

        let mut spec = Spec::new(name);
        spec.versions = root.versions;
        spec.variants = root.variants;

        for node in nodes {
            // Named by construction of parse_nodes
            let Some(dep_name) = node.name else { continue };
            if dep_name == spec.name || spec.dependency(&dep_name).is_some() {
                return Err(Error::ParseError(format!(
                    "Package '{}' appears more than once in '{}'",
                    dep_name, s
                )));
            }
            let mut dep = Spec::new(dep_name);
            dep.versions = node.versions;
            dep.variants = node.variants;
            spec.dependencies.push(Dependency {
                spec: dep,
                types: DepTypes::default(),
            });
        }

        Ok(spec)
    }

    pub fn is_concrete(&self) -> bool {
        self.state == SpecState::Concrete && self.version.is_some()
    }

    /// Direct dependency by package name
    pub fn dependency(&self, name: &str) -> Option<&Dependency> {
        self.dependencies.iter().find(|d| d.spec.name == name)
    }

    /// First node with the given name, searching depth first
    pub fn find(&self, name: &str) -> Option<&Spec> {
        if self.name == name {
            return Some(self);
        }
        self.dependencies.iter().find_map(|d| d.spec.find(name))
    }

    /// Every node in the tree, depth first, parents before children
    ///
    /// Shared dependencies appear once per path that reaches them.
    pub fn nodes(&self) -> Vec<&Spec> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(spec) = stack.pop() {
            out.push(spec);
            for dep in spec.dependencies.iter().rev() {
                stack.push(&dep.spec);
            }
        }
        out
    }

    /// Unique nodes keyed by package name
    pub fn unique_nodes(&self) -> BTreeMap<&str, &Spec> {
        let mut out = BTreeMap::new();
        for node in self.nodes() {
            out.entry(node.name.as_str()).or_insert(node);
        }
        out
    }

    /// `name@version` plus the canonical variant string
    pub fn identity_key(&self) -> String {
        self.node_string()
    }

    /// Short SHA-256 of the identity key, used in install and stage paths
    pub fn short_hash(&self) -> String {
        let digest = Sha256::digest(self.identity_key().as_bytes());
        let mut hash = hex::encode(digest);
        hash.truncate(SHORT_HASH_LEN);
        hash
    }

    /// This node alone, without dependencies
    pub fn node_string(&self) -> String {
        let mut out = self.name.clone();
        match &self.version {
            Some(v) => out.push_str(&format!("@{}", v)),
            None if !self.versions.is_any() => out.push_str(&format!("@{}", self.versions)),
            None => {}
        }
        out.push_str(&self.variants.to_string());
        out
    }

    /// Indented dependency tree, one node per line
    pub fn tree(&self) -> String {
        let mut out = String::new();
        self.write_tree(&mut out, 0, None);
        out
    }

    fn write_tree(&self, out: &mut String, depth: usize, types: Option<&DepTypes>) {
        let indent = "    ".repeat(depth);
        let caret = if depth == 0 { "" } else { "^" };
        match types {
            Some(t) => out.push_str(&format!("{}{}{}  [{}]\n", indent, caret, self.node_string(), t)),
            None => out.push_str(&format!("{}{}{}\n", indent, caret, self.node_string())),
        }
        for dep in &self.dependencies {
            dep.spec.write_tree(out, depth + 1, Some(&dep.types));
        }
    }
}

impl fmt::Display for Spec {
    /// Root node followed by every other unique node, sorted by name
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.node_string())?;
        for (name, node) in self.unique_nodes() {
            if name != self.name {
                write!(f, " ^{}", node.node_string())?;
            }
        }
        Ok(())
    }
}

impl FromStr for Spec {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Spec::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::VariantValue;

    #[test]
    fn test_parse_request() {
        let spec = Spec::parse("mfem-mgis@develop+petsc ^hypre+int64@2.26.0").unwrap();
        assert_eq!(spec.name, "mfem-mgis");
        assert_eq!(spec.variants.get("petsc"), Some(&VariantValue::Bool(true)));
        assert_eq!(spec.state, SpecState::Unresolved);

        let hypre = spec.dependency("hypre").unwrap();
        assert_eq!(hypre.types, DepTypes::default());
        assert_eq!(hypre.spec.variants.get("int64"), Some(&VariantValue::Bool(true)));
    }

    #[test]
    fn test_parse_requires_name() {
        assert!(Spec::parse("+mpi").is_err());
        assert!(Spec::parse("").is_err());
        assert!(Spec::parse("mfem ^hypre ^hypre+cuda").is_err());
    }

    #[test]
    fn test_display_is_canonical() {
        let spec = Spec::parse("pkg timer=auto ~static+shared ^zlib ^cmake@3.20:").unwrap();
        assert_eq!(spec.to_string(), "pkg+shared~static timer=auto ^cmake@3.20: ^zlib");

        let reparsed = Spec::parse(&spec.to_string()).unwrap();
        assert_eq!(reparsed.to_string(), spec.to_string());
    }

    #[test]
    fn test_identity_key_and_hash() {
        let variants = VariantMap::parse("+int64~cuda").unwrap();
        let a = Spec::concrete("hypre", Version::parse("2.26.0").unwrap(), variants.clone());
        let b = Spec::concrete("hypre", Version::parse("2.26.0").unwrap(), variants);
        assert_eq!(a.identity_key(), "hypre@2.26.0~cuda+int64");
        assert_eq!(a.short_hash(), b.short_hash());
        assert_eq!(a.short_hash().len(), 12);

        let c = Spec::concrete("hypre", Version::parse("2.27.0").unwrap(), VariantMap::new());
        assert_ne!(a.short_hash(), c.short_hash());
    }

    #[test]
    fn test_tree_and_nodes() {
        let mut root = Spec::concrete("app", Version::parse("1.0").unwrap(), VariantMap::new());
        let zlib = Spec::concrete("zlib", Version::parse("1.3").unwrap(), VariantMap::new());
        let mut lib = Spec::concrete("lib", Version::parse("2.0").unwrap(), VariantMap::new());
        lib.dependencies.push(Dependency {
            spec: zlib.clone(),
            types: DepTypes::default(),
        });
        root.dependencies.push(Dependency {
            spec: lib,
            types: DepTypes::default(),
        });
        root.dependencies.push(Dependency {
            spec: zlib,
            types: DepTypes::new([DepType::Link]),
        });

        let names: Vec<&str> = root.nodes().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["app", "lib", "zlib", "zlib"]);
        assert_eq!(root.unique_nodes().len(), 3);
        assert!(root.find("zlib").unwrap().is_concrete());

        let tree = root.tree();
        assert!(tree.starts_with("app@1.0\n"));
        assert!(tree.contains("    ^lib@2.0  [build,link]\n"));
        assert!(tree.contains("        ^zlib@1.3  [build,link]\n"));
        assert!(tree.contains("    ^zlib@1.3  [link]\n"));
    }

    #[test]
    fn test_deptypes() {
        let types: DepTypes = "run, build".parse().unwrap();
        assert!(types.contains(DepType::Run));
        assert!(!types.contains(DepType::Link));
        assert_eq!(types.to_string(), "build,run");
        assert!("compile".parse::<DepTypes>().is_err());

        let mut merged = DepTypes::new([DepType::Build]);
        merged.merge(&DepTypes::new([DepType::Run]));
        assert!(merged.any_of(&[DepType::Run]));
    }

    #[test]
    fn test_serde_round_trip() {
        let spec = Spec::concrete(
            "mfem",
            Version::parse("4.7.0").unwrap(),
            VariantMap::parse("+mpi timer=auto").unwrap(),
        );
        let json = serde_json::to_string(&spec).unwrap();
        let back: Spec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
        assert!(back.is_concrete());
    }
}
