// src/recipe/package.rs

//! Validated package recipes
//!
//! [`PackageRecipe`] is the in-memory form the concretizer works with. All
//! shorthand from the recipe file has been parsed into versions, constraints
//! and predicates by the time one exists.

use crate::error::{Error, Result};
use crate::recipe::predicate::Predicate;
use crate::spec::DepTypes;
use crate::variant::{VariantDef, VariantMap};
use crate::version::{Version, VersionConstraint};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Where the sources of a version come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRef {
    Tag(String),
    Branch(String),
    Commit(String),
    Url(String),
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tag(t) => write!(f, "tag={}", t),
            Self::Branch(b) => write!(f, "branch={}", b),
            Self::Commit(c) => write!(f, "commit={}", c),
            Self::Url(u) => write!(f, "url={}", u),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionDecl {
    pub version: Version,
    pub source: Option<SourceRef>,
    pub preferred: bool,
    pub deprecated: bool,
}

impl VersionDecl {
    pub fn new(version: Version) -> Self {
        Self {
            version,
            source: None,
            preferred: false,
            deprecated: false,
        }
    }
}

/// A forbidden combination: the rule is violated when `spec` and `when` both hold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRule {
    pub spec: Predicate,
    pub when: Predicate,
    pub msg: Option<String>,
}

impl ConflictRule {
    pub fn new(spec: Predicate) -> Self {
        Self {
            spec,
            when: Predicate::Always,
            msg: None,
        }
    }

    /// Human-readable reason, preferring the recipe's message
    pub fn describe(&self) -> String {
        match (&self.msg, self.when.is_always()) {
            (Some(msg), _) => format!("conflicts with '{}': {}", self.spec, msg),
            (None, true) => format!("conflicts with '{}'", self.spec),
            (None, false) => format!("conflicts with '{}' when '{}'", self.spec, self.when),
        }
    }
}

/// A dependency that applies when `when` holds on the dependent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRule {
    pub target: String,
    pub versions: VersionConstraint,
    pub variants: VariantMap,
    pub when: Predicate,
    pub types: DepTypes,
}

impl DependencyRule {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            versions: VersionConstraint::any(),
            variants: VariantMap::new(),
            when: Predicate::Always,
            types: DepTypes::default(),
        }
    }

    /// Requirement text such as `hypre@2.26.0+int64`
    pub fn requirement(&self) -> String {
        let mut out = self.target.clone();
        if !self.versions.is_any() {
            out.push_str(&format!("@{}", self.versions));
        }
        out.push_str(&self.variants.to_string());
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRecipe {
    pub name: String,
    pub description: Option<String>,
    pub homepage: Option<String>,
    pub git: Option<String>,
    pub versions: Vec<VersionDecl>,
    pub variants: Vec<VariantDef>,
    pub conflicts: Vec<ConflictRule>,
    pub dependencies: Vec<DependencyRule>,
    /// Shell lines run to build and install the package
    pub build_steps: Vec<String>,
    pub build_env: BTreeMap<String, String>,
    pub run_env: BTreeMap<String, String>,
}

impl PackageRecipe {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            homepage: None,
            git: None,
            versions: Vec::new(),
            variants: Vec::new(),
            conflicts: Vec::new(),
            dependencies: Vec::new(),
            build_steps: Vec::new(),
            build_env: BTreeMap::new(),
            run_env: BTreeMap::new(),
        }
    }

    pub fn variant(&self, name: &str) -> Option<&VariantDef> {
        self.variants.iter().find(|v| v.name == name)
    }

    pub fn version_decl(&self, version: &Version) -> Option<&VersionDecl> {
        self.versions.iter().find(|d| d.version == *version)
    }

    /// Every variant at its declared default
    pub fn default_variants(&self) -> VariantMap {
        self.variants
            .iter()
            .map(|def| (def.name.clone(), def.default.clone()))
            .collect()
    }

    /// Check recipe invariants
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Error::InvalidRecipe {
            package: self.name.clone(),
            reason,
        };

        if !crate::variant::is_valid_name(&self.name) {
            return Err(invalid(format!("invalid package name '{}'", self.name)));
        }

        if self.versions.is_empty() {
            return Err(invalid("no versions declared".to_string()));
        }

        let mut seen = HashSet::new();
        for decl in &self.versions {
            if !seen.insert(&decl.version) {
                return Err(invalid(format!("version '{}' declared twice", decl.version)));
            }
        }

        let mut names = HashSet::new();
        for def in &self.variants {
            if !names.insert(def.name.as_str()) {
                return Err(invalid(format!("variant '{}' declared twice", def.name)));
            }
            def.validate().map_err(invalid)?;
        }

        let check_variants = |predicate: &Predicate, context: &str| -> Result<()> {
            for name in predicate.own_variants() {
                if !names.contains(name) {
                    return Err(invalid(format!(
                        "{} references undeclared variant '{}'",
                        context, name
                    )));
                }
            }
            Ok(())
        };

        for rule in &self.conflicts {
            check_variants(&rule.spec, "conflict")?;
            check_variants(&rule.when, "conflict condition")?;
        }

        for rule in &self.dependencies {
            if rule.target == self.name {
                return Err(invalid("package depends on itself".to_string()));
            }
            let context = format!("condition of dependency '{}'", rule.target);
            check_variants(&rule.when, &context)?;
            if let Some(package) = rule.when.referenced_packages().into_iter().next() {
                return Err(invalid(format!(
                    "{} inspects dependency '{}'; only own variants and version are allowed",
                    context, package
                )));
            }
        }

        Ok(())
    }
}

/// Replace `%(key)s` placeholders with values from `vars`
///
/// Unknown placeholders are left in place.
pub fn expand_template(template: &str, vars: &BTreeMap<String, String>) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        result = result.replace(&format!("%({})s", key), value);
    }
    result
}
