// src/recipe/format.rs

//! Recipe file format definitions
//!
//! Recipes are TOML files. Conditions and dependency targets are written in
//! spec-string shorthand and parsed into structured rules when the recipe is
//! loaded (see [`super::parser`]).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A recipe as written on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeFile {
    pub package: PackageSection,

    /// Declared versions, in file order
    #[serde(default, rename = "version")]
    pub versions: Vec<VersionEntry>,

    #[serde(default)]
    pub variants: BTreeMap<String, VariantEntry>,

    #[serde(default, rename = "conflict")]
    pub conflicts: Vec<ConflictEntry>,

    #[serde(default, rename = "depends")]
    pub dependencies: Vec<DependsEntry>,

    #[serde(default)]
    pub build: Option<BuildSection>,

    /// Variables set while building this package
    #[serde(default)]
    pub build_env: BTreeMap<String, String>,

    /// Variables set for dependents that build or run against this package
    #[serde(default)]
    pub run_env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSection {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub homepage: Option<String>,

    /// Repository that branch, tag and commit versions are fetched from
    #[serde(default)]
    pub git: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionEntry {
    pub version: String,

    #[serde(default)]
    pub tag: Option<String>,

    #[serde(default)]
    pub branch: Option<String>,

    #[serde(default)]
    pub commit: Option<String>,

    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub preferred: bool,

    #[serde(default)]
    pub deprecated: bool,
}

/// Variant declaration; the kind follows from the default's type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantEntry {
    pub default: toml::Value,

    #[serde(default)]
    pub values: Vec<String>,

    #[serde(default)]
    pub description: String,
}

/// A conflict, either bare shorthand or a table with a condition and message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConflictEntry {
    Shorthand(String),
    Detailed {
        spec: Condition,
        #[serde(default)]
        when: Option<Condition>,
        #[serde(default)]
        msg: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependsEntry {
    /// Target in spec-string form, such as `hypre+int64@2.26.0`
    pub spec: String,

    #[serde(default)]
    pub when: Option<Condition>,

    /// Dependency types; build and link when omitted
    #[serde(default, rename = "type")]
    pub types: Vec<String>,
}

/// A condition: shorthand or a combination of conditions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Shorthand(String),
    All { all: Vec<Condition> },
    Any { any: Vec<Condition> },
    Not { not: Box<Condition> },
}

/// Build instructions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildSection {
    /// Shell lines run in order in the stage directory
    #[serde(default)]
    pub steps: Vec<String>,
}
