// src/build/environment.rs

//! Build environment composition
//!
//! The composer derives the variables a node is built with from its own
//! install prefix and those of its direct dependencies. Search paths only
//! receive dependencies whose edge types make them relevant: build tools go
//! on `PATH`, linked libraries on the compiler and linker paths, and so on.
//! Recipe `build_env` and dependency `run_env` templates are expanded last,
//! so they override the computed values.

use crate::error::{Error, Result};
use crate::plan::{BuildPlan, NodeId};
use crate::recipe::{RecipeRegistry, expand_template};
use crate::spec::{DepType, DepTypes};
use std::collections::BTreeMap;
use std::path::Path;

pub type Environment = BTreeMap<String, String>;

/// Search path variables: (name, edge types that contribute, subdirectory)
const SEARCH_PATHS: &[(&str, &[DepType], &str)] = &[
    ("CMAKE_PREFIX_PATH", &[DepType::Build, DepType::Link], ""),
    ("PATH", &[DepType::Build, DepType::Run], "bin"),
    ("LD_LIBRARY_PATH", &[DepType::Link, DepType::Run], "lib"),
    ("PKG_CONFIG_PATH", &[DepType::Link], "lib/pkgconfig"),
    ("CPATH", &[DepType::Link], "include"),
];

struct DepInfo<'p> {
    name: &'p str,
    version: String,
    prefix: &'p Path,
    types: &'p DepTypes,
}

pub struct EnvironmentComposer<'a> {
    registry: &'a RecipeRegistry,
    base_path: &'a str,
}

impl<'a> EnvironmentComposer<'a> {
    pub fn new(registry: &'a RecipeRegistry, base_path: &'a str) -> Self {
        Self { registry, base_path }
    }

    /// Environment for building `id`
    ///
    /// The node and all of its direct dependencies must already have an
    /// install prefix.
    pub fn compose(&self, plan: &BuildPlan, id: NodeId) -> Result<Environment> {
        let node = plan.node(id);
        let prefix = node.prefix.as_deref().ok_or_else(|| Error::MissingInstallLocation {
            package: node.name().to_string(),
            dependency: node.name().to_string(),
        })?;

        let mut deps = Vec::new();
        for (dep_id, types) in plan.dependencies(id) {
            let dep = plan.node(dep_id);
            let dep_prefix = dep.prefix.as_deref().ok_or_else(|| Error::MissingInstallLocation {
                package: node.name().to_string(),
                dependency: dep.name().to_string(),
            })?;
            deps.push(DepInfo {
                name: dep.name(),
                version: dep.version(),
                prefix: dep_prefix,
                types,
            });
        }
        deps.sort_by(|a, b| a.name.cmp(b.name));

        let mut env = Environment::new();
        env.insert("PREFIX".to_string(), prefix.display().to_string());
        env.insert("KILN_PACKAGE".to_string(), node.name().to_string());
        env.insert("KILN_VERSION".to_string(), node.version());
        env.insert("KILN_SPEC".to_string(), node.key.clone());

        for dep in &deps {
            env.insert(dir_variable(dep.name), dep.prefix.display().to_string());
        }

        for (variable, types, subdir) in SEARCH_PATHS {
            let mut entries: Vec<String> = deps
                .iter()
                .filter(|d| d.types.any_of(types))
                .map(|d| join_subdir(d.prefix, subdir))
                .collect();
            if *variable == "PATH" && !self.base_path.is_empty() {
                entries.push(self.base_path.to_string());
            }
            if !entries.is_empty() {
                env.insert(variable.to_string(), entries.join(":"));
            }
        }

        // Shared placeholders: every direct dependency's prefix
        let mut dep_vars = BTreeMap::new();
        for dep in &deps {
            dep_vars.insert(format!("dep.{}.prefix", dep.name), dep.prefix.display().to_string());
        }

        for dep in deps.iter().filter(|d| d.types.any_of(&[DepType::Build, DepType::Run])) {
            let recipe = self.registry.lookup(dep.name)?;
            let vars = with_own(&dep_vars, dep.name, &dep.version, dep.prefix);
            for (key, template) in &recipe.run_env {
                env.insert(key.clone(), expand_template(template, &vars));
            }
        }

        let recipe = self.registry.lookup(node.name())?;
        let vars = with_own(&dep_vars, node.name(), &node.version(), prefix);
        for (key, template) in &recipe.build_env {
            env.insert(key.clone(), expand_template(template, &vars));
        }

        Ok(env)
    }
}

/// `superlu-dist` -> `SUPERLU_DIST_DIR`
pub fn dir_variable(package: &str) -> String {
    let stem: String = package
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{}_DIR", stem)
}

fn join_subdir(prefix: &Path, subdir: &str) -> String {
    if subdir.is_empty() {
        prefix.display().to_string()
    } else {
        prefix.join(subdir).display().to_string()
    }
}

fn with_own(
    shared: &BTreeMap<String, String>,
    name: &str,
    version: &str,
    prefix: &Path,
) -> BTreeMap<String, String> {
    let mut vars = shared.clone();
    vars.insert("name".to_string(), name.to_string());
    vars.insert("version".to_string(), version.to_string());
    vars.insert("prefix".to_string(), prefix.display().to_string());
    vars
}
