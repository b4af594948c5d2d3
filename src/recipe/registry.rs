// src/recipe/registry.rs

//! Registry of package recipes
//!
//! Recipes are registered during a load phase and only read afterwards, so a
//! finished registry is shared between threads behind an `Arc` without locks.

use crate::error::{Error, Result};
use crate::recipe::package::{PackageRecipe, VersionDecl};
use crate::recipe::parser::parse_recipe_file;
use crate::variant::VariantDef;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

#[derive(Debug, Clone, Default)]
pub struct RecipeRegistry {
    recipes: BTreeMap<String, PackageRecipe>,
}

impl RecipeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a recipe after checking its invariants
    pub fn register(&mut self, recipe: PackageRecipe) -> Result<()> {
        if self.recipes.contains_key(&recipe.name) {
            return Err(Error::DuplicateRecipe(recipe.name));
        }
        recipe.validate()?;
        debug!("Registered recipe {} ({} versions)", recipe.name, recipe.versions.len());
        self.recipes.insert(recipe.name.clone(), recipe);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<&PackageRecipe> {
        self.recipes
            .get(name)
            .ok_or_else(|| Error::UnknownPackage(name.to_string()))
    }

    pub fn versions_of(&self, name: &str) -> Result<&[VersionDecl]> {
        Ok(&self.lookup(name)?.versions)
    }

    pub fn variants_of(&self, name: &str) -> Result<&[VariantDef]> {
        Ok(&self.lookup(name)?.variants)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.recipes.contains_key(name)
    }

    /// Package names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.recipes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }

    /// SHA-256 over the content of every registered recipe
    ///
    /// Changes whenever a recipe is added, removed or edited, so persisted
    /// concretization results can be invalidated.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for recipe in self.recipes.values() {
            hasher.update(format!("package {}\n", recipe.name));
            for decl in &recipe.versions {
                hasher.update(format!(
                    "version {} {} {}\n",
                    decl.version, decl.preferred, decl.deprecated
                ));
            }
            for def in &recipe.variants {
                hasher.update(format!(
                    "variant {} {} {} [{}]\n",
                    def.name,
                    def.kind,
                    def.default,
                    def.values.join(",")
                ));
            }
            for rule in &recipe.conflicts {
                hasher.update(format!("conflict {} when {}\n", rule.spec, rule.when));
            }
            for rule in &recipe.dependencies {
                hasher.update(format!(
                    "depends {} when {} type {}\n",
                    rule.requirement(),
                    rule.when,
                    rule.types
                ));
            }
        }
        hex::encode(hasher.finalize())
    }

    /// Register every `*.toml` recipe found under `dir`, returning how many were added
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        if !dir.is_dir() {
            return Err(Error::io(
                dir,
                std::io::Error::new(std::io::ErrorKind::NotFound, "recipe directory not found"),
            ));
        }

        let mut count = 0;
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
                Error::io(path, e.into())
            })?;

            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().is_none_or(|ext| ext != "toml") {
                continue;
            }

            let recipe = parse_recipe_file(path)?;
            self.register(recipe)?;
            count += 1;
        }

        info!("Loaded {} recipes from {}", count, dir.display());
        Ok(count)
    }

    /// Build a registry from several repository directories, in order
    pub fn from_dirs<P: AsRef<Path>>(dirs: &[P]) -> Result<Self> {
        let mut registry = Self::new();
        for dir in dirs {
            registry.load_dir(dir.as_ref())?;
        }
        Ok(registry)
    }
}
