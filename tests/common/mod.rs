// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use kiln::recipe::parse_recipe;
use kiln::{BuildOptions, RecipeRegistry, Spec};
use std::path::{Path, PathBuf};

/// Build a registry from inline TOML recipes.
pub fn registry(recipes: &[&str]) -> RecipeRegistry {
    let mut registry = RecipeRegistry::new();
    for text in recipes {
        registry.register(parse_recipe(text).unwrap()).unwrap();
    }
    registry
}

/// A recipe with versions, boolean variants and dependency lines.
///
/// Each dependency is `(spec, when)`; an empty `when` means always.
pub fn recipe(name: &str, versions: &[&str], variants: &[(&str, bool)], deps: &[(&str, &str)]) -> String {
    let mut out = String::new();
    out.push_str(&format!("[package]\nname = \"{}\"\n\n", name));
    for version in versions {
        out.push_str(&format!("[[version]]\nversion = \"{}\"\n\n", version));
    }
    for (variant, default) in variants {
        out.push_str(&format!("[variants.{}]\ndefault = {}\n\n", variant, default));
    }
    for (spec, when) in deps {
        out.push_str(&format!("[[depends]]\nspec = \"{}\"\n", spec));
        if !when.is_empty() {
            out.push_str(&format!("when = \"{}\"\n", when));
        }
        out.push('\n');
    }
    out
}

/// The sample repository shipped with the crate.
pub fn sample_repo() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("recipes")
}

pub fn sample_registry() -> RecipeRegistry {
    RecipeRegistry::from_dirs(&[sample_repo()]).unwrap()
}

pub fn concretize(registry: &RecipeRegistry, request: &str) -> kiln::Result<Spec> {
    kiln::concretize(registry, &Spec::parse(request).unwrap())
}

/// Build options rooted in a temporary directory.
pub fn build_options(root: &Path, jobs: usize) -> BuildOptions {
    BuildOptions {
        max_parallelism: jobs,
        install_root: root.join("install"),
        stage_root: root.join("stage"),
        base_path: "/usr/bin:/bin".to_string(),
        ..BuildOptions::default()
    }
}
