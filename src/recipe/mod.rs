// src/recipe/mod.rs

//! Package recipes and the recipe registry
//!
//! A recipe describes one package: the versions that can be built, the
//! variants it offers, combinations it cannot be built in, and what it
//! depends on under which conditions.
//!
//! # Example Recipe
//!
//! ```toml
//! conflict = ["~static~shared", { spec = "+petsc", when = "~mpi" }]
//!
//! [package]
//! name = "mfem-mgis"
//! git = "https://github.com/thelfer/mfem-mgis.git"
//!
//! [[version]]
//! version = "develop"
//! branch = "master"
//! preferred = true
//!
//! [variants.mpi]
//! default = true
//! description = "Enable MPI parallelism"
//!
//! [[depends]]
//! spec = "mfem@4.7.0:+mpi"
//! when = "+mpi"
//!
//! [[depends]]
//! spec = "cmake"
//! type = ["build"]
//!
//! [build]
//! steps = ["cmake -DCMAKE_INSTALL_PREFIX=%(prefix)s .", "make -j%(jobs)s install"]
//!
//! [run_env]
//! MFEMMGIS_DIR = "%(prefix)s/share/mfem-mgis/cmake/"
//! ```

mod format;
mod package;
pub mod parser;
mod predicate;
mod registry;

pub use format::{BuildSection, Condition, ConflictEntry, DependsEntry, RecipeFile};
pub use package::{
    ConflictRule, DependencyRule, PackageRecipe, SourceRef, VersionDecl, expand_template,
};
pub use parser::{parse_recipe, parse_recipe_file};
pub use predicate::{NoDependencies, NodeLookup, Predicate};
pub use registry::RecipeRegistry;
