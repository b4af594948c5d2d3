// src/lib.rs

//! Kiln: recipe concretizer and DAG build scheduler
//!
//! Turns an abstract request such as `mfem-mgis@develop+suite-sparse` into a
//! fully pinned dependency tree, collapses that tree into a build DAG and
//! builds it in dependency order on a bounded worker pool.
//!
//! # Architecture
//!
//! - Recipes: TOML package descriptions with versions, variants, conflicts
//!   and conditional dependencies, loaded into a [`RecipeRegistry`]
//! - Concretizer: backtracking search that pins every version and variant
//! - Plan: deduplicated DAG of concrete nodes with a deterministic order
//! - Build: parallel execution with failure propagation and cancellation

pub mod build;
pub mod concretizer;
pub mod config;
mod error;
pub mod plan;
pub mod recipe;
pub mod spec;
pub mod variant;
pub mod version;

use std::sync::Arc;

pub use build::{
    BuildCommand, BuildOptions, BuildReport, CancellationToken, NoopBuildCommand, Scheduler,
    ShellBuildCommand,
};
pub use concretizer::{ConcreteCache, Concretizer, explain};
pub use config::KilnConfig;
pub use error::{Error, Result};
pub use plan::{BuildNode, BuildPlan, BuildState, NodeId};
pub use recipe::{PackageRecipe, RecipeRegistry};
pub use spec::{DepType, DepTypes, Spec};
pub use variant::{VariantDef, VariantMap, VariantValue};
pub use version::{Version, VersionConstraint};

/// Pin every version and variant of `request` and its dependencies
pub fn concretize(registry: &RecipeRegistry, request: &Spec) -> Result<Spec> {
    Concretizer::new(registry).concretize(request)
}

/// Collapse a concrete spec tree into a build plan
pub fn plan(concrete: &Spec) -> Result<BuildPlan> {
    BuildPlan::from_spec(concrete)
}

/// Build `plan` with each recipe's shell build steps
pub fn build(
    registry: Arc<RecipeRegistry>,
    plan: &mut BuildPlan,
    options: &BuildOptions,
) -> Result<BuildReport> {
    let command = Arc::new(ShellBuildCommand::new(Arc::clone(&registry)));
    Scheduler::new(registry, command).execute(plan, options)
}
