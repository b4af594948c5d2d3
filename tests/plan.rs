// tests/plan.rs

//! Build plan construction from concretized specs.

mod common;

use common::{concretize, recipe, registry};
use kiln::{BuildPlan, DepType, RecipeRegistry};
use std::collections::BTreeMap;

/// app -> {lib, tool (build)}, lib -> {zlib, tool (build)}, tool -> zlib
fn layered() -> RecipeRegistry {
    let app = format!(
        "{}[[depends]]\nspec = \"tool\"\ntype = [\"build\"]\n",
        recipe("app", &["1.0"], &[], &[("lib", "")])
    );
    let lib = format!(
        "{}[[depends]]\nspec = \"tool\"\ntype = [\"build\"]\n",
        recipe("lib", &["2.0"], &[("shared", true)], &[("zlib", "")])
    );
    let tool = recipe("tool", &["3.1"], &[], &[("zlib", "")]);
    let zlib = recipe("zlib", &["1.3.1"], &[], &[]);
    registry(&[&app, &lib, &tool, &zlib])
}

#[test]
fn test_shared_nodes_collapse() {
    let spec = concretize(&layered(), "app").unwrap();
    // zlib is reached three times in the tree
    assert_eq!(spec.nodes().iter().filter(|n| n.name == "zlib").count(), 3);

    let plan = kiln::plan(&spec).unwrap();
    assert_eq!(plan.len(), 4);
    assert_eq!(
        plan.order_keys(),
        vec!["zlib@1.3.1", "tool@3.1", "lib@2.0+shared", "app@1.0"]
    );
}

#[test]
fn test_dependencies_precede_dependents() {
    let plan = kiln::plan(&concretize(&layered(), "app").unwrap()).unwrap();
    let position: BTreeMap<_, _> = plan
        .order()
        .iter()
        .enumerate()
        .map(|(pos, id)| (*id, pos))
        .collect();

    for node in plan.nodes() {
        for (dep, _) in plan.dependencies(node.id) {
            assert!(position[&dep] < position[&node.id], "{} before {}", plan.node(dep), node);
        }
    }
}

#[test]
fn test_edge_types_survive() {
    let plan = kiln::plan(&concretize(&layered(), "app").unwrap()).unwrap();
    let app = plan.root();
    let tool = plan.find("tool").unwrap();
    let (_, types) = plan.dependencies(app).find(|(id, _)| *id == tool).unwrap();
    assert!(types.contains(DepType::Build));
    assert!(!types.contains(DepType::Link));
}

#[test]
fn test_planning_is_idempotent() {
    let spec = concretize(&layered(), "app").unwrap();
    let first = BuildPlan::from_spec(&spec).unwrap();
    let second = BuildPlan::from_spec(&spec).unwrap();

    assert_eq!(first.order_keys(), second.order_keys());
    assert_eq!(
        first.keys().collect::<Vec<_>>(),
        second.keys().collect::<Vec<_>>()
    );
    let hashes = |plan: &BuildPlan| plan.nodes().map(|n| n.hash.clone()).collect::<Vec<_>>();
    assert_eq!(hashes(&first), hashes(&second));
}

#[test]
fn test_transitive_dependents() {
    let plan = kiln::plan(&concretize(&layered(), "app").unwrap()).unwrap();
    let zlib = plan.find("zlib").unwrap();
    assert_eq!(plan.transitive_dependents(zlib).len(), 3);
    assert!(plan.transitive_dependents(plan.root()).is_empty());
}
