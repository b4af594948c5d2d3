// tests/concretize.rs

//! End-to-end concretization scenarios against small inline repositories.

mod common;

use common::{concretize, recipe, registry};
use kiln::{Error, RecipeRegistry, VariantValue};

fn static_shared() -> RecipeRegistry {
    let pkg = format!(
        "conflict = [\"~static~shared\"]\n{}",
        recipe("pkg", &["1.0", "2.0"], &[("static", true), ("shared", true)], &[])
    );
    registry(&[&pkg])
}

fn feature_repo() -> RecipeRegistry {
    let pkg = recipe("pkg", &["1.0"], &[("feature", true)], &[("helper@2.0", "+feature")]);
    let helper = recipe("helper", &["1.0", "2.0", "3.0"], &[], &[]);
    registry(&[&pkg, &helper])
}

#[test]
fn test_forbidden_combination_is_reported() {
    let registry = static_shared();
    let err = concretize(&registry, "pkg~static~shared").unwrap_err();
    match &err {
        Error::UnsatisfiableConflict { package, rejected, .. } => {
            assert_eq!(package, "pkg");
            // Every version was tried before giving up
            assert_eq!(rejected.len(), 2);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!kiln::explain(err.rejected()).is_empty());
}

#[test]
fn test_defaults_avoid_conflict() {
    let registry = static_shared();
    let spec = concretize(&registry, "pkg").unwrap();
    assert_eq!(spec.node_string(), "pkg@2.0+shared+static");
    assert!(concretize(&registry, "pkg+shared~static").is_ok());
    assert!(concretize(&registry, "pkg~shared").is_ok());
}

#[test]
fn test_conditional_dependency_follows_variant() {
    let registry = feature_repo();

    let with = concretize(&registry, "pkg").unwrap();
    let helper = with.find("helper").expect("helper pulled in by +feature");
    assert_eq!(helper.version.as_ref().unwrap().to_string(), "2.0");

    let without = concretize(&registry, "pkg~feature").unwrap();
    assert!(without.find("helper").is_none());
    assert!(without.dependencies.is_empty());
}

#[test]
fn test_cycle_is_rejected() {
    let a = recipe("a", &["1.0"], &[], &[("b", "")]);
    let b = recipe("b", &["1.0"], &[], &[("a", "")]);
    let registry = registry(&[&a, &b]);

    match concretize(&registry, "a").unwrap_err() {
        Error::DependencyCycle { cycle } => {
            assert!(cycle.contains(&"a".to_string()));
            assert!(cycle.contains(&"b".to_string()));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_shared_dependency_is_unified() {
    let app = recipe("app", &["1.0"], &[], &[("left", ""), ("right", "")]);
    let left = recipe("left", &["1.0"], &[], &[("zlib+pic", "")]);
    let right = recipe("right", &["1.0"], &[], &[("zlib@1.2:+shared", "")]);
    let zlib = recipe(
        "zlib",
        &["1.1", "1.2.13", "1.3.1"],
        &[("pic", false), ("shared", false)],
        &[],
    );
    let registry = registry(&[&app, &left, &right, &zlib]);

    let spec = concretize(&registry, "app").unwrap();

    // One concrete zlib everywhere it appears
    let zlibs: Vec<String> = spec
        .nodes()
        .into_iter()
        .filter(|n| n.name == "zlib")
        .map(|n| n.node_string())
        .collect();
    assert_eq!(zlibs.len(), 2);
    assert_eq!(zlibs[0], zlibs[1]);
    assert_eq!(zlibs[0], "zlib@1.3.1+pic+shared");
}

#[test]
fn test_every_variant_is_assigned_and_valid() {
    let app = recipe("app", &["1.0"], &[("docs", false), ("mpi", true)], &[("lib+fast", "+mpi")]);
    let lib = recipe("lib", &["0.9", "1.0"], &[("fast", false), ("shared", true)], &[]);
    let registry = registry(&[&app, &lib]);

    let spec = concretize(&registry, "app").unwrap();
    for (name, node) in spec.unique_nodes() {
        let recipe = registry.lookup(name).unwrap();
        assert!(node.is_concrete());
        assert_eq!(node.variants.len(), recipe.variants.len());
        for def in &recipe.variants {
            let value = node.variants.get(&def.name).unwrap();
            assert!(def.coerce(value).is_ok());
        }
    }
    assert_eq!(
        spec.find("lib").unwrap().variants.get("fast"),
        Some(&VariantValue::Bool(true))
    );
}

#[test]
fn test_request_constrains_dependency() {
    let registry = feature_repo();
    let err = concretize(&registry, "pkg ^helper@3.0").unwrap_err();
    assert!(matches!(err, Error::NoSatisfyingVersion { ref package, .. } if package == "helper"));

    let err = concretize(&registry, "pkg~feature ^helper").unwrap_err();
    assert!(matches!(err, Error::UnusedConstraint(ref name) if name == "helper"));
}

#[test]
fn test_unknown_root() {
    let registry = feature_repo();
    assert!(matches!(
        concretize(&registry, "nothing").unwrap_err(),
        Error::UnknownPackage(ref name) if name == "nothing"
    ));
}

#[test]
fn test_deterministic() {
    let registry = feature_repo();
    let first = concretize(&registry, "pkg").unwrap();
    for _ in 0..5 {
        assert_eq!(concretize(&registry, "pkg").unwrap(), first);
    }
}
