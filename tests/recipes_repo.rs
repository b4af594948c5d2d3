// tests/recipes_repo.rs

//! The bundled recipe repository, centred on mfem-mgis.

mod common;

use common::{build_options, concretize, sample_registry};
use kiln::build::{BuildInvocation, CommandOutput, Environment};
use kiln::{BuildCommand, CancellationToken, DepType, Error, Scheduler, Spec, VariantValue};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

fn version(spec: &Spec, name: &str) -> String {
    spec.find(name)
        .and_then(|s| s.version.as_ref())
        .map(|v| v.to_string())
        .unwrap_or_default()
}

fn flag(spec: &Spec, name: &str, variant: &str) -> Option<bool> {
    spec.find(name)?.variants.get(variant)?.as_bool()
}

/// Records the environment each package was built with
#[derive(Default)]
struct Recorder {
    envs: Mutex<BTreeMap<String, Environment>>,
}

impl BuildCommand for Recorder {
    fn run(&self, invocation: &BuildInvocation, _cancel: &CancellationToken) -> kiln::Result<CommandOutput> {
        let mut envs = self.envs.lock().unwrap();
        envs.insert(invocation.spec.name.clone(), invocation.env.clone());
        Ok(CommandOutput::ok())
    }
}

#[test]
fn test_repository_loads() {
    let registry = sample_registry();
    assert_eq!(registry.len(), 18);

    let recipe = registry.lookup("mfem-mgis").unwrap();
    assert_eq!(recipe.versions.len(), 3);
    assert!(recipe.versions[0].preferred);
    assert_eq!(recipe.variants.len(), 29);
    assert_eq!(recipe.conflicts.len(), 3);
    assert_eq!(
        recipe.variant("timer").unwrap().values,
        vec!["auto", "std", "posix", "mac", "mpi"]
    );
}

#[test]
fn test_every_recipe_concretizes_with_defaults() {
    let registry = sample_registry();
    for name in registry.names() {
        let spec = concretize(&registry, name).unwrap_or_else(|e| panic!("{}: {}", name, e));
        assert!(spec.nodes().iter().all(|n| n.is_concrete()));
    }
}

#[test]
fn test_default_mfem_mgis() {
    let registry = sample_registry();
    let spec = concretize(&registry, "mfem-mgis").unwrap();

    assert_eq!(version(&spec, "mfem-mgis"), "develop");
    assert_eq!(version(&spec, "hypre"), "2.26.0");
    assert_eq!(flag(&spec, "hypre", "int64"), Some(true));
    assert_eq!(flag(&spec, "metis", "int64"), Some(true));

    assert_eq!(version(&spec, "mfem"), "4.7.0");
    for variant in ["miniapps", "mpi", "suite-sparse", "mumps"] {
        assert_eq!(flag(&spec, "mfem", variant), Some(true), "mfem+{}", variant);
    }
    assert_eq!(flag(&spec, "mfem", "petsc"), Some(false));

    assert_eq!(version(&spec, "tfel"), "master");
    assert_eq!(flag(&spec, "tfel", "python"), Some(false));
    assert_eq!(flag(&spec, "tfel", "python_bindings"), Some(false));
    assert_eq!(version(&spec, "mgis"), "master");
    assert_eq!(flag(&spec, "mgis", "c"), Some(true));
    assert_eq!(flag(&spec, "mgis", "fortran"), Some(false));
    assert_eq!(version(&spec, "mpi"), "4.1.6");

    assert!(spec.find("python").is_none());
    assert!(spec.find("petsc").is_none());
    assert_eq!(spec.unique_nodes().len(), 13);

    let cmake = spec.dependency("cmake").unwrap();
    assert!(cmake.types.contains(DepType::Build));
    assert!(!cmake.types.contains(DepType::Link));
    assert_eq!(
        spec.variants.get("timer"),
        Some(&VariantValue::Str("auto".to_string()))
    );
}

#[test]
fn test_release_line_pins_older_stack() {
    let registry = sample_registry();
    let spec = concretize(&registry, "mfem-mgis@rliv-1.0").unwrap();
    assert_eq!(version(&spec, "mgis"), "2.2");
    assert_eq!(version(&spec, "tfel"), "4.2.0");

    let tagged = concretize(&registry, "mfem-mgis@1.0.1").unwrap();
    assert!(tagged.find("tfel").is_none());
    assert!(tagged.find("mgis").is_none());
}

#[test]
fn test_recipe_conflicts() {
    let registry = sample_registry();

    let err = concretize(&registry, "mfem-mgis~static~shared").unwrap_err();
    assert!(matches!(err, Error::UnsatisfiableConflict { ref package, .. } if package == "mfem-mgis"));

    let err = concretize(&registry, "mfem-mgis+petsc~mpi").unwrap_err();
    match err {
        Error::UnsatisfiableConflict { detail, .. } => assert!(detail.contains("requires MPI")),
        other => panic!("unexpected error: {other}"),
    }

    assert!(matches!(
        concretize(&registry, "mfem-mgis cuda_arch=sm_35").unwrap_err(),
        Error::InvalidVariantValue { .. }
    ));
}

#[test]
fn test_optional_features_pull_dependencies() {
    let registry = sample_registry();
    let spec = concretize(&registry, "mfem-mgis+petsc").unwrap();

    assert_eq!(flag(&spec, "mfem", "petsc"), Some(true));
    assert_eq!(flag(&spec, "petsc", "hypre"), Some(true));
    assert_eq!(flag(&spec, "petsc", "hdf5"), Some(false));
    // petsc needs python to build
    assert!(spec.find("python").is_some());
}

#[test]
fn test_plan_and_environment() {
    let registry = Arc::new(sample_registry());
    let spec = concretize(&registry, "mfem-mgis").unwrap();
    let mut plan = kiln::plan(&spec).unwrap();
    assert_eq!(plan.len(), 13);
    assert_eq!(plan.order_keys().last().map(|k| k.starts_with("mfem-mgis@develop")), Some(true));

    let recorder = Arc::new(Recorder::default());
    let dir = tempfile::tempdir().unwrap();
    let report = Scheduler::new(Arc::clone(&registry), recorder.clone())
        .execute(&mut plan, &build_options(dir.path(), 4))
        .unwrap();
    assert!(report.success(), "{}", report);

    let envs = recorder.envs.lock().unwrap();
    let env = &envs["mfem-mgis"];
    let prefix_of = |name: &str| {
        report
            .node(name)
            .and_then(|n| n.prefix.as_ref())
            .map(|p| p.display().to_string())
            .unwrap()
    };

    assert_eq!(env["HYPRE_DIR"], prefix_of("hypre"));
    assert_eq!(env["TFEL_DIR"], format!("{}/share/tfel/cmake", prefix_of("tfel")));
    assert_eq!(env["MFEM_DIR"], prefix_of("mfem"));
    assert_eq!(env["MPI_HOME"], prefix_of("mpi"));
    assert!(env["PATH"].starts_with(&format!("{}/bin", prefix_of("cmake"))));
    assert!(!env.contains_key("MFEMMGIS_DIR"));
    assert_eq!(env["KILN_PACKAGE"], "mfem-mgis");
}
