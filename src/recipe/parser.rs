// src/recipe/parser.rs

//! Recipe file parsing

use crate::error::{Error, Result};
use crate::recipe::format::{Condition, ConflictEntry, DependsEntry, RecipeFile, VariantEntry, VersionEntry};
use crate::recipe::package::{
    ConflictRule, DependencyRule, PackageRecipe, SourceRef, VersionDecl,
};
use crate::recipe::predicate::Predicate;
use crate::spec::{DepTypes, parse_nodes};
use crate::variant::{VariantDef, VariantKind, VariantValue};
use crate::version::Version;
use std::path::Path;

/// Parse a recipe from a TOML string
pub fn parse_recipe(content: &str) -> Result<PackageRecipe> {
    let file: RecipeFile =
        toml::from_str(content).map_err(|e| Error::ParseError(format!("Invalid recipe: {}", e)))?;
    let recipe = from_file(file)?;
    recipe.validate()?;
    Ok(recipe)
}

/// Parse a recipe from a file
pub fn parse_recipe_file(path: &Path) -> Result<PackageRecipe> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;

    parse_recipe(&content).map_err(|e| match e {
        Error::ParseError(msg) => Error::ParseError(format!("{}: {}", path.display(), msg)),
        other => other,
    })
}

fn from_file(file: RecipeFile) -> Result<PackageRecipe> {
    let name = file.package.name;
    let invalid = |reason: String| Error::InvalidRecipe {
        package: name.clone(),
        reason,
    };

    let mut recipe = PackageRecipe::new(name.clone());
    recipe.description = file.package.description;
    recipe.homepage = file.package.homepage;
    recipe.git = file.package.git;

    for entry in file.versions {
        recipe.versions.push(version_decl(entry).map_err(|e| invalid(e.to_string()))?);
    }

    for (variant, entry) in file.variants {
        recipe.variants.push(variant_def(variant, entry).map_err(invalid)?);
    }

    for entry in file.conflicts {
        let rule = match entry {
            ConflictEntry::Shorthand(spec) => ConflictRule::new(Predicate::parse(&spec)?),
            ConflictEntry::Detailed { spec, when, msg } => ConflictRule {
                spec: condition(&spec)?,
                when: when.as_ref().map(condition).transpose()?.unwrap_or(Predicate::Always),
                msg,
            },
        };
        recipe.conflicts.push(rule);
    }

    for entry in file.dependencies {
        recipe.dependencies.push(dependency_rule(entry).map_err(|e| invalid(e.to_string()))?);
    }

    recipe.build_steps = file.build.map(|b| b.steps).unwrap_or_default();
    recipe.build_env = file.build_env;
    recipe.run_env = file.run_env;

    Ok(recipe)
}

fn version_decl(entry: VersionEntry) -> Result<VersionDecl> {
    let source = match (entry.tag, entry.branch, entry.commit, entry.url) {
        (None, None, None, None) => None,
        (Some(tag), None, None, None) => Some(SourceRef::Tag(tag)),
        (None, Some(branch), None, None) => Some(SourceRef::Branch(branch)),
        (None, None, Some(commit), None) => Some(SourceRef::Commit(commit)),
        (None, None, None, Some(url)) => Some(SourceRef::Url(url)),
        _ => {
            return Err(Error::ParseError(format!(
                "version '{}' names more than one source",
                entry.version
            )));
        }
    };

    Ok(VersionDecl {
        version: Version::parse(&entry.version)?,
        source,
        preferred: entry.preferred,
        deprecated: entry.deprecated,
    })
}

fn variant_def(name: String, entry: VariantEntry) -> std::result::Result<VariantDef, String> {
    let (kind, default) = match entry.default {
        toml::Value::Boolean(b) => (VariantKind::Boolean, VariantValue::Bool(b)),
        toml::Value::String(s) => (VariantKind::Enum, VariantValue::Str(s)),
        other => {
            return Err(format!(
                "variant '{}' default must be a boolean or a string, got {}",
                name,
                other.type_str()
            ));
        }
    };

    // A string variant without a value list accepts only its default
    let mut values = entry.values;
    if kind == VariantKind::Enum && values.is_empty() {
        if let VariantValue::Str(s) = &default {
            values.push(s.clone());
        }
    }

    Ok(VariantDef {
        name,
        kind,
        default,
        values,
        description: entry.description,
    })
}

fn dependency_rule(entry: DependsEntry) -> Result<DependencyRule> {
    let mut nodes = parse_nodes(&entry.spec)?;
    if nodes.len() != 1 {
        return Err(Error::ParseError(format!(
            "dependency '{}' must name a single package",
            entry.spec
        )));
    }
    let node = nodes.remove(0);
    let target = node.name.ok_or_else(|| {
        Error::ParseError(format!("dependency '{}' has no package name", entry.spec))
    })?;

    let types = if entry.types.is_empty() {
        DepTypes::default()
    } else {
        entry.types.join(",").parse()?
    };

    Ok(DependencyRule {
        target,
        versions: node.versions,
        variants: node.variants,
        when: entry.when.as_ref().map(condition).transpose()?.unwrap_or(Predicate::Always),
        types,
    })
}

/// Turn a file condition into a predicate tree
fn condition(cond: &Condition) -> Result<Predicate> {
    Ok(match cond {
        Condition::Shorthand(s) => Predicate::parse(s)?,
        Condition::All { all } => {
            Predicate::conjunction(all.iter().map(condition).collect::<Result<Vec<_>>>()?)
        }
        Condition::Any { any } => Predicate::Or(any.iter().map(condition).collect::<Result<Vec<_>>>()?),
        Condition::Not { not } => Predicate::Not(Box::new(condition(not)?)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::DepType;
    use crate::variant::VariantMap;

    const RECIPE: &str = r#"
conflict = [
    "~static~shared",
    { spec = "+petsc", when = "~mpi", msg = "PETSc requires MPI" },
]

[package]
name = "solver"
description = "Sparse solver"

[[version]]
version = "develop"
branch = "master"
preferred = true

[[version]]
version = "1.0.1"
tag = "v1.0.1"

[variants.static]
default = true

[variants.shared]
default = false

[variants.mpi]
default = true

[variants.petsc]
default = false

[variants.timer]
default = "auto"
values = ["auto", "std", "mpi"]

[[depends]]
spec = "mpi"
when = "+mpi"

[[depends]]
spec = "hypre+int64@2.26.0"

[[depends]]
spec = "cmake"
type = ["build"]

[[depends]]
spec = "tfel@master:~python"
when = { any = ["@develop", "@1.0.1"] }
"#;

    #[test]
    fn test_parse_valid_recipe() {
        let recipe = parse_recipe(RECIPE).unwrap();
        assert_eq!(recipe.name, "solver");
        assert_eq!(recipe.versions.len(), 2);
        assert_eq!(
            recipe.versions[0].source,
            Some(SourceRef::Branch("master".to_string()))
        );
        assert_eq!(recipe.variants.len(), 5);
        assert_eq!(recipe.variant("timer").unwrap().kind, VariantKind::Enum);
        assert_eq!(recipe.conflicts.len(), 2);
        assert_eq!(recipe.conflicts[1].msg.as_deref(), Some("PETSc requires MPI"));
    }

    #[test]
    fn test_dependency_rules() {
        let recipe = parse_recipe(RECIPE).unwrap();
        let hypre = &recipe.dependencies[1];
        assert_eq!(hypre.target, "hypre");
        assert_eq!(hypre.requirement(), "hypre@2.26.0+int64");
        assert!(hypre.when.is_always());

        let cmake = &recipe.dependencies[2];
        assert!(cmake.types.contains(DepType::Build));
        assert!(!cmake.types.contains(DepType::Link));

        let tfel = &recipe.dependencies[3];
        let develop = Version::parse("develop").unwrap();
        assert!(tfel.when.evaluate(&develop, &VariantMap::new(), &crate::recipe::NoDependencies));
    }

    #[test]
    fn test_parse_invalid_recipe() {
        assert!(matches!(
            parse_recipe("this is not valid toml at all {}"),
            Err(Error::ParseError(_))
        ));
    }

    #[test]
    fn test_bad_variant_default() {
        let content = r#"
[package]
name = "bad"

[[version]]
version = "1.0"

[variants.level]
default = 3
"#;
        let err = parse_recipe(content).unwrap_err();
        assert!(matches!(err, Error::InvalidRecipe { .. }));
    }

    #[test]
    fn test_multi_target_dependency_rejected() {
        let content = r#"
[package]
name = "bad"

[[version]]
version = "1.0"

[[depends]]
spec = "mfem ^hypre"
"#;
        assert!(parse_recipe(content).is_err());
    }

    #[test]
    fn test_string_variant_without_values() {
        let content = r#"
[package]
name = "gpu"

[[version]]
version = "1.0"

[variants.cuda_arch]
default = "sm_60"
"#;
        let recipe = parse_recipe(content).unwrap();
        assert_eq!(recipe.variant("cuda_arch").unwrap().values, vec!["sm_60".to_string()]);
    }

    #[test]
    fn test_parse_recipe_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("solver.toml");
        std::fs::write(&path, RECIPE).unwrap();
        let recipe = parse_recipe_file(&path).unwrap();
        assert_eq!(recipe.name, "solver");

        let missing = parse_recipe_file(&dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(Error::IoError { .. })));
    }
}
