// src/recipe/predicate.rs

//! Boolean conditions over a package's version and variants
//!
//! Conflicts and conditional dependencies are expressed as small expression
//! trees instead of code. Leaves test one variant value, the chosen version,
//! or the concrete state of a dependency; inner nodes combine them.
//!
//! The spec-string shorthand maps onto a conjunction:
//!
//! - `+petsc~mpi` is `petsc == true AND mpi == false`
//! - `@rliv-1.0` is `version in rliv-1.0`
//! - `^hypre+cuda` holds when the `hypre` dependency has `+cuda`

use crate::error::Result;
use crate::spec::parse_nodes;
use crate::variant::{VariantMap, VariantValue};
use crate::version::{Version, VersionConstraint};
use std::collections::BTreeSet;
use std::fmt;

/// Access to the concrete state of already decided packages
pub trait NodeLookup {
    fn node(&self, package: &str) -> Option<(&Version, &VariantMap)>;
}

/// Lookup for contexts where no dependency is known
pub struct NoDependencies;

impl NodeLookup for NoDependencies {
    fn node(&self, _package: &str) -> Option<(&Version, &VariantMap)> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Always,
    Variant { name: String, value: VariantValue },
    Version(VersionConstraint),
    /// Holds when `package` is a decided dependency satisfying `condition`
    Dependency {
        package: String,
        condition: Box<Predicate>,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// Parse spec-string shorthand; an empty string is `Always`
    pub fn parse(s: &str) -> Result<Self> {
        let mut nodes = parse_nodes(s)?.into_iter();
        let mut terms = Vec::new();

        if let Some(first) = nodes.next() {
            if let Some(name) = first.name {
                // A leading name refers to a dependency, like `^name`
                terms.push(Self::Dependency {
                    package: name,
                    condition: Box::new(Self::conjunction(node_terms(first.versions, first.variants))),
                });
            } else {
                terms.extend(node_terms(first.versions, first.variants));
            }
        }

        for node in nodes {
            let Some(package) = node.name else { continue };
            terms.push(Self::Dependency {
                package,
                condition: Box::new(Self::conjunction(node_terms(node.versions, node.variants))),
            });
        }

        Ok(Self::conjunction(terms))
    }

    /// Conjunction of terms, collapsed when trivial
    pub fn conjunction(mut terms: Vec<Predicate>) -> Self {
        terms.retain(|t| *t != Self::Always);
        match terms.len() {
            0 => Self::Always,
            1 => terms.remove(0),
            _ => Self::And(terms),
        }
    }

    pub fn is_always(&self) -> bool {
        matches!(self, Self::Always)
    }

    /// Evaluate against a node's version and variants
    ///
    /// Dependency leaves consult `deps`; an absent dependency makes the leaf false.
    pub fn evaluate(&self, version: &Version, variants: &VariantMap, deps: &dyn NodeLookup) -> bool {
        match self {
            Self::Always => true,
            Self::Variant { name, value } => variants.get(name) == Some(value),
            Self::Version(constraint) => constraint.satisfies(version),
            Self::Dependency { package, condition } => match deps.node(package) {
                Some((dep_version, dep_variants)) => {
                    condition.evaluate(dep_version, dep_variants, &NoDependencies)
                }
                None => false,
            },
            Self::And(terms) => terms.iter().all(|t| t.evaluate(version, variants, deps)),
            Self::Or(terms) => terms.iter().any(|t| t.evaluate(version, variants, deps)),
            Self::Not(inner) => !inner.evaluate(version, variants, deps),
        }
    }

    /// Variant names tested on the node itself
    pub fn own_variants(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.walk(&mut |p| {
            if let Self::Variant { name, .. } = p {
                out.insert(name.as_str());
            }
        });
        out
    }

    /// Packages whose concrete state this predicate inspects
    pub fn referenced_packages(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.walk(&mut |p| {
            if let Self::Dependency { package, .. } = p {
                out.insert(package.as_str());
            }
        });
        out
    }

    /// Visit every node except the insides of dependency leaves
    fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Predicate)) {
        visit(self);
        match self {
            Self::And(terms) | Self::Or(terms) => {
                for t in terms {
                    t.walk(visit);
                }
            }
            Self::Not(inner) => inner.walk(visit),
            _ => {}
        }
    }
}

fn node_terms(versions: VersionConstraint, variants: VariantMap) -> Vec<Predicate> {
    let mut terms = Vec::new();
    if !versions.is_any() {
        terms.push(Predicate::Version(versions));
    }
    for (name, value) in variants.iter() {
        terms.push(Predicate::Variant {
            name: name.clone(),
            value: value.clone(),
        });
    }
    terms
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => f.write_str("always"),
            Self::Variant {
                name,
                value: VariantValue::Bool(true),
            } => write!(f, "+{}", name),
            Self::Variant {
                name,
                value: VariantValue::Bool(false),
            } => write!(f, "~{}", name),
            Self::Variant {
                name,
                value: VariantValue::Str(s),
            } => write!(f, "{}={}", name, s),
            Self::Version(c) => write!(f, "@{}", c),
            Self::Dependency { package, condition } => {
                if condition.is_always() {
                    write!(f, "^{}", package)
                } else {
                    write!(f, "^{}({})", package, condition)
                }
            }
            Self::And(terms) => {
                let parts: Vec<String> = terms.iter().map(|t| t.to_string()).collect();
                f.write_str(&parts.join(" and "))
            }
            Self::Or(terms) => {
                let parts: Vec<String> = terms.iter().map(|t| format!("({})", t)).collect();
                f.write_str(&parts.join(" or "))
            }
            Self::Not(inner) => write!(f, "not ({})", inner),
        }
    }
}
