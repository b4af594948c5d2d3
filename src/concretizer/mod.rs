// src/concretizer/mod.rs

//! Concretizer: turns an abstract request into a concrete spec tree
//!
//! The search decides one package at a time, breadth first from the root.
//! Each decision is a frame on an explicit stack holding the package's
//! ordered candidates, the next candidate to try, and a snapshot of the
//! search state taken before the package was decided. Rejecting a candidate
//! restores the snapshot and tries the next one; an exhausted frame is popped
//! and its predecessor moves on.
//!
//! Candidates are ordered preferred first, then newest, deprecated last. Each
//! candidate carries the recipe defaults overridden by every inbound variant
//! requirement.
//!
//! All requirements on one package must agree. When a requirement arrives
//! for a package that was already decided with a different value, the search
//! learns a hint (the demanded variant value or version range) and jumps back
//! to that package's frame, where the hint now steers candidate generation.
//! Hints only reorder choices: a hinted variant assignment is tried before
//! the plain one, which remains a fallback, so a hint learned on an abandoned
//! branch never removes a candidate. At most one hint is learned per package
//! variant and per package version, so the search terminates.

mod cache;
mod diagnostics;

pub use cache::ConcreteCache;
pub use diagnostics::{RejectReason, Rejection, explain};

use crate::error::{Error, Result};
use crate::recipe::{NoDependencies, NodeLookup, PackageRecipe, RecipeRegistry, VersionDecl};
use crate::spec::{DepTypes, Dependency, Spec};
use crate::variant::{VariantMap, VariantValue};
use crate::version::{Version, VersionConstraint};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, info};

/// Source label for requirements written by the user
const REQUEST: &str = "request";

/// A constraint placed on a package by a dependent or by the request
#[derive(Debug, Clone)]
struct Requirement {
    versions: VersionConstraint,
    variants: VariantMap,
    source: String,
}

impl Requirement {
    fn describe(&self, package: &str) -> String {
        let mut out = package.to_string();
        if !self.versions.is_any() {
            out.push_str(&format!("@{}", self.versions));
        }
        out.push_str(&self.variants.to_string());
        format!("{} (from {})", out, self.source)
    }
}

/// A decided version and complete variant assignment
#[derive(Debug, Clone)]
struct Assignment {
    version: Version,
    variants: VariantMap,
}

#[derive(Debug, Clone, Default)]
struct SearchState {
    decided: BTreeMap<String, Assignment>,
    requirements: BTreeMap<String, Vec<Requirement>>,
    /// Packages waiting to be decided, in discovery order
    agenda: VecDeque<String>,
    /// parent -> child -> dependency types
    edges: BTreeMap<String, BTreeMap<String, DepTypes>>,
    /// Conflict rules (package, rule index) waiting on dependency state
    deferred: Vec<(String, usize)>,
}

impl NodeLookup for SearchState {
    fn node(&self, package: &str) -> Option<(&Version, &VariantMap)> {
        self.decided.get(package).map(|a| (&a.version, &a.variants))
    }
}

struct Frame {
    package: String,
    candidates: Vec<Assignment>,
    next: usize,
    snapshot: SearchState,
}

#[derive(Debug, Default)]
struct Hints {
    variants: BTreeMap<(String, String), VariantValue>,
    versions: BTreeMap<String, VersionConstraint>,
}

enum Failure {
    /// Drop the current candidate
    Reject(Rejection),
    /// A hint was learned for `package`; restart its frame
    Backjump { package: String, rejection: Rejection },
    Fatal(Error),
}

impl From<Error> for Failure {
    fn from(e: Error) -> Self {
        Self::Fatal(e)
    }
}

/// Concretizes requests against a recipe registry
pub struct Concretizer<'a> {
    registry: &'a RecipeRegistry,
    cache: Option<ConcreteCache>,
}

impl<'a> Concretizer<'a> {
    pub fn new(registry: &'a RecipeRegistry) -> Self {
        Self {
            registry,
            cache: None,
        }
    }

    /// Consult and fill `cache` on every call
    pub fn with_cache(mut self, cache: ConcreteCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache(&self) -> Option<&ConcreteCache> {
        self.cache.as_ref()
    }

    pub fn into_cache(self) -> Option<ConcreteCache> {
        self.cache
    }

    /// Resolve `request` into a tree of concrete specs
    pub fn concretize(&mut self, request: &Spec) -> Result<Spec> {
        let key = request.to_string();
        if let Some(hit) = self.cache.as_ref().and_then(|c| c.get(&key)) {
            debug!("Using cached concretization for {}", key);
            return Ok(hit.clone());
        }

        info!("Concretizing {}", key);
        let spec = Search::new(self.registry, &request.name).run(request)?;
        info!(
            "Concretized {} into {} packages",
            key,
            spec.unique_nodes().len()
        );

        if let Some(cache) = &mut self.cache {
            cache.insert(key, spec.clone());
        }
        Ok(spec)
    }
}

/// One run of the backtracking search
struct Search<'a> {
    registry: &'a RecipeRegistry,
    root: String,
    hints: Hints,
    rejected: Vec<Rejection>,
}

impl<'a> Search<'a> {
    fn new(registry: &'a RecipeRegistry, root: &str) -> Self {
        Self {
            registry,
            root: root.to_string(),
            hints: Hints::default(),
            rejected: Vec::new(),
        }
    }

    fn run(mut self, request: &Spec) -> Result<Spec> {
        let mut state = SearchState::default();

        let root_recipe = self.registry.lookup(&request.name)?;
        state.requirements.entry(request.name.clone()).or_default().push(Requirement {
            versions: request.versions.clone(),
            variants: coerce_variants(root_recipe, &request.variants)?,
            source: REQUEST.to_string(),
        });

        // `^dep` constraints apply once something depends on `dep`
        let mut constrained = Vec::new();
        for dep in &request.dependencies {
            let recipe = self.registry.lookup(&dep.spec.name)?;
            state.requirements.entry(dep.spec.name.clone()).or_default().push(Requirement {
                versions: dep.spec.versions.clone(),
                variants: coerce_variants(recipe, &dep.spec.variants)?,
                source: REQUEST.to_string(),
            });
            constrained.push(dep.spec.name.clone());
        }

        state.agenda.push_back(request.name.clone());
        let mut stack: Vec<Frame> = Vec::new();

        loop {
            if let Some(package) = state.agenda.pop_front() {
                if state.decided.contains_key(&package) {
                    continue;
                }
                let candidates = self.candidates(&package, &state)?;
                debug!("Deciding {} ({} candidates)", package, candidates.len());
                stack.push(Frame {
                    package,
                    candidates,
                    next: 0,
                    snapshot: state.clone(),
                });
                self.advance(&mut stack, &mut state)?;
                continue;
            }

            // Everything decided; rules on absent dependencies can now be settled
            if let Some(rejection) = self.check_deferred(&mut state, true) {
                debug!("Rejected {}", rejection);
                self.rejected.push(rejection);
                self.advance(&mut stack, &mut state)?;
                continue;
            }
            break;
        }

        for name in constrained {
            if !state.decided.contains_key(&name) {
                return Err(Error::UnusedConstraint(name));
            }
        }

        let mut built = BTreeMap::new();
        Ok(build_tree(&self.root, &state, &mut built))
    }

    /// Try candidates from the top of the stack until one is accepted
    fn advance(&mut self, stack: &mut Vec<Frame>, state: &mut SearchState) -> Result<()> {
        loop {
            let Some(frame) = stack.last_mut() else {
                let rejected = std::mem::take(&mut self.rejected);
                return Err(diagnostics::exhaustion_error(&self.root, rejected));
            };

            if frame.next >= frame.candidates.len() {
                debug!("No candidate of {} remains, backtracking", frame.package);
                stack.pop();
                continue;
            }

            let candidate = frame.candidates[frame.next].clone();
            frame.next += 1;
            *state = frame.snapshot.clone();
            let package = frame.package.clone();

            match self.try_candidate(&package, &candidate, state) {
                Ok(()) => {
                    debug!("Chose {}@{}{}", package, candidate.version, candidate.variants);
                    return Ok(());
                }
                Err(Failure::Reject(rejection)) => {
                    debug!("Rejected {}", rejection);
                    self.rejected.push(rejection);
                }
                Err(Failure::Backjump { package: target, rejection }) => {
                    debug!("Rejected {}; revisiting {}", rejection, target);
                    self.rejected.push(rejection);

                    // Every decided package owns a frame below the current one
                    let Some(index) = stack.iter().position(|f| f.package == target) else {
                        continue;
                    };
                    stack.truncate(index + 1);
                    let frame = &mut stack[index];
                    frame.candidates = self.candidates(&frame.package, &frame.snapshot)?;
                    frame.next = 0;
                }
                Err(Failure::Fatal(e)) => return Err(e),
            }
        }
    }

    fn try_candidate(
        &mut self,
        package: &str,
        candidate: &Assignment,
        state: &mut SearchState,
    ) -> std::result::Result<(), Failure> {
        let registry = self.registry;
        let recipe = registry.lookup(package)?;
        let version = &candidate.version;
        let variants = &candidate.variants;

        for (index, rule) in recipe.conflicts.iter().enumerate() {
            let inspects_deps = !rule.spec.referenced_packages().is_empty()
                || !rule.when.referenced_packages().is_empty();
            if inspects_deps {
                state.deferred.push((package.to_string(), index));
            } else if rule.spec.evaluate(version, variants, &NoDependencies)
                && rule.when.evaluate(version, variants, &NoDependencies)
            {
                return Err(Failure::Reject(Rejection::new(
                    package,
                    Some(version),
                    RejectReason::Conflict,
                    rule.describe(),
                )));
            }
        }

        state.decided.insert(package.to_string(), candidate.clone());

        let source = format!("{}@{}", package, version);
        for rule in &recipe.dependencies {
            if !rule.when.evaluate(version, variants, &NoDependencies) {
                continue;
            }

            let target = registry.lookup(&rule.target)?;
            let requirement = Requirement {
                versions: rule.versions.clone(),
                variants: coerce_variants(target, &rule.variants)?,
                source: source.clone(),
            };

            add_edge(state, package, &rule.target, &rule.types)?;
            self.require(package, version, &rule.target, requirement, state)?;
        }

        if let Some(rejection) = self.check_deferred(state, false) {
            return Err(Failure::Reject(rejection));
        }

        Ok(())
    }

    /// Record a requirement of `package@version` on `target`
    fn require(
        &mut self,
        package: &str,
        version: &Version,
        target: &str,
        requirement: Requirement,
        state: &mut SearchState,
    ) -> std::result::Result<(), Failure> {
        let reject = |detail: String| {
            Rejection::new(
                package,
                Some(version),
                RejectReason::Unification {
                    target: target.to_string(),
                },
                detail,
            )
        };

        if let Some(assigned) = state.decided.get(target) {
            let version_ok = requirement.versions.satisfies(&assigned.version);
            let mismatched: Vec<(&String, &VariantValue)> = requirement
                .variants
                .iter()
                .filter(|(name, value)| assigned.variants.get(name) != Some(*value))
                .collect();

            if version_ok && mismatched.is_empty() {
                return Ok(());
            }

            let rejection = reject(format!(
                "{} is required, but {}@{}{} was already chosen",
                requirement.describe(target),
                target,
                assigned.version,
                assigned.variants
            ));

            let mut learned = false;
            for (name, value) in mismatched {
                let key = (target.to_string(), name.clone());
                if !self.hints.variants.contains_key(&key) {
                    self.hints.variants.insert(key, value.clone());
                    learned = true;
                }
            }
            if !version_ok && !self.hints.versions.contains_key(target) {
                self.hints
                    .versions
                    .insert(target.to_string(), requirement.versions.clone());
                learned = true;
            }

            return Err(if learned {
                Failure::Backjump {
                    package: target.to_string(),
                    rejection,
                }
            } else {
                Failure::Reject(rejection)
            });
        }

        let existing = state.requirements.entry(target.to_string()).or_default();

        let mut allowed = requirement.versions.clone();
        for other in existing.iter() {
            match allowed.intersect(&other.versions) {
                Some(narrowed) => allowed = narrowed,
                None => {
                    return Err(Failure::Reject(Rejection::new(
                        target,
                        None,
                        RejectReason::NoVersion,
                        format!("{} and {}", requirement.describe(target), other.describe(target)),
                    )));
                }
            }
        }

        for other in existing.iter() {
            for (name, value) in requirement.variants.iter() {
                if let Some(theirs) = other.variants.get(name) {
                    if theirs != value {
                        return Err(Failure::Reject(reject(format!(
                            "{} disagrees with {} on variant '{}'",
                            requirement.describe(target),
                            other.describe(target),
                            name
                        ))));
                    }
                }
            }
        }

        existing.push(requirement);
        if !state.agenda.iter().any(|p| p == target) {
            state.agenda.push_back(target.to_string());
        }
        Ok(())
    }

    /// Evaluate deferred conflict rules whose dependencies are all decided
    ///
    /// With `settle_all`, undecided dependencies count as absent.
    fn check_deferred(&self, state: &mut SearchState, settle_all: bool) -> Option<Rejection> {
        let pending = std::mem::take(&mut state.deferred);
        let mut remaining = Vec::new();

        for (package, index) in pending {
            let Some(rule) = self
                .registry
                .lookup(&package)
                .ok()
                .and_then(|r| r.conflicts.get(index))
            else {
                continue;
            };
            let Some(assigned) = state.decided.get(&package) else {
                continue;
            };

            let ready = settle_all
                || rule
                    .spec
                    .referenced_packages()
                    .union(&rule.when.referenced_packages())
                    .all(|dep| state.decided.contains_key(*dep));
            if !ready {
                remaining.push((package, index));
                continue;
            }

            let lookup: &SearchState = state;
            if rule.spec.evaluate(&assigned.version, &assigned.variants, lookup)
                && rule.when.evaluate(&assigned.version, &assigned.variants, lookup)
            {
                return Some(Rejection::new(
                    &package,
                    Some(&assigned.version),
                    RejectReason::Conflict,
                    rule.describe(),
                ));
            }
        }

        state.deferred = remaining;
        None
    }

    /// Ordered candidates for `package` under the current requirements and hints
    fn candidates(&mut self, package: &str, state: &SearchState) -> Result<Vec<Assignment>> {
        let registry = self.registry;
        let recipe = registry.lookup(package)?;
        let requirements = state
            .requirements
            .get(package)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let mut allowed = Some(VersionConstraint::any());
        for r in requirements {
            allowed = allowed.and_then(|a| a.intersect(&r.versions));
        }
        let sources = requirements
            .iter()
            .map(|r| r.describe(package))
            .collect::<Vec<_>>()
            .join(", ");
        let Some(allowed) = allowed else {
            self.rejected.push(Rejection::new(
                package,
                None,
                RejectReason::NoVersion,
                sources.clone(),
            ));
            return Ok(Vec::new());
        };

        let explicit: BTreeSet<&str> = requirements
            .iter()
            .flat_map(|r| r.variants.iter().map(|(name, _)| name.as_str()))
            .collect();

        let mut variants = recipe.default_variants();
        for r in requirements {
            for (name, value) in r.variants.iter() {
                variants.insert(name.clone(), value.clone());
            }
        }

        // Hinted values are tried first; the plain assignment stays as a fallback
        let mut hinted = variants.clone();
        for ((target, name), value) in &self.hints.variants {
            if target == package && !explicit.contains(name.as_str()) && recipe.variant(name).is_some() {
                hinted.insert(name.clone(), value.clone());
            }
        }
        let assignments = if hinted == variants {
            vec![variants]
        } else {
            vec![hinted, variants]
        };

        let hint = self.hints.versions.get(package);
        let mut decls: Vec<&VersionDecl> = recipe
            .versions
            .iter()
            .filter(|d| allowed.satisfies(&d.version))
            .collect();
        decls.sort_by(|a, b| {
            let rank = |d: &VersionDecl| {
                (
                    hint.is_some_and(|h| !h.satisfies(&d.version)),
                    d.deprecated,
                    !d.preferred,
                )
            };
            rank(*a).cmp(&rank(*b)).then_with(|| b.version.cmp(&a.version))
        });

        if decls.is_empty() {
            let constraints = if sources.is_empty() {
                allowed.to_string()
            } else {
                sources
            };
            self.rejected.push(Rejection::new(
                package,
                None,
                RejectReason::NoVersion,
                constraints,
            ));
        }

        Ok(decls
            .into_iter()
            .flat_map(|d| {
                assignments.iter().map(move |variants| Assignment {
                    version: d.version.clone(),
                    variants: variants.clone(),
                })
            })
            .collect())
    }
}

/// Validate requested variant values against a recipe
fn coerce_variants(recipe: &PackageRecipe, requested: &VariantMap) -> Result<VariantMap> {
    let mut out = VariantMap::new();
    for (name, value) in requested.iter() {
        let def = recipe.variant(name).ok_or_else(|| Error::InvalidVariantValue {
            package: recipe.name.clone(),
            variant: name.clone(),
            reason: "no such variant".to_string(),
        })?;
        let value = def.coerce(value).map_err(|reason| Error::InvalidVariantValue {
            package: recipe.name.clone(),
            variant: name.clone(),
            reason,
        })?;
        out.insert(name.clone(), value);
    }
    Ok(out)
}

/// Add `parent -> child`, failing if it closes a cycle
fn add_edge(state: &mut SearchState, parent: &str, child: &str, types: &DepTypes) -> Result<()> {
    if let Some(path) = find_path(&state.edges, child, parent) {
        let mut cycle = vec![parent.to_string()];
        cycle.extend(path);
        return Err(Error::DependencyCycle { cycle });
    }

    state
        .edges
        .entry(parent.to_string())
        .or_default()
        .entry(child.to_string())
        .and_modify(|t| t.merge(types))
        .or_insert_with(|| types.clone());
    Ok(())
}

/// Path `from -> ... -> to` along existing edges
fn find_path(
    edges: &BTreeMap<String, BTreeMap<String, DepTypes>>,
    from: &str,
    to: &str,
) -> Option<Vec<String>> {
    let mut came_from: BTreeMap<&str, &str> = BTreeMap::new();
    let mut queue = VecDeque::from([from]);
    let mut seen = BTreeSet::from([from]);

    while let Some(node) = queue.pop_front() {
        if node == to {
            let mut path = vec![node.to_string()];
            let mut current = node;
            while let Some(prev) = came_from.get(current) {
                path.push(prev.to_string());
                current = prev;
            }
            path.reverse();
            return Some(path);
        }
        if let Some(children) = edges.get(node) {
            for child in children.keys() {
                if seen.insert(child.as_str()) {
                    came_from.insert(child.as_str(), node);
                    queue.push_back(child.as_str());
                }
            }
        }
    }
    None
}

fn build_tree(name: &str, state: &SearchState, built: &mut BTreeMap<String, Spec>) -> Spec {
    if let Some(done) = built.get(name) {
        return done.clone();
    }

    let mut spec = match state.decided.get(name) {
        Some(a) => Spec::concrete(name, a.version.clone(), a.variants.clone()),
        None => Spec::new(name),
    };
    if let Some(children) = state.edges.get(name) {
        for (child, types) in children {
            spec.dependencies.push(Dependency {
                spec: build_tree(child, state, built),
                types: types.clone(),
            });
        }
    }

    built.insert(name.to_string(), spec.clone());
    spec
}
