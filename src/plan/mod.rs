// src/plan/mod.rs

//! Build plans: the deduplicated DAG of a concrete spec tree
//!
//! A concrete spec is a tree in which shared dependencies appear once per
//! path. The [`DagBuilder`] collapses it into an arena of [`BuildNode`]s, one
//! per identity key, with parents referring to children by [`NodeId`]. The
//! resulting [`BuildPlan`] carries a topological order (dependencies first)
//! that is deterministic: among nodes ready at the same time, the one with
//! the smaller package name, then identity key, comes first.

mod node;

pub use node::{BuildNode, BuildState, NodeId};

use crate::error::{Error, Result};
use crate::spec::{DepTypes, Spec};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct BuildPlan {
    nodes: Vec<BuildNode>,
    index: BTreeMap<String, NodeId>,
    order: Vec<NodeId>,
    root: NodeId,
}

impl BuildPlan {
    /// Build a plan from a concrete spec tree
    pub fn from_spec(spec: &Spec) -> Result<Self> {
        DagBuilder::new().build(spec)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &BuildNode {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut BuildNode {
        &mut self.nodes[id.0]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &BuildNode> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node ids, dependencies before dependents
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    /// Identity keys in build order
    pub fn order_keys(&self) -> Vec<&str> {
        self.order.iter().map(|id| self.node(*id).key.as_str()).collect()
    }

    /// Identity keys in sorted order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(String::as_str)
    }

    pub fn get(&self, key: &str) -> Option<NodeId> {
        self.index.get(key).copied()
    }

    /// First node in build order with the given package name
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.order.iter().copied().find(|id| self.node(*id).name() == name)
    }

    /// Direct dependencies with their types
    pub fn dependencies(&self, id: NodeId) -> impl Iterator<Item = (NodeId, &DepTypes)> {
        self.node(id).dependencies.iter().map(|(dep, types)| (*dep, types))
    }

    /// Nodes that directly depend on `id`
    pub fn dependents(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.node(id).dependents.iter().copied()
    }

    /// Every node that depends on `id`, directly or not
    pub fn transitive_dependents(&self, id: NodeId) -> BTreeSet<NodeId> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<NodeId> = self.dependents(id).collect();
        while let Some(next) = stack.pop() {
            if seen.insert(next) {
                stack.extend(self.dependents(next));
            }
        }
        seen
    }
}

impl fmt::Display for BuildPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (position, id) in self.order.iter().enumerate() {
            let node = self.node(*id);
            write!(f, "{:>3}. {}", position + 1, node)?;
            let deps: Vec<&str> = self.dependencies(*id).map(|(d, _)| self.node(d).name()).collect();
            if !deps.is_empty() {
                write!(f, "  <- {}", deps.join(", "))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Collapses spec trees into build plans
#[derive(Debug, Default)]
pub struct DagBuilder {
    nodes: Vec<BuildNode>,
    index: BTreeMap<String, NodeId>,
}

impl DagBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the plan for `spec`
    ///
    /// A node whose key was already seen is assumed to carry the same
    /// dependencies, so its subtree is not walked again.
    pub fn build(mut self, spec: &Spec) -> Result<BuildPlan> {
        let (root, _) = self.intern(spec);
        let mut pending = vec![(spec, root)];

        while let Some((parent_spec, parent)) = pending.pop() {
            for dep in &parent_spec.dependencies {
                let (child, is_new) = self.intern(&dep.spec);
                self.link(parent, child, &dep.types);
                if is_new {
                    pending.push((&dep.spec, child));
                }
            }
        }

        let order = self.topological_order()?;
        debug!("Planned {} nodes for {}", order.len(), spec.name);

        Ok(BuildPlan {
            nodes: self.nodes,
            index: self.index,
            order,
            root,
        })
    }

    fn intern(&mut self, spec: &Spec) -> (NodeId, bool) {
        let key = spec.identity_key();
        if let Some(id) = self.index.get(&key) {
            return (*id, false);
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(BuildNode::new(id, spec));
        self.index.insert(key, id);
        (id, true)
    }

    fn link(&mut self, parent: NodeId, child: NodeId, types: &DepTypes) {
        self.nodes[parent.0]
            .dependencies
            .entry(child)
            .and_modify(|t| t.merge(types))
            .or_insert_with(|| types.clone());
        self.nodes[child.0].dependents.insert(parent);
    }

    /// Kahn's algorithm with ties broken by (name, key)
    fn topological_order(&self) -> Result<Vec<NodeId>> {
        let mut remaining: Vec<usize> = self.nodes.iter().map(|n| n.dependencies.len()).collect();
        let sort_key = |id: NodeId| {
            let node = &self.nodes[id.0];
            (node.name().to_string(), node.key.clone(), id)
        };

        let mut ready: BTreeSet<(String, String, NodeId)> = self
            .nodes
            .iter()
            .filter(|n| n.dependencies.is_empty())
            .map(|n| sort_key(n.id))
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some((_, _, id)) = ready.pop_first() {
            order.push(id);
            for dependent in &self.nodes[id.0].dependents {
                let count = &mut remaining[dependent.0];
                *count -= 1;
                if *count == 0 {
                    ready.insert(sort_key(*dependent));
                }
            }
        }

        if order.len() < self.nodes.len() {
            let placed: BTreeSet<NodeId> = order.iter().copied().collect();
            return Err(Error::DependencyCycle {
                cycle: self.find_cycle(&placed),
            });
        }

        Ok(order)
    }

    /// Names along one cycle among nodes the sort could not place
    fn find_cycle(&self, placed: &BTreeSet<NodeId>) -> Vec<String> {
        let Some(start) = self.nodes.iter().map(|n| n.id).find(|id| !placed.contains(id)) else {
            return Vec::new();
        };

        let mut path = vec![start];
        let mut current = start;
        loop {
            // Unplaced nodes always have an unplaced dependency
            let Some(next) = self.nodes[current.0]
                .dependencies
                .keys()
                .copied()
                .find(|d| !placed.contains(d))
            else {
                break;
            };
            if let Some(pos) = path.iter().position(|p| *p == next) {
                let mut cycle: Vec<String> = path[pos..]
                    .iter()
                    .map(|id| self.nodes[id.0].name().to_string())
                    .collect();
                cycle.push(self.nodes[next.0].name().to_string());
                return cycle;
            }
            path.push(next);
            current = next;
        }

        path.iter().map(|id| self.nodes[id.0].name().to_string()).collect()
    }
}
