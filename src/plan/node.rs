// src/plan/node.rs

//! Nodes of a build plan

use crate::spec::{DepTypes, Spec};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use strum_macros::Display;

/// Index of a node in its plan's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a node during a build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BuildState {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl BuildState {
    /// Whether the node will not change state again
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Skipped)
    }
}

/// One concrete package to build
#[derive(Debug, Clone)]
pub struct BuildNode {
    pub id: NodeId,
    /// The concrete spec of this node alone, without its dependency tree
    pub spec: Spec,
    pub key: String,
    pub hash: String,
    pub(crate) dependencies: BTreeMap<NodeId, DepTypes>,
    pub(crate) dependents: BTreeSet<NodeId>,
    pub state: BuildState,
    /// Install prefix, set once the node is dispatched
    pub prefix: Option<PathBuf>,
}

impl BuildNode {
    pub(crate) fn new(id: NodeId, spec: &Spec) -> Self {
        let mut node_spec = spec.clone();
        node_spec.dependencies.clear();
        Self {
            id,
            key: node_spec.identity_key(),
            hash: node_spec.short_hash(),
            spec: node_spec,
            dependencies: BTreeMap::new(),
            dependents: BTreeSet::new(),
            state: BuildState::Pending,
            prefix: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Version text of the concrete spec
    pub fn version(&self) -> String {
        self.spec
            .version
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_else(|| self.spec.versions.to_string())
    }

    /// Directory name used under install and stage roots
    pub fn dir_name(&self) -> String {
        format!("{}-{}-{}", self.name(), self.version(), self.hash)
    }
}

impl fmt::Display for BuildNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.key, self.hash)
    }
}
