// src/build/report.rs

//! Build reports

use crate::plan::{BuildPlan, BuildState, NodeId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Outcome of one node
#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub id: NodeId,
    pub name: String,
    pub key: String,
    pub state: BuildState,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Option<Duration>,
    pub prefix: Option<PathBuf>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl NodeReport {
    pub(crate) fn new(plan: &BuildPlan, id: NodeId) -> Self {
        let node = plan.node(id);
        Self {
            id,
            name: node.name().to_string(),
            key: node.key.clone(),
            state: node.state,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration: None,
            prefix: node.prefix.clone(),
            error: None,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Outcome of a whole build, nodes listed in build order
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub nodes: Vec<NodeReport>,
    pub dry_run: bool,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BuildReport {
    /// A dry run always succeeds; otherwise every node must have built
    pub fn success(&self) -> bool {
        self.dry_run || self.nodes.iter().all(|n| n.state == BuildState::Success)
    }

    pub fn node(&self, name: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn count(&self, state: BuildState) -> usize {
        self.nodes.iter().filter(|n| n.state == state).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &NodeReport> {
        self.nodes.iter().filter(|n| n.state == BuildState::Failed)
    }

    /// Keys in the order they were planned
    pub fn order(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.key.as_str()).collect()
    }

    pub fn elapsed(&self) -> Duration {
        (self.finished_at - self.started_at).to_std().unwrap_or_default()
    }
}

impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dry_run {
            writeln!(f, "Dry run: {} packages would be built", self.nodes.len())?;
            for (position, node) in self.nodes.iter().enumerate() {
                writeln!(f, "{:>3}. {}", position + 1, node.key)?;
            }
            return Ok(());
        }

        for node in &self.nodes {
            write!(f, "{:<8} {}", node.state.to_string(), node.key)?;
            if let Some(duration) = node.duration {
                write!(f, " ({:.1}s)", duration.as_secs_f64())?;
            }
            if let Some(error) = &node.error {
                write!(f, ": {}", error)?;
            }
            writeln!(f)?;
        }

        writeln!(
            f,
            "{} built, {} failed, {} skipped in {:.1}s",
            self.count(BuildState::Success),
            self.count(BuildState::Failed),
            self.count(BuildState::Skipped),
            self.elapsed().as_secs_f64()
        )
    }
}
