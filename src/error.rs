// src/error.rs

//! Error types shared across the crate
//!
//! Concretization errors carry the chain of rejected candidates so callers can
//! explain why a request could not be satisfied. Build command failures are
//! normally folded into a [`crate::build::BuildReport`] rather than returned.

use crate::concretizer::Rejection;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown package: {0}")]
    UnknownPackage(String),

    #[error("Recipe already registered: {0}")]
    DuplicateRecipe(String),

    #[error("Invalid recipe '{package}': {reason}")]
    InvalidRecipe { package: String, reason: String },

    #[error("Invalid value for variant '{variant}' of '{package}': {reason}")]
    InvalidVariantValue {
        package: String,
        variant: String,
        reason: String,
    },

    #[error("No candidate of '{package}' avoids its conflicts: {detail}")]
    UnsatisfiableConflict {
        package: String,
        detail: String,
        rejected: Vec<Rejection>,
    },

    #[error("Requirements on '{package}' cannot be unified: {detail}")]
    VariantUnification {
        package: String,
        detail: String,
        rejected: Vec<Rejection>,
    },

    #[error("No version of '{package}' satisfies {constraints}")]
    NoSatisfyingVersion {
        package: String,
        constraints: String,
        rejected: Vec<Rejection>,
    },

    #[error("Circular dependency: {}", cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    #[error("Request constrains '{0}' but nothing in the graph depends on it")]
    UnusedConstraint(String),

    #[error("Dependency '{dependency}' of '{package}' has no recorded install location")]
    MissingInstallLocation { package: String, dependency: String },

    #[error("Build of '{package}' failed with exit code {exit_code:?}")]
    BuildCommand {
        package: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Build of '{0}' was cancelled")]
    Cancelled(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoError {
            path: path.into(),
            source,
        }
    }

    /// Rejected candidates recorded before a concretization error surfaced
    pub fn rejected(&self) -> &[Rejection] {
        match self {
            Self::UnsatisfiableConflict { rejected, .. }
            | Self::VariantUnification { rejected, .. }
            | Self::NoSatisfyingVersion { rejected, .. } => rejected,
            _ => &[],
        }
    }

    /// Whether the concretizer may recover from this error by backtracking
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::UnsatisfiableConflict { .. }
                | Self::VariantUnification { .. }
                | Self::NoSatisfyingVersion { .. }
        )
    }
}
