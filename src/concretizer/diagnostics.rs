// src/concretizer/diagnostics.rs

//! Rejected candidates and the errors built from them

use crate::error::Error;
use crate::version::Version;
use std::fmt;

/// Why a candidate was dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// A conflict rule held
    Conflict,
    /// A requirement on `target` disagreed with another one
    Unification { target: String },
    /// No declared version satisfied the requirements
    NoVersion,
}

/// One rejected candidate, in the order the search rejected them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub package: String,
    pub version: Option<Version>,
    pub reason: RejectReason,
    pub detail: String,
}

impl Rejection {
    pub fn new(
        package: impl Into<String>,
        version: Option<&Version>,
        reason: RejectReason,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            package: package.into(),
            version: version.cloned(),
            reason,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}@{}: {}", self.package, v, self.detail),
            None => write!(f, "{}: {}", self.package, self.detail),
        }
    }
}

/// Error for an exhausted search, classified by the last rejection
///
/// Consecutive repeats of one rejection are collapsed.
pub(crate) fn exhaustion_error(root: &str, mut rejected: Vec<Rejection>) -> Error {
    rejected.dedup();
    let Some(last) = rejected.last().cloned() else {
        return Error::NoSatisfyingVersion {
            package: root.to_string(),
            constraints: "the request".to_string(),
            rejected,
        };
    };

    match last.reason {
        RejectReason::Conflict => Error::UnsatisfiableConflict {
            package: last.package,
            detail: last.detail,
            rejected,
        },
        RejectReason::Unification { target } => Error::VariantUnification {
            package: target,
            detail: last.detail,
            rejected,
        },
        RejectReason::NoVersion => Error::NoSatisfyingVersion {
            package: last.package,
            constraints: last.detail,
            rejected,
        },
    }
}

/// Numbered list of rejections for display
pub fn explain(rejected: &[Rejection]) -> String {
    rejected
        .iter()
        .enumerate()
        .map(|(i, r)| format!("  {}. {}", i + 1, r))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_rejection_decides_kind() {
        let v = Version::parse("1.0").unwrap();
        let rejected = vec![
            Rejection::new("pkg", Some(&v), RejectReason::Conflict, "conflicts with '~shared'"),
            Rejection::new(
                "app",
                Some(&v),
                RejectReason::Unification {
                    target: "zlib".to_string(),
                },
                "app@1.0 requires zlib+pic",
            ),
        ];

        let err = exhaustion_error("app", rejected);
        assert!(matches!(&err, Error::VariantUnification { package, .. } if package == "zlib"));
        assert_eq!(err.rejected().len(), 2);
    }

    #[test]
    fn test_repeated_rejections_collapse() {
        let v = Version::parse("1.3").unwrap();
        let conflict = Rejection::new("zlib", Some(&v), RejectReason::Conflict, "conflicts with '+pic'");
        let other = Rejection::new("lib", Some(&v), RejectReason::Conflict, "conflicts with '~shared'");
        let rejected = vec![conflict.clone(), conflict.clone(), other, conflict.clone()];

        let err = exhaustion_error("app", rejected);
        assert_eq!(err.rejected().len(), 3);
        assert!(matches!(&err, Error::UnsatisfiableConflict { package, .. } if package == "zlib"));
    }

    #[test]
    fn test_empty_rejections() {
        let err = exhaustion_error("app", Vec::new());
        assert!(matches!(err, Error::NoSatisfyingVersion { .. }));
    }

    #[test]
    fn test_explain() {
        let rejected = vec![Rejection::new("pkg", None, RejectReason::NoVersion, "@9: (from request)")];
        assert_eq!(explain(&rejected), "  1. pkg: @9: (from request)");
    }
}
