//! Error and warning types shared by every remapping phase.
//!
//! Fatal conditions are `RemapError` values. Per-class failures raised while
//! building or remapping are gathered into a `PipelineFailure` so a run reports
//! every broken class at once. Conditions that never change the outcome of a
//! run are `Warning`s and end up in the JSON summary.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::pipeline::Phase;

pub type Result<T, E = RemapError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RemapError {
    /// The mapping table could not be loaded or projected.
    #[error("invalid mapping (line {line}): {message}")]
    InvalidMapping { line: usize, message: String },

    /// A supertype of an input class could not be located anywhere.
    #[error("missing class {class} (supertype of {referenced_by})")]
    MissingClass {
        class: String,
        referenced_by: String,
    },

    /// Two members or classes would end up with the same remapped identity.
    #[error("conflict in {owner}: {first} and {second} both map to {target}")]
    Conflict {
        owner: String,
        first: String,
        second: String,
        target: String,
    },

    /// Methods linked by overriding carry different explicit mappings.
    #[error("linked members {first} and {second} are mapped to different names")]
    GroupConflict { first: String, second: String },

    /// The class file for `class` could not be decoded or encoded.
    #[error("codec error in {class}: {message}")]
    Codec { class: String, message: String },

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("run cancelled before {0}")]
    Cancelled(Phase),
}

impl RemapError {
    pub fn codec(class: impl Into<String>, err: impl fmt::Display) -> Self {
        RemapError::Codec {
            class: class.into(),
            message: err.to_string(),
        }
    }

    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        RemapError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Every error collected while a phase drained.
#[derive(Debug)]
pub struct PipelineFailure {
    pub phase: Phase,
    pub errors: Vec<RemapError>,
}

impl PipelineFailure {
    pub fn single(phase: Phase, error: RemapError) -> Self {
        Self {
            phase,
            errors: vec![error],
        }
    }
}

impl fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "remapping failed during {} with {} error(s)",
            self.phase,
            self.errors.len()
        )?;
        for error in &self.errors {
            write!(f, "\n  - {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for PipelineFailure {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// A package-private member or class stops being reachable after remapping.
    AccessViolation {
        referencing_class: String,
        declaring_class: String,
        member: Option<String>,
        fixed: bool,
    },
    /// A collision was resolved by keeping the original name of `reverted`.
    ConflictIgnored {
        owner: String,
        kept: String,
        reverted: String,
        target: String,
    },
    /// Members linked by overriding carry different explicit mappings.
    ConflictingMappings {
        member: String,
        chosen: String,
        ignored: String,
    },
    /// The same class name was supplied more than once.
    DuplicateClass { class: String, source: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::AccessViolation {
                referencing_class,
                declaring_class,
                member,
                fixed,
            } => {
                let target = match member {
                    Some(m) => format!("{declaring_class}.{m}"),
                    None => declaring_class.clone(),
                };
                let action = if *fixed { "widened to public" } else { "left as is" };
                write!(
                    f,
                    "package access from {referencing_class} to {target} breaks after remapping ({action})"
                )
            }
            Warning::ConflictIgnored {
                owner,
                kept,
                reverted,
                target,
            } => write!(
                f,
                "conflict in {owner} on {target}: kept {kept}, reverted {reverted}"
            ),
            Warning::ConflictingMappings {
                member,
                chosen,
                ignored,
            } => write!(
                f,
                "linked members of {member} map to both {chosen} and {ignored}; using {chosen}"
            ),
            Warning::DuplicateClass { class, source } => {
                write!(f, "duplicate class {class} in {source} ignored")
            }
        }
    }
}
