use std::{io, path::PathBuf};

use thiserror::Error;

use crate::flatbuffer::SerializationError;
use crate::ir::{DType, GraphSerdeError};
use crate::lower::LoweringError;
use crate::text_ir::ParseError;
use crate::verify::VerificationError;

/// Malformed builder call. Raised before anything is appended to the graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("invalid shape for `{op}`: {reason}")]
    InvalidShape { op: &'static str, reason: String },
    #[error("invalid attribute for `{op}`: {reason}")]
    InvalidAttribute { op: &'static str, reason: String },
    #[error("shape mismatch in `{op}`: {reason}")]
    ShapeMismatch { op: &'static str, reason: String },
    #[error("dtype mismatch in `{op}`: {lhs} vs {rhs}")]
    DTypeMismatch {
        op: &'static str,
        lhs: DType,
        rhs: DType,
    },
    #[error("`{op}` expects {expected} operand(s), got {found}")]
    Arity {
        op: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("operand %{value} does not belong to graph `{graph}`")]
    UnknownOperand { value: u32, graph: String },
}

impl BuildError {
    pub(crate) fn shape(op: &'static str, reason: impl Into<String>) -> Self {
        BuildError::InvalidShape {
            op,
            reason: reason.into(),
        }
    }

    pub(crate) fn attribute(op: &'static str, reason: impl Into<String>) -> Self {
        BuildError::InvalidAttribute {
            op,
            reason: reason.into(),
        }
    }

    pub(crate) fn mismatch(op: &'static str, reason: impl Into<String>) -> Self {
        BuildError::ShapeMismatch {
            op,
            reason: reason.into(),
        }
    }
}

/// Failure of one compilation unit, tagged by the pipeline stage that raised it.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("build failed: {0}")]
    Build(#[from] BuildError),
    #[error(transparent)]
    Verify(#[from] VerificationError),
    #[error("lowering failed: {0}")]
    Lowering(#[from] LoweringError),
    #[error("serialization failed: {0}")]
    Serialization(#[from] SerializationError),
    #[error("parse failed: {0}")]
    Parse(#[from] ParseError),
    #[error("graph json failed: {0}")]
    GraphJson(#[from] GraphSerdeError),
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CompileError {
    /// Pipeline stage that produced the error, as shown in run reports.
    pub fn stage(&self) -> &'static str {
        match self {
            CompileError::Build(_) => "build",
            CompileError::Verify(_) => "verify",
            CompileError::Lowering(_) => "lower",
            CompileError::GraphJson(GraphSerdeError::Io(_)) => "io",
            CompileError::Serialization(_) | CompileError::GraphJson(_) => "serialize",
            CompileError::Parse(_) => "parse",
            CompileError::Io { .. } => "io",
        }
    }
}

pub type CompileResult<T> = Result<T, CompileError>;
