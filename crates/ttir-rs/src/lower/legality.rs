use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ir::{DType, TensorSpec};

use super::{LoweredGraph, NativeOp};

/// Coarse native operator families used by legality checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NativeKind {
    Matmul,
    Binary,
    Unary,
    Softmax,
    Reduce,
    Reshape,
    Transpose,
    Permute,
    Concat,
    Typecast,
    Full,
    ToLayout,
}

impl NativeKind {
    pub const ALL: [NativeKind; 12] = [
        NativeKind::Matmul,
        NativeKind::Binary,
        NativeKind::Unary,
        NativeKind::Softmax,
        NativeKind::Reduce,
        NativeKind::Reshape,
        NativeKind::Transpose,
        NativeKind::Permute,
        NativeKind::Concat,
        NativeKind::Typecast,
        NativeKind::Full,
        NativeKind::ToLayout,
    ];

    pub fn from_op(op: &NativeOp) -> Self {
        match op {
            NativeOp::Matmul => NativeKind::Matmul,
            NativeOp::Binary(_) => NativeKind::Binary,
            NativeOp::Unary(_) => NativeKind::Unary,
            NativeOp::Softmax { .. } => NativeKind::Softmax,
            NativeOp::Reduce { .. } => NativeKind::Reduce,
            NativeOp::Reshape { .. } => NativeKind::Reshape,
            NativeOp::Transpose { .. } => NativeKind::Transpose,
            NativeOp::Permute { .. } => NativeKind::Permute,
            NativeOp::Concat { .. } => NativeKind::Concat,
            NativeOp::Typecast { .. } => NativeKind::Typecast,
            NativeOp::Full { .. } => NativeKind::Full,
            NativeOp::ToLayout { .. } => NativeKind::ToLayout,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LegalitySpec {
    pub allowed_ops: Option<HashSet<NativeKind>>,
    pub allowed_dtypes: Option<HashSet<DType>>,
    pub max_rank: Option<usize>,
}

impl LegalitySpec {
    pub fn allow_ops(mut self, ops: impl IntoIterator<Item = NativeKind>) -> Self {
        self.allowed_ops = Some(ops.into_iter().collect());
        self
    }

    pub fn allow_dtypes(mut self, dtypes: impl IntoIterator<Item = DType>) -> Self {
        self.allowed_dtypes = Some(dtypes.into_iter().collect());
        self
    }

    pub fn with_max_rank(mut self, rank: usize) -> Self {
        self.max_rank = Some(rank);
        self
    }
}

/// One legality violation. `node_index` is `None` for graph inputs and outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoweringDiagnostic {
    pub node_index: Option<usize>,
    pub message: String,
}

impl fmt::Display for LoweringDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node_index {
            Some(index) => write!(f, "node {index}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LegalityReport {
    pub diagnostics: Vec<LoweringDiagnostic>,
}

impl LegalityReport {
    pub fn is_ok(&self) -> bool {
        self.diagnostics.is_empty()
    }

    fn push(&mut self, node_index: Option<usize>, message: String) {
        self.diagnostics.push(LoweringDiagnostic {
            node_index,
            message,
        });
    }
}

fn check_spec(
    spec: &TensorSpec,
    rules: &LegalitySpec,
    report: &mut LegalityReport,
    node_index: Option<usize>,
    what: &str,
) {
    if let Some(allowed) = &rules.allowed_dtypes {
        if !allowed.contains(&spec.dtype) {
            report.push(node_index, format!("{what} uses unsupported dtype {}", spec.dtype));
        }
    }
    if let Some(max_rank) = rules.max_rank {
        if spec.rank() > max_rank {
            report.push(
                node_index,
                format!("{what} has rank {} above the limit of {max_rank}", spec.rank()),
            );
        }
    }
}

/// Checks every node, input and output of `graph` against `rules`.
pub fn check_lowered_legality(
    graph: &LoweredGraph,
    rules: &LegalitySpec,
) -> Result<(), LegalityReport> {
    let mut report = LegalityReport::default();

    for input in &graph.inputs {
        check_spec(
            &input.spec,
            rules,
            &mut report,
            None,
            &format!("input `{}`", input.name),
        );
    }
    for (index, node) in graph.nodes.iter().enumerate() {
        let kind = NativeKind::from_op(&node.op);
        if let Some(allowed) = &rules.allowed_ops {
            if !allowed.contains(&kind) {
                report.push(
                    Some(index),
                    format!("operation `{}` is not supported", node.op.mnemonic()),
                );
            }
        }
        check_spec(
            &node.output,
            rules,
            &mut report,
            Some(index),
            &format!("result of `{}`", node.op.mnemonic()),
        );
    }

    if report.is_ok() {
        Ok(())
    } else {
        Err(report)
    }
}
