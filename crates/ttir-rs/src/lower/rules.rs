use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ir::OpKind;

/// Memory layout a lowered value lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Layout {
    RowMajor,
    Tile,
}

impl Layout {
    pub fn as_str(self) -> &'static str {
        match self {
            Layout::RowMajor => "row_major",
            Layout::Tile => "tile",
        }
    }
}

/// Fixed native op sequences used when a target has no direct equivalent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decomposition {
    /// `reduce_max`, `subtract`, `exp`, `reduce_sum`, `divide`.
    Softmax,
    /// `full(0)` then `maximum`.
    Relu,
    /// `neg`, `exp`, `full(1)`, `add`, `reciprocal`.
    Sigmoid,
    /// `reduce_sum`, `full(1/n)`, `multiply`.
    Mean,
    /// Squeeze and unsqueeze as a `reshape` to the result shape.
    Reshape,
    /// Two-axis transpose as a `permute`.
    TransposeAsPermute,
}

/// Lowering strategy for one operator on one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Native op with identical semantics; operands are used in whatever layout they are in.
    Direct,
    /// Native op whose operands must be in `Layout`; conversions are inserted as needed.
    WithLayout(Layout),
    /// Fixed sequence of native ops, emitted in row-major layout.
    Decompose(Decomposition),
}

/// Per-target dispatch table from operator kind to rule.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: HashMap<OpKind, Rule>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: OpKind, rule: Rule) -> Self {
        self.rules.insert(kind, rule);
        self
    }

    pub fn with_all(mut self, kinds: impl IntoIterator<Item = OpKind>, rule: Rule) -> Self {
        for kind in kinds {
            self.rules.insert(kind, rule);
        }
        self
    }

    pub fn get(&self, kind: OpKind) -> Option<Rule> {
        self.rules.get(&kind).copied()
    }
}
