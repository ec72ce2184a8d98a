//! Built-in lowering targets.

use crate::ir::{DType, ElementwiseBinaryOp, ElementwiseUnaryOp, OpKind, ReduceKind};

use super::legality::{LegalitySpec, NativeKind};
use super::rules::{Decomposition, Layout, Rule, RuleTable};
use super::TargetSpec;

/// A hardware/runtime dialect the `ttir` graph can be lowered into.
///
/// Implementations are stateless; the engine keeps all per-call state itself so one target can
/// lower many graphs concurrently.
pub trait LoweringTarget: Send + Sync {
    fn name(&self) -> &str;
    fn version(&self) -> u64 {
        1
    }
    /// Highest tensor rank any lowered node may carry.
    fn max_rank(&self) -> usize {
        4
    }
    fn rule(&self, kind: OpKind) -> Option<Rule>;
    fn legality(&self) -> LegalitySpec {
        LegalitySpec::default()
    }
    fn spec(&self) -> TargetSpec {
        TargetSpec::new(self.name(), self.version())
    }
}

const RUNTIME_DTYPES: [DType; 6] = [
    DType::F32,
    DType::Bf16,
    DType::F16,
    DType::Si32,
    DType::Ui32,
    DType::Ui8,
];

fn compute_kinds() -> impl Iterator<Item = OpKind> {
    ElementwiseUnaryOp::ALL
        .into_iter()
        .map(OpKind::Unary)
        .chain(ElementwiseBinaryOp::ALL.into_iter().map(OpKind::Binary))
        .chain([
            OpKind::Matmul,
            OpKind::Softmax,
            OpKind::Reduce(ReduceKind::Sum),
            OpKind::Reduce(ReduceKind::Max),
            OpKind::Reduce(ReduceKind::Mean),
        ])
}

/// Tenstorrent network dialect: fused softmax, tiled compute, row-major data movement.
#[derive(Debug, Clone)]
pub struct TtnnTarget {
    rules: RuleTable,
}

impl TtnnTarget {
    pub const NAME: &'static str = "ttnn";

    pub fn new() -> Self {
        let rules = RuleTable::new()
            .with_all(compute_kinds(), Rule::WithLayout(Layout::Tile))
            .with_all(
                [
                    OpKind::Reshape,
                    OpKind::Transpose,
                    OpKind::Permute,
                    OpKind::Concat,
                ],
                Rule::WithLayout(Layout::RowMajor),
            )
            .with_all(
                [OpKind::Squeeze, OpKind::Unsqueeze],
                Rule::Decompose(Decomposition::Reshape),
            )
            .with_all([OpKind::Typecast, OpKind::Full], Rule::Direct);
        Self { rules }
    }
}

impl Default for TtnnTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl LoweringTarget for TtnnTarget {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn rule(&self, kind: OpKind) -> Option<Rule> {
        self.rules.get(kind)
    }

    fn legality(&self) -> LegalitySpec {
        LegalitySpec::default()
            .allow_ops(NativeKind::ALL)
            .allow_dtypes(RUNTIME_DTYPES)
            .with_max_rank(self.max_rank())
    }

    fn spec(&self) -> TargetSpec {
        TargetSpec::new(self.name(), self.version())
            .with_feature("fused_softmax", "true")
            .with_feature("layouts", "row_major,tile")
    }
}

/// Tenstorrent metal dialect: row-major only, no fused softmax and no typecast.
#[derive(Debug, Clone)]
pub struct TtMetalTarget {
    rules: RuleTable,
}

impl TtMetalTarget {
    pub const NAME: &'static str = "ttmetal";

    pub fn new() -> Self {
        let rules = RuleTable::new()
            .with_all(compute_kinds(), Rule::Direct)
            .with(OpKind::Softmax, Rule::Decompose(Decomposition::Softmax))
            .with(
                OpKind::Unary(ElementwiseUnaryOp::Relu),
                Rule::Decompose(Decomposition::Relu),
            )
            .with(
                OpKind::Unary(ElementwiseUnaryOp::Sigmoid),
                Rule::Decompose(Decomposition::Sigmoid),
            )
            .with(
                OpKind::Reduce(ReduceKind::Mean),
                Rule::Decompose(Decomposition::Mean),
            )
            .with(
                OpKind::Transpose,
                Rule::Decompose(Decomposition::TransposeAsPermute),
            )
            .with_all(
                [OpKind::Squeeze, OpKind::Unsqueeze],
                Rule::Decompose(Decomposition::Reshape),
            )
            .with_all(
                [OpKind::Reshape, OpKind::Permute, OpKind::Concat, OpKind::Full],
                Rule::Direct,
            );
        Self { rules }
    }
}

impl Default for TtMetalTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl LoweringTarget for TtMetalTarget {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn rule(&self, kind: OpKind) -> Option<Rule> {
        self.rules.get(kind)
    }

    fn legality(&self) -> LegalitySpec {
        LegalitySpec::default()
            .allow_ops([
                NativeKind::Matmul,
                NativeKind::Binary,
                NativeKind::Unary,
                NativeKind::Reduce,
                NativeKind::Reshape,
                NativeKind::Permute,
                NativeKind::Concat,
                NativeKind::Full,
            ])
            .allow_dtypes(RUNTIME_DTYPES)
            .with_max_rank(self.max_rank())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttnn_tiles_compute_and_keeps_data_movement_row_major() {
        let target = TtnnTarget::new();
        assert_eq!(
            target.rule(OpKind::Matmul),
            Some(Rule::WithLayout(Layout::Tile))
        );
        assert_eq!(
            target.rule(OpKind::Softmax),
            Some(Rule::WithLayout(Layout::Tile))
        );
        assert_eq!(
            target.rule(OpKind::Concat),
            Some(Rule::WithLayout(Layout::RowMajor))
        );
    }

    #[test]
    fn ttmetal_decomposes_what_it_lacks() {
        let target = TtMetalTarget::new();
        assert_eq!(
            target.rule(OpKind::Softmax),
            Some(Rule::Decompose(Decomposition::Softmax))
        );
        assert_eq!(
            target.rule(OpKind::Unary(ElementwiseUnaryOp::Relu)),
            Some(Rule::Decompose(Decomposition::Relu))
        );
        assert_eq!(
            target.rule(OpKind::Unary(ElementwiseUnaryOp::Exp)),
            Some(Rule::Direct)
        );
        assert_eq!(target.rule(OpKind::Typecast), None);
    }
}
