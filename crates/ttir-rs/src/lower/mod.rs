//! Target lowering (`ttir` to a target-native dialect).
//!
//! Each source node is rewritten according to the target's rule table: mapped directly, mapped
//! with layout conversions on its operands, or expanded into a fixed native op sequence. The walk
//! follows source order, so the lowered node list stays topologically sorted.

mod legality;
mod registry;
mod rules;
mod targets;
mod walker;

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ir::{
    format_list, DType, ElementwiseBinaryOp, ElementwiseUnaryOp, Graph, GraphInput, Node,
    Operation, ReduceKind, TensorSpec, ValueId,
};
use crate::verify::{verify, VerificationError};

pub use legality::{
    check_lowered_legality, LegalityReport, LegalitySpec, LoweringDiagnostic, NativeKind,
};
pub use registry::{get_target, list_targets, register_target};
pub use rules::{Decomposition, Layout, Rule, RuleTable};
pub use targets::{LoweringTarget, TtMetalTarget, TtnnTarget};
pub use walker::{walk_graph, GraphVisitor};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoweringError {
    #[error("target `{target}` has no rule for `{op}` (node {node})")]
    UnsupportedOperator {
        target: String,
        op: &'static str,
        node: usize,
    },
    #[error("target `{target}` cannot lower `{op}` (node {node}): {reason}")]
    UnsupportedShape {
        target: String,
        op: &'static str,
        node: usize,
        reason: String,
    },
    #[error("unknown target `{0}`")]
    UnknownTarget(String),
    #[error("cannot lower an invalid graph: {0}")]
    Unverified(VerificationError),
    #[error("operand {operand} is not defined")]
    DanglingOperand { operand: ValueId },
    #[error("lowered graph is illegal for `{target}`: {}", format_diagnostics(.diagnostics))]
    Illegal {
        target: String,
        diagnostics: Vec<LoweringDiagnostic>,
    },
}

fn format_diagnostics(diagnostics: &[LoweringDiagnostic]) -> String {
    diagnostics
        .iter()
        .map(|diagnostic| diagnostic.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Target identity stamped into lowered graphs and artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub name: String,
    pub version: u64,
    #[serde(default)]
    pub features: BTreeMap<String, String>,
}

impl TargetSpec {
    pub fn new(name: impl Into<String>, version: u64) -> Self {
        Self {
            name: name.into(),
            version,
            features: BTreeMap::new(),
        }
    }

    pub fn with_feature(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.features.insert(key.into(), value.into());
        self
    }
}

/// Target-native operators. Shapes and dtypes live on the node's output spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NativeOp {
    Matmul,
    Binary(ElementwiseBinaryOp),
    Unary(ElementwiseUnaryOp),
    Softmax {
        dimension: usize,
    },
    Reduce {
        kind: ReduceKind,
        dims: Vec<usize>,
        keep_dim: bool,
    },
    Reshape {
        shape: Vec<usize>,
    },
    Transpose {
        dim0: usize,
        dim1: usize,
    },
    Permute {
        perm: Vec<usize>,
    },
    Concat {
        dim: usize,
    },
    Typecast {
        dtype: DType,
    },
    Full {
        fill: f64,
    },
    ToLayout {
        layout: Layout,
    },
}

impl NativeOp {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            NativeOp::Matmul => "matmul",
            NativeOp::Binary(op) => op.mnemonic(),
            NativeOp::Unary(op) => op.mnemonic(),
            NativeOp::Softmax { .. } => "softmax",
            NativeOp::Reduce { kind, .. } => match kind {
                ReduceKind::Sum => "reduce_sum",
                ReduceKind::Max => "reduce_max",
                ReduceKind::Mean => "reduce_mean",
            },
            NativeOp::Reshape { .. } => "reshape",
            NativeOp::Transpose { .. } => "transpose",
            NativeOp::Permute { .. } => "permute",
            NativeOp::Concat { .. } => "concat",
            NativeOp::Typecast { .. } => "typecast",
            NativeOp::Full { .. } => "full",
            NativeOp::ToLayout { .. } => "to_layout",
        }
    }

    pub fn kind(&self) -> NativeKind {
        NativeKind::from_op(self)
    }

    fn fmt_attrs(&self) -> Option<String> {
        let attrs = match self {
            NativeOp::Softmax { dimension } => format!("dimension = {dimension}"),
            NativeOp::Reduce { dims, keep_dim, .. } => {
                format!("dims = {}, keep_dim = {keep_dim}", format_list(dims))
            }
            NativeOp::Reshape { shape } => format!("shape = {}", format_list(shape)),
            NativeOp::Transpose { dim0, dim1 } => format!("dim0 = {dim0}, dim1 = {dim1}"),
            NativeOp::Permute { perm } => format!("perm = {}", format_list(perm)),
            NativeOp::Concat { dim } => format!("dim = {dim}"),
            NativeOp::Typecast { dtype } => format!("dtype = {dtype}"),
            NativeOp::Full { fill } => format!("fill = {fill:?}"),
            NativeOp::ToLayout { layout } => format!("layout = {}", layout.as_str()),
            NativeOp::Matmul | NativeOp::Binary(_) | NativeOp::Unary(_) => return None,
        };
        Some(attrs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoweredNode {
    pub id: ValueId,
    pub op: NativeOp,
    pub inputs: Vec<ValueId>,
    pub output: TensorSpec,
    pub layout: Layout,
    /// Index of the source node this node was lowered from; `None` for output conversions.
    pub origin: Option<usize>,
}

/// Target-specific rewrite of a [`Graph`]. Inputs are row-major and keep their names and specs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoweredGraph {
    pub target: TargetSpec,
    pub name: String,
    pub inputs: Vec<GraphInput>,
    pub nodes: Vec<LoweredNode>,
    pub outputs: Vec<ValueId>,
}

impl LoweredGraph {
    pub fn value_spec(&self, id: ValueId) -> Option<&TensorSpec> {
        self.inputs
            .iter()
            .find(|input| input.id == id)
            .map(|input| &input.spec)
            .or_else(|| {
                self.nodes
                    .iter()
                    .find(|node| node.id == id)
                    .map(|node| &node.output)
            })
    }

    pub fn output_specs(&self) -> Vec<&TensorSpec> {
        self.outputs
            .iter()
            .filter_map(|id| self.value_spec(*id))
            .collect()
    }

    pub fn count(&self, kind: NativeKind) -> usize {
        self.nodes.iter().filter(|node| node.op.kind() == kind).count()
    }

    pub fn to_text(&self) -> String {
        format!("{self}")
    }
}

impl fmt::Display for LoweredGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dialect = &self.target.name;
        let params = self
            .inputs
            .iter()
            .map(|input| format!("{}: {} {{name = \"{}\"}}", input.id, input.spec, input.name))
            .collect::<Vec<_>>()
            .join(", ");
        let results = self
            .output_specs()
            .iter()
            .map(|spec| spec.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(
            f,
            "func @{}({params}) -> ({results}) attributes {{target = \"{dialect}\", version = {}}} {{",
            self.name, self.target.version
        )?;
        for node in &self.nodes {
            let operands = node
                .inputs
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            let mut line = format!("  {} = {dialect}.{}", node.id, node.op.mnemonic());
            if !operands.is_empty() {
                line.push(' ');
                line.push_str(&operands);
            }
            if let Some(attrs) = node.op.fmt_attrs() {
                line.push_str(&format!(" {{{attrs}}}"));
            }
            writeln!(f, "{line} -> {} #{}", node.output, node.layout.as_str())?;
        }
        let returns = self
            .outputs
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(f, "  return {returns}")?;
        writeln!(f, "}}")
    }
}

/// Lowers `graph` for `target`. The source graph is only borrowed and is never modified.
///
/// The graph is verified first; the rewrite below relies on every attribute being in range.
pub fn lower(graph: &Graph, target: &dyn LoweringTarget) -> Result<LoweredGraph, LoweringError> {
    verify(graph).map_err(LoweringError::Unverified)?;
    let mut lowerer = Lowerer::new(target, graph);
    for (index, node) in graph.nodes.iter().enumerate() {
        lowerer.lower_node(index, node)?;
    }
    let lowered = lowerer.finish(graph)?;
    check_lowered_legality(&lowered, &target.legality()).map_err(|report| {
        LoweringError::Illegal {
            target: target.name().to_string(),
            diagnostics: report.diagnostics,
        }
    })?;
    tracing::debug!(
        graph = %graph.name,
        backend = target.name(),
        source_nodes = graph.nodes.len(),
        lowered_nodes = lowered.nodes.len(),
        "lowered graph"
    );
    Ok(lowered)
}

/// Lowers `graph` for the registered target called `name`.
pub fn lower_for(graph: &Graph, name: &str) -> Result<LoweredGraph, LoweringError> {
    let target = get_target(name).ok_or_else(|| LoweringError::UnknownTarget(name.to_string()))?;
    lower(graph, target.as_ref())
}

/// Per-call lowering state. Nothing here outlives one `lower` call.
struct Lowerer<'a> {
    target: &'a dyn LoweringTarget,
    inputs: Vec<GraphInput>,
    nodes: Vec<LoweredNode>,
    /// Spec and layout of every lowered value, indexed by lowered id.
    values: Vec<(TensorSpec, Layout)>,
    mapping: HashMap<ValueId, ValueId>,
    conversions: HashMap<(ValueId, Layout), ValueId>,
    origin: Option<usize>,
}

impl<'a> Lowerer<'a> {
    fn new(target: &'a dyn LoweringTarget, graph: &Graph) -> Self {
        let mut lowerer = Self {
            target,
            inputs: Vec::with_capacity(graph.inputs.len()),
            nodes: Vec::new(),
            values: Vec::new(),
            mapping: HashMap::new(),
            conversions: HashMap::new(),
            origin: None,
        };
        for input in &graph.inputs {
            let id = lowerer.next_id();
            lowerer.values.push((input.spec.clone(), Layout::RowMajor));
            lowerer.mapping.insert(input.id, id);
            lowerer.inputs.push(GraphInput {
                id,
                name: input.name.clone(),
                spec: input.spec.clone(),
            });
        }
        lowerer
    }

    fn next_id(&self) -> ValueId {
        ValueId(self.values.len() as u32)
    }

    fn spec(&self, value: ValueId) -> &TensorSpec {
        &self.values[value.index()].0
    }

    fn layout(&self, value: ValueId) -> Layout {
        self.values[value.index()].1
    }

    fn emit(
        &mut self,
        op: NativeOp,
        inputs: Vec<ValueId>,
        output: TensorSpec,
        layout: Layout,
    ) -> ValueId {
        let id = self.next_id();
        self.values.push((output.clone(), layout));
        self.nodes.push(LoweredNode {
            id,
            op,
            inputs,
            output,
            layout,
            origin: self.origin,
        });
        id
    }

    /// Returns `value` in `layout`, reusing an earlier conversion of the same value.
    fn convert(&mut self, value: ValueId, layout: Layout) -> ValueId {
        if self.layout(value) == layout {
            return value;
        }
        if let Some(&converted) = self.conversions.get(&(value, layout)) {
            return converted;
        }
        let spec = self.spec(value).clone();
        let converted = self.emit(NativeOp::ToLayout { layout }, vec![value], spec, layout);
        self.conversions.insert((value, layout), converted);
        converted
    }

    fn convert_all(&mut self, values: &[ValueId], layout: Layout) -> Vec<ValueId> {
        values
            .iter()
            .map(|&value| self.convert(value, layout))
            .collect()
    }

    fn unsupported_operator(&self, index: usize, node: &Node) -> LoweringError {
        LoweringError::UnsupportedOperator {
            target: self.target.name().to_string(),
            op: node.op.mnemonic(),
            node: index,
        }
    }

    fn unsupported_shape(&self, index: usize, node: &Node, reason: String) -> LoweringError {
        LoweringError::UnsupportedShape {
            target: self.target.name().to_string(),
            op: node.op.mnemonic(),
            node: index,
            reason,
        }
    }

    fn resolve(&self, node: &Node) -> Result<Vec<ValueId>, LoweringError> {
        node.inputs
            .iter()
            .map(|id| {
                self.mapping
                    .get(id)
                    .copied()
                    .ok_or(LoweringError::DanglingOperand { operand: *id })
            })
            .collect()
    }

    fn check_rank(
        &self,
        index: usize,
        node: &Node,
        operands: &[ValueId],
    ) -> Result<(), LoweringError> {
        let max_rank = self.target.max_rank();
        let ranks = operands
            .iter()
            .map(|&value| self.spec(value).rank())
            .chain(std::iter::once(node.output.rank()));
        for rank in ranks {
            if rank > max_rank {
                return Err(self.unsupported_shape(
                    index,
                    node,
                    format!("rank {rank} exceeds the target limit of {max_rank}"),
                ));
            }
        }
        Ok(())
    }

    fn native(&self, index: usize, node: &Node) -> Result<NativeOp, LoweringError> {
        let op = match &node.op {
            Operation::Matmul => NativeOp::Matmul,
            Operation::ElementwiseUnary(op) => NativeOp::Unary(*op),
            Operation::ElementwiseBinary(op) => NativeOp::Binary(*op),
            Operation::Softmax { dimension } => NativeOp::Softmax {
                dimension: *dimension,
            },
            Operation::Reduce(spec) => NativeOp::Reduce {
                kind: spec.kind,
                dims: spec.dims.clone(),
                keep_dim: spec.keep_dim,
            },
            Operation::Reshape { shape } => NativeOp::Reshape {
                shape: shape.clone(),
            },
            Operation::Transpose { dim0, dim1 } => NativeOp::Transpose {
                dim0: *dim0,
                dim1: *dim1,
            },
            Operation::Permute { perm } => NativeOp::Permute { perm: perm.clone() },
            Operation::Concat { dim } => NativeOp::Concat { dim: *dim },
            Operation::Typecast { dtype } => NativeOp::Typecast { dtype: *dtype },
            Operation::Full { fill, .. } => NativeOp::Full { fill: *fill },
            // No native squeeze family; targets must decompose them.
            Operation::Squeeze { .. } | Operation::Unsqueeze { .. } => {
                return Err(self.unsupported_operator(index, node))
            }
        };
        Ok(op)
    }

    fn lower_node(&mut self, index: usize, node: &Node) -> Result<(), LoweringError> {
        let rule = self
            .target
            .rule(node.op.kind())
            .ok_or_else(|| self.unsupported_operator(index, node))?;
        let operands = self.resolve(node)?;
        self.check_rank(index, node, &operands)?;

        self.origin = Some(index);
        let result = match rule {
            Rule::Direct => {
                let op = self.native(index, node)?;
                let layout = operands
                    .first()
                    .map(|&value| self.layout(value))
                    .unwrap_or(Layout::RowMajor);
                let operands = self.convert_all(&operands, layout);
                self.emit(op, operands, node.output.clone(), layout)
            }
            Rule::WithLayout(layout) => {
                let op = self.native(index, node)?;
                let operands = self.convert_all(&operands, layout);
                self.emit(op, operands, node.output.clone(), layout)
            }
            Rule::Decompose(decomposition) => {
                let operands = self.convert_all(&operands, Layout::RowMajor);
                self.decompose(index, node, decomposition, &operands)?
            }
        };
        self.origin = None;
        self.mapping.insert(node.id, result);
        Ok(())
    }

    fn decompose(
        &mut self,
        index: usize,
        node: &Node,
        decomposition: Decomposition,
        operands: &[ValueId],
    ) -> Result<ValueId, LoweringError> {
        let row = Layout::RowMajor;
        let output = node.output.clone();
        let Some(&x) = operands.first() else {
            return Err(self.unsupported_operator(index, node));
        };
        let input = self.spec(x).clone();

        let result = match (decomposition, &node.op) {
            (Decomposition::Softmax, Operation::Softmax { dimension }) => {
                let mut reduced_dims = input.dims().to_vec();
                reduced_dims[*dimension] = 1;
                let reduced = TensorSpec::new(input.dtype, reduced_dims);
                let reduce = |kind| NativeOp::Reduce {
                    kind,
                    dims: vec![*dimension],
                    keep_dim: true,
                };
                let max = self.emit(reduce(ReduceKind::Max), vec![x], reduced.clone(), row);
                let shifted = self.emit(
                    NativeOp::Binary(ElementwiseBinaryOp::Subtract),
                    vec![x, max],
                    input.clone(),
                    row,
                );
                let exp = self.emit(
                    NativeOp::Unary(ElementwiseUnaryOp::Exp),
                    vec![shifted],
                    input.clone(),
                    row,
                );
                let sum = self.emit(reduce(ReduceKind::Sum), vec![exp], reduced, row);
                self.emit(
                    NativeOp::Binary(ElementwiseBinaryOp::Divide),
                    vec![exp, sum],
                    output,
                    row,
                )
            }
            (Decomposition::Relu, Operation::ElementwiseUnary(ElementwiseUnaryOp::Relu)) => {
                let zero = self.emit(NativeOp::Full { fill: 0.0 }, Vec::new(), input, row);
                self.emit(
                    NativeOp::Binary(ElementwiseBinaryOp::Maximum),
                    vec![x, zero],
                    output,
                    row,
                )
            }
            (Decomposition::Sigmoid, Operation::ElementwiseUnary(ElementwiseUnaryOp::Sigmoid)) => {
                let neg = self.emit(
                    NativeOp::Unary(ElementwiseUnaryOp::Neg),
                    vec![x],
                    input.clone(),
                    row,
                );
                let exp = self.emit(
                    NativeOp::Unary(ElementwiseUnaryOp::Exp),
                    vec![neg],
                    input.clone(),
                    row,
                );
                let one = self.emit(NativeOp::Full { fill: 1.0 }, Vec::new(), input.clone(), row);
                let denom = self.emit(
                    NativeOp::Binary(ElementwiseBinaryOp::Add),
                    vec![exp, one],
                    input,
                    row,
                );
                self.emit(
                    NativeOp::Unary(ElementwiseUnaryOp::Reciprocal),
                    vec![denom],
                    output,
                    row,
                )
            }
            (Decomposition::Mean, Operation::Reduce(spec)) if spec.kind == ReduceKind::Mean => {
                if !input.dtype.is_float() {
                    return Err(self.unsupported_shape(
                        index,
                        node,
                        format!("mean decomposition needs a float dtype, got {}", input.dtype),
                    ));
                }
                let count = spec
                    .dims
                    .iter()
                    .map(|&dim| input.dims()[dim])
                    .product::<usize>();
                if count == 0 {
                    return Err(self.unsupported_shape(
                        index,
                        node,
                        "mean over an empty extent".to_string(),
                    ));
                }
                let sum = self.emit(
                    NativeOp::Reduce {
                        kind: ReduceKind::Sum,
                        dims: spec.dims.clone(),
                        keep_dim: spec.keep_dim,
                    },
                    vec![x],
                    output.clone(),
                    row,
                );
                let scale = self.emit(
                    NativeOp::Full {
                        fill: 1.0 / count as f64,
                    },
                    Vec::new(),
                    output.clone(),
                    row,
                );
                self.emit(
                    NativeOp::Binary(ElementwiseBinaryOp::Multiply),
                    vec![sum, scale],
                    output,
                    row,
                )
            }
            (
                Decomposition::Reshape,
                Operation::Squeeze { .. } | Operation::Unsqueeze { .. } | Operation::Reshape { .. },
            ) => {
                let shape = output.dims().to_vec();
                self.emit(NativeOp::Reshape { shape }, vec![x], output, row)
            }
            (Decomposition::TransposeAsPermute, Operation::Transpose { dim0, dim1 }) => {
                let mut perm = (0..input.rank()).collect::<Vec<_>>();
                perm.swap(*dim0, *dim1);
                self.emit(NativeOp::Permute { perm }, vec![x], output, row)
            }
            _ => return Err(self.unsupported_operator(index, node)),
        };
        Ok(result)
    }

    fn finish(mut self, graph: &Graph) -> Result<LoweredGraph, LoweringError> {
        let mut outputs = Vec::with_capacity(graph.outputs.len());
        for output in &graph.outputs {
            let value = self
                .mapping
                .get(output)
                .copied()
                .ok_or(LoweringError::DanglingOperand { operand: *output })?;
            outputs.push(self.convert(value, Layout::RowMajor));
        }
        Ok(LoweredGraph {
            target: self.target.spec(),
            name: graph.name.clone(),
            inputs: self.inputs,
            nodes: self.nodes,
            outputs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GraphBuilder;

    fn softmax_graph() -> Graph {
        let mut builder = GraphBuilder::new("softmax");
        let x = builder.input(&[1, 10], DType::F32).unwrap();
        let y = builder.softmax(x, -1).unwrap();
        builder.finish(&[y]).unwrap()
    }

    #[test]
    fn ttnn_wraps_compute_in_tile_conversions() {
        let lowered = lower(&softmax_graph(), &TtnnTarget::new()).unwrap();
        let ops = lowered
            .nodes
            .iter()
            .map(|node| node.op.mnemonic())
            .collect::<Vec<_>>();
        assert_eq!(ops, vec!["to_layout", "softmax", "to_layout"]);
        assert_eq!(lowered.nodes[1].layout, Layout::Tile);
        assert_eq!(lowered.nodes[2].origin, None);
        assert_eq!(lowered.outputs, vec![lowered.nodes[2].id]);
    }

    #[test]
    fn ttmetal_decomposes_softmax() {
        let lowered = lower(&softmax_graph(), &TtMetalTarget::new()).unwrap();
        let ops = lowered
            .nodes
            .iter()
            .map(|node| node.op.mnemonic())
            .collect::<Vec<_>>();
        assert_eq!(
            ops,
            vec!["reduce_max", "subtract", "exp", "reduce_sum", "divide"]
        );
        assert!(lowered.nodes.iter().all(|node| node.origin == Some(0)));
        assert_eq!(lowered.count(NativeKind::ToLayout), 0);
        assert_eq!(lowered.nodes[0].output.dims(), &[1, 1]);
    }

    #[test]
    fn conversions_are_shared_between_consumers() {
        let mut builder = GraphBuilder::new("shared");
        let x = builder.input(&[2, 2], DType::F32).unwrap();
        let a = builder.exp(x).unwrap();
        let b = builder.cos(x).unwrap();
        let c = builder.add(a, b).unwrap();
        let graph = builder.finish(&[c]).unwrap();
        let lowered = lower(&graph, &TtnnTarget::new()).unwrap();
        // one conversion in for the shared input and one back out for the result
        assert_eq!(lowered.count(NativeKind::ToLayout), 2);
    }

    #[test]
    fn missing_rule_reports_operator_and_target() {
        let mut builder = GraphBuilder::new("cast");
        let x = builder.input(&[4], DType::F32).unwrap();
        let y = builder.typecast(x, DType::Bf16).unwrap();
        let graph = builder.finish(&[y]).unwrap();
        let err = lower(&graph, &TtMetalTarget::new()).unwrap_err();
        assert_eq!(
            err,
            LoweringError::UnsupportedOperator {
                target: "ttmetal".to_string(),
                op: "typecast",
                node: 0,
            }
        );
    }

    #[test]
    fn rank_above_limit_is_unsupported_shape() {
        let mut builder = GraphBuilder::new("rank5");
        let x = builder.input(&[1, 2, 3, 4, 5], DType::F32).unwrap();
        let y = builder.exp(x).unwrap();
        let graph = builder.finish(&[y]).unwrap();
        let err = lower(&graph, &TtnnTarget::new()).unwrap_err();
        assert!(matches!(
            err,
            LoweringError::UnsupportedShape { node: 0, op: "exp", .. }
        ));
    }

    #[test]
    fn bool_tensors_are_illegal_everywhere() {
        let mut builder = GraphBuilder::new("mask");
        let x = builder.input(&[4], DType::I1).unwrap();
        let y = builder.full(&[4], DType::I1, 1.0).unwrap();
        let z = builder.maximum(x, y).unwrap();
        let graph = builder.finish(&[z]).unwrap();
        for name in ["ttnn", "ttmetal"] {
            let err = lower_for(&graph, name).unwrap_err();
            assert!(matches!(err, LoweringError::Illegal { .. }), "{name}: {err}");
        }
    }

    #[test]
    fn unknown_target_is_reported() {
        let err = lower_for(&softmax_graph(), "npu").unwrap_err();
        assert_eq!(err, LoweringError::UnknownTarget("npu".to_string()));
    }

    #[test]
    fn out_of_range_attributes_fail_instead_of_panicking() {
        let mut graph = softmax_graph();
        graph.nodes[0].op = Operation::Softmax { dimension: 7 };
        for target in ["ttnn", "ttmetal"] {
            let err = lower_for(&graph, target).unwrap_err();
            assert!(matches!(err, LoweringError::Unverified(_)), "{err}");
        }

        let mut builder = GraphBuilder::new("transpose");
        let x = builder.input(&[2, 3], DType::F32).unwrap();
        let y = builder.transpose(x, 0, 1).unwrap();
        let mut graph = builder.finish(&[y]).unwrap();
        graph.nodes[0].op = Operation::Transpose { dim0: 0, dim1: 5 };
        let err = lower_for(&graph, "ttmetal").unwrap_err();
        assert!(matches!(err, LoweringError::Unverified(_)), "{err}");
    }
}
