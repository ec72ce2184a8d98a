//! Graph builder exposing one method per `ttir` operator.
//!
//! Every call validates its operands and attributes, infers the result spec and only then appends
//! a node, so a failed call never leaves a half-recorded node behind.

use crate::error::BuildError;
use crate::ir::infer::{infer_output, normalize_dim};
use crate::ir::{
    DType, ElementwiseBinaryOp, ElementwiseUnaryOp, Graph, Operand, OperandRegistry, Operation,
    ReduceKind, ReduceSpec, TensorSpec,
};

/// Mutable builder that stages operations for one graph.
#[derive(Debug)]
pub struct GraphBuilder {
    registry: OperandRegistry,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            registry: OperandRegistry::new(name),
        }
    }

    /// Declares a graph input named `in{N}` where `N` is its position.
    pub fn input(&mut self, dims: &[usize], dtype: DType) -> Result<Operand, BuildError> {
        let name = format!("in{}", self.registry.graph().inputs.len());
        self.named_input(name, dims, dtype)
    }

    pub fn named_input(
        &mut self,
        name: impl Into<String>,
        dims: &[usize],
        dtype: DType,
    ) -> Result<Operand, BuildError> {
        self.registry
            .declare_input(name, TensorSpec::new(dtype, dims.to_vec()))
    }

    pub fn spec(&self, operand: &Operand) -> Result<&TensorSpec, BuildError> {
        self.registry.spec(operand)
    }

    pub fn registry(&self) -> &OperandRegistry {
        &self.registry
    }

    /// Read-only view of the graph built so far, including after a failed call.
    pub fn graph(&self) -> &Graph {
        self.registry.graph()
    }

    pub fn finish(self, outputs: &[Operand]) -> Result<Graph, BuildError> {
        self.registry.finish(outputs)
    }

    /// Validates `op` against `inputs` and appends it.
    pub fn append(&mut self, op: Operation, inputs: &[Operand]) -> Result<Operand, BuildError> {
        let specs = inputs
            .iter()
            .map(|operand| self.registry.spec(operand))
            .collect::<Result<Vec<_>, _>>()?;
        let output = infer_output(&op, &specs)?;
        self.registry.record(op, inputs, output)
    }

    fn rank_of(&self, operand: &Operand) -> Result<usize, BuildError> {
        Ok(self.registry.spec(operand)?.rank())
    }

    fn axis(
        &self,
        op: &'static str,
        name: &str,
        dim: isize,
        rank: usize,
    ) -> Result<usize, BuildError> {
        normalize_dim(dim, rank).ok_or_else(|| {
            BuildError::attribute(
                op,
                format!(
                    "{name} {dim} is out of range [-{rank}, {rank})",
                    rank = rank as isize
                ),
            )
        })
    }

    pub fn matmul(&mut self, lhs: Operand, rhs: Operand) -> Result<Operand, BuildError> {
        self.append(Operation::Matmul, &[lhs, rhs])
    }

    pub fn binary(
        &mut self,
        op: ElementwiseBinaryOp,
        lhs: Operand,
        rhs: Operand,
    ) -> Result<Operand, BuildError> {
        self.append(Operation::ElementwiseBinary(op), &[lhs, rhs])
    }

    pub fn add(&mut self, lhs: Operand, rhs: Operand) -> Result<Operand, BuildError> {
        self.binary(ElementwiseBinaryOp::Add, lhs, rhs)
    }

    pub fn subtract(&mut self, lhs: Operand, rhs: Operand) -> Result<Operand, BuildError> {
        self.binary(ElementwiseBinaryOp::Subtract, lhs, rhs)
    }

    pub fn multiply(&mut self, lhs: Operand, rhs: Operand) -> Result<Operand, BuildError> {
        self.binary(ElementwiseBinaryOp::Multiply, lhs, rhs)
    }

    pub fn divide(&mut self, lhs: Operand, rhs: Operand) -> Result<Operand, BuildError> {
        self.binary(ElementwiseBinaryOp::Divide, lhs, rhs)
    }

    pub fn maximum(&mut self, lhs: Operand, rhs: Operand) -> Result<Operand, BuildError> {
        self.binary(ElementwiseBinaryOp::Maximum, lhs, rhs)
    }

    pub fn minimum(&mut self, lhs: Operand, rhs: Operand) -> Result<Operand, BuildError> {
        self.binary(ElementwiseBinaryOp::Minimum, lhs, rhs)
    }

    pub fn unary(&mut self, op: ElementwiseUnaryOp, input: Operand) -> Result<Operand, BuildError> {
        self.append(Operation::ElementwiseUnary(op), &[input])
    }

    pub fn relu(&mut self, input: Operand) -> Result<Operand, BuildError> {
        self.unary(ElementwiseUnaryOp::Relu, input)
    }

    pub fn exp(&mut self, input: Operand) -> Result<Operand, BuildError> {
        self.unary(ElementwiseUnaryOp::Exp, input)
    }

    pub fn log(&mut self, input: Operand) -> Result<Operand, BuildError> {
        self.unary(ElementwiseUnaryOp::Log, input)
    }

    pub fn neg(&mut self, input: Operand) -> Result<Operand, BuildError> {
        self.unary(ElementwiseUnaryOp::Neg, input)
    }

    pub fn sqrt(&mut self, input: Operand) -> Result<Operand, BuildError> {
        self.unary(ElementwiseUnaryOp::Sqrt, input)
    }

    pub fn rsqrt(&mut self, input: Operand) -> Result<Operand, BuildError> {
        self.unary(ElementwiseUnaryOp::Rsqrt, input)
    }

    pub fn reciprocal(&mut self, input: Operand) -> Result<Operand, BuildError> {
        self.unary(ElementwiseUnaryOp::Reciprocal, input)
    }

    pub fn cos(&mut self, input: Operand) -> Result<Operand, BuildError> {
        self.unary(ElementwiseUnaryOp::Cos, input)
    }

    pub fn sin(&mut self, input: Operand) -> Result<Operand, BuildError> {
        self.unary(ElementwiseUnaryOp::Sin, input)
    }

    pub fn tanh(&mut self, input: Operand) -> Result<Operand, BuildError> {
        self.unary(ElementwiseUnaryOp::Tanh, input)
    }

    pub fn sigmoid(&mut self, input: Operand) -> Result<Operand, BuildError> {
        self.unary(ElementwiseUnaryOp::Sigmoid, input)
    }

    pub fn abs(&mut self, input: Operand) -> Result<Operand, BuildError> {
        self.unary(ElementwiseUnaryOp::Abs, input)
    }

    /// Softmax along `dimension`, which may be negative.
    pub fn softmax(&mut self, input: Operand, dimension: isize) -> Result<Operand, BuildError> {
        let rank = self.rank_of(&input)?;
        let dimension = self.axis("softmax", "dimension", dimension, rank)?;
        self.append(Operation::Softmax { dimension }, &[input])
    }

    pub fn reduce(
        &mut self,
        kind: ReduceKind,
        input: Operand,
        dims: &[isize],
        keep_dim: bool,
    ) -> Result<Operand, BuildError> {
        let rank = self.rank_of(&input)?;
        let mut normalized = dims
            .iter()
            .map(|&dim| self.axis(kind.mnemonic(), "dim", dim, rank))
            .collect::<Result<Vec<_>, _>>()?;
        normalized.sort_unstable();
        let spec = ReduceSpec {
            kind,
            dims: normalized,
            keep_dim,
        };
        self.append(Operation::Reduce(spec), &[input])
    }

    pub fn sum(
        &mut self,
        input: Operand,
        dims: &[isize],
        keep_dim: bool,
    ) -> Result<Operand, BuildError> {
        self.reduce(ReduceKind::Sum, input, dims, keep_dim)
    }

    pub fn max(
        &mut self,
        input: Operand,
        dims: &[isize],
        keep_dim: bool,
    ) -> Result<Operand, BuildError> {
        self.reduce(ReduceKind::Max, input, dims, keep_dim)
    }

    pub fn mean(
        &mut self,
        input: Operand,
        dims: &[isize],
        keep_dim: bool,
    ) -> Result<Operand, BuildError> {
        self.reduce(ReduceKind::Mean, input, dims, keep_dim)
    }

    /// Reshapes `input`. At most one entry may be `-1`, which is inferred from the element count.
    pub fn reshape(&mut self, input: Operand, shape: &[i64]) -> Result<Operand, BuildError> {
        let source = self.registry.spec(&input)?;
        let mut inferred = None;
        let mut known = 1usize;
        for (axis, &dim) in shape.iter().enumerate() {
            match dim {
                -1 if inferred.is_none() => inferred = Some(axis),
                -1 => {
                    return Err(BuildError::shape(
                        "reshape",
                        "only one dimension may be inferred",
                    ))
                }
                dim if dim < 0 => {
                    return Err(BuildError::shape(
                        "reshape",
                        format!("dimension {dim} is negative"),
                    ))
                }
                dim => {
                    known = known.checked_mul(dim as usize).ok_or_else(|| {
                        BuildError::shape("reshape", "element count overflows")
                    })?;
                }
            }
        }
        let mut dims = shape.iter().map(|&dim| dim.max(0) as usize).collect::<Vec<_>>();
        if let Some(axis) = inferred {
            let total = source.shape.element_count().unwrap_or(0);
            if known == 0 || total % known != 0 {
                return Err(BuildError::mismatch(
                    "reshape",
                    format!("cannot infer -1 when reshaping {} into {shape:?}", source.shape),
                ));
            }
            dims[axis] = total / known;
        }
        self.append(Operation::Reshape { shape: dims }, &[input])
    }

    pub fn transpose(
        &mut self,
        input: Operand,
        dim0: isize,
        dim1: isize,
    ) -> Result<Operand, BuildError> {
        let rank = self.rank_of(&input)?;
        let dim0 = self.axis("transpose", "dim0", dim0, rank)?;
        let dim1 = self.axis("transpose", "dim1", dim1, rank)?;
        self.append(Operation::Transpose { dim0, dim1 }, &[input])
    }

    pub fn permute(&mut self, input: Operand, perm: &[isize]) -> Result<Operand, BuildError> {
        let rank = self.rank_of(&input)?;
        let perm = perm
            .iter()
            .map(|&axis| self.axis("permute", "axis", axis, rank))
            .collect::<Result<Vec<_>, _>>()?;
        self.append(Operation::Permute { perm }, &[input])
    }

    pub fn squeeze(&mut self, input: Operand, dim: isize) -> Result<Operand, BuildError> {
        let rank = self.rank_of(&input)?;
        let dim = self.axis("squeeze", "dim", dim, rank)?;
        self.append(Operation::Squeeze { dim }, &[input])
    }

    /// Inserts a unit dimension; `dim` ranges over `[-(rank + 1), rank + 1)`.
    pub fn unsqueeze(&mut self, input: Operand, dim: isize) -> Result<Operand, BuildError> {
        let rank = self.rank_of(&input)?;
        let dim = self.axis("unsqueeze", "dim", dim, rank + 1)?;
        self.append(Operation::Unsqueeze { dim }, &[input])
    }

    pub fn concat(&mut self, inputs: &[Operand], dim: isize) -> Result<Operand, BuildError> {
        let first = inputs.first().ok_or(BuildError::Arity {
            op: "concat",
            expected: 1,
            found: 0,
        })?;
        let rank = self.rank_of(first)?;
        let dim = self.axis("concat", "dim", dim, rank)?;
        self.append(Operation::Concat { dim }, inputs)
    }

    pub fn typecast(&mut self, input: Operand, dtype: DType) -> Result<Operand, BuildError> {
        self.append(Operation::Typecast { dtype }, &[input])
    }

    /// Creates a constant tensor filled with `fill`.
    pub fn full(&mut self, shape: &[usize], dtype: DType, fill: f64) -> Result<Operand, BuildError> {
        self.append(
            Operation::Full {
                shape: shape.to_vec(),
                dtype,
                fill,
            },
            &[],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reshape_infers_single_wildcard() {
        let mut builder = GraphBuilder::new("reshape");
        let x = builder.input(&[1, 12, 50, 100], DType::F32).unwrap();
        let y = builder.reshape(x, &[12, -1]).unwrap();
        assert_eq!(builder.spec(&y).unwrap().dims(), &[12, 5000]);
        let err = builder.reshape(x, &[-1, -1]).unwrap_err();
        assert!(matches!(err, BuildError::InvalidShape { .. }));
        let err = builder.reshape(x, &[7, -1]).unwrap_err();
        assert!(matches!(err, BuildError::ShapeMismatch { .. }));
    }

    #[test]
    fn negative_axes_are_normalized() {
        let mut builder = GraphBuilder::new("axes");
        let x = builder.input(&[2, 3, 4], DType::F32).unwrap();
        let y = builder.transpose(x, -2, -1).unwrap();
        assert_eq!(builder.spec(&y).unwrap().dims(), &[2, 4, 3]);
        let z = builder.unsqueeze(x, -1).unwrap();
        assert_eq!(builder.spec(&z).unwrap().dims(), &[2, 3, 4, 1]);
        let s = builder.sum(x, &[-1, 0], true).unwrap();
        assert_eq!(builder.spec(&s).unwrap().dims(), &[1, 3, 1]);
        let err = builder.softmax(x, 3).unwrap_err();
        assert!(matches!(err, BuildError::InvalidAttribute { op: "softmax", .. }));
    }

    #[test]
    fn dtype_mismatch_is_reported() {
        let mut builder = GraphBuilder::new("dtypes");
        let a = builder.input(&[4], DType::F32).unwrap();
        let b = builder.input(&[4], DType::Bf16).unwrap();
        let err = builder.add(a, b).unwrap_err();
        assert_eq!(
            err,
            BuildError::DTypeMismatch {
                op: "add",
                lhs: DType::F32,
                rhs: DType::Bf16
            }
        );
        let c = builder.typecast(b, DType::F32).unwrap();
        assert!(builder.add(a, c).is_ok());
    }

    #[test]
    fn empty_concat_is_rejected() {
        let mut builder = GraphBuilder::new("concat");
        let err = builder.concat(&[], 0).unwrap_err();
        assert!(matches!(err, BuildError::Arity { op: "concat", .. }));
    }
}
