//! Shape and dtype inference rules shared by the builder and the verifier.
//!
//! Every operator has exactly one rule here. The builder runs it before appending a node and the
//! verifier re-runs it over finished graphs, so both agree on what a well-typed node looks like.

use crate::error::BuildError;

use super::spec::{DType, Operation, ReduceSpec, Shape, TensorSpec};

/// Normalizes a possibly negative axis into `[0, rank)`.
pub fn normalize_dim(dim: isize, rank: usize) -> Option<usize> {
    let rank = rank as isize;
    let normalized = if dim < 0 { dim + rank } else { dim };
    if (0..rank).contains(&normalized) {
        Some(normalized as usize)
    } else {
        None
    }
}

/// Broadcasts two shapes with the right-aligned elementwise rule.
///
/// Aligned extents must be equal, or one of them must be 1; missing leading extents broadcast.
pub fn broadcast_shapes(lhs: &[usize], rhs: &[usize]) -> Option<Vec<usize>> {
    let rank = lhs.len().max(rhs.len());
    let mut out = vec![0usize; rank];
    for axis in 0..rank {
        let l = axis
            .checked_sub(rank - lhs.len())
            .map(|idx| lhs[idx])
            .unwrap_or(1);
        let r = axis
            .checked_sub(rank - rhs.len())
            .map(|idx| rhs[idx])
            .unwrap_or(1);
        out[axis] = match (l, r) {
            (l, r) if l == r => l,
            (1, r) => r,
            (l, 1) => l,
            _ => return None,
        };
    }
    Some(out)
}

/// Batched matrix-multiply shape rule.
///
/// Trailing two dims are contracted (`lhs[-1] == rhs[-2]`) and leading dims broadcast. Rank-1
/// operands are promoted to matrices and the promoted axis is dropped from the result.
pub fn matmul_shape(lhs: &[usize], rhs: &[usize]) -> Result<Vec<usize>, BuildError> {
    if lhs.is_empty() || rhs.is_empty() {
        return Err(BuildError::shape(
            "matmul",
            "operands must have rank >= 1",
        ));
    }
    let lhs_vector = lhs.len() == 1;
    let rhs_vector = rhs.len() == 1;
    let lhs_m: Vec<usize> = if lhs_vector { vec![1, lhs[0]] } else { lhs.to_vec() };
    let rhs_m: Vec<usize> = if rhs_vector { vec![rhs[0], 1] } else { rhs.to_vec() };

    let (lhs_batch, lhs_mat) = lhs_m.split_at(lhs_m.len() - 2);
    let (rhs_batch, rhs_mat) = rhs_m.split_at(rhs_m.len() - 2);
    if lhs_mat[1] != rhs_mat[0] {
        return Err(BuildError::mismatch(
            "matmul",
            format!(
                "contraction dims differ: lhs {:?} has inner dim {}, rhs {:?} has {}",
                lhs, lhs_mat[1], rhs, rhs_mat[0]
            ),
        ));
    }
    let mut out = broadcast_shapes(lhs_batch, rhs_batch).ok_or_else(|| {
        BuildError::mismatch(
            "matmul",
            format!("batch dims {lhs_batch:?} and {rhs_batch:?} do not broadcast"),
        )
    })?;
    if !lhs_vector {
        out.push(lhs_mat[0]);
    }
    if !rhs_vector {
        out.push(rhs_mat[1]);
    }
    Ok(out)
}

fn ensure_same_dtype(op: &'static str, lhs: DType, rhs: DType) -> Result<(), BuildError> {
    if lhs != rhs {
        return Err(BuildError::DTypeMismatch { op, lhs, rhs });
    }
    Ok(())
}

fn ensure_arity(op: &Operation, found: usize) -> Result<(), BuildError> {
    match op.arity() {
        Some(expected) if expected != found => Err(BuildError::Arity {
            op: op.mnemonic(),
            expected,
            found,
        }),
        None if found == 0 => Err(BuildError::Arity {
            op: op.mnemonic(),
            expected: 1,
            found,
        }),
        _ => Ok(()),
    }
}

fn ensure_dim(op: &'static str, name: &str, dim: usize, rank: usize) -> Result<(), BuildError> {
    if dim >= rank {
        return Err(BuildError::attribute(
            op,
            format!("{name} {dim} is out of range for rank {rank}"),
        ));
    }
    Ok(())
}

/// Infers the result spec of `op` applied to `inputs`.
pub fn infer_output(op: &Operation, inputs: &[&TensorSpec]) -> Result<TensorSpec, BuildError> {
    ensure_arity(op, inputs.len())?;
    let name = op.mnemonic();
    match op {
        Operation::Matmul => {
            let (lhs, rhs) = (inputs[0], inputs[1]);
            ensure_same_dtype(name, lhs.dtype, rhs.dtype)?;
            let dims = matmul_shape(lhs.dims(), rhs.dims())?;
            Ok(TensorSpec::new(lhs.dtype, dims))
        }
        Operation::ElementwiseBinary(_) => {
            let (lhs, rhs) = (inputs[0], inputs[1]);
            ensure_same_dtype(name, lhs.dtype, rhs.dtype)?;
            let dims = broadcast_shapes(lhs.dims(), rhs.dims()).ok_or_else(|| {
                BuildError::mismatch(
                    name,
                    format!("{} and {} do not broadcast", lhs.shape, rhs.shape),
                )
            })?;
            Ok(TensorSpec::new(lhs.dtype, dims))
        }
        Operation::ElementwiseUnary(_) => Ok(inputs[0].clone()),
        Operation::Softmax { dimension } => {
            let input = inputs[0];
            ensure_dim(name, "dimension", *dimension, input.rank())?;
            Ok(input.clone())
        }
        Operation::Reduce(spec) => infer_reduce(name, spec, inputs[0]),
        Operation::Reshape { shape } => {
            let input = inputs[0];
            let requested = Shape::new(shape.clone());
            match (input.shape.element_count(), requested.element_count()) {
                (Some(have), Some(want)) if have == want => {
                    Ok(TensorSpec::new(input.dtype, requested))
                }
                _ => Err(BuildError::mismatch(
                    name,
                    format!(
                        "cannot reshape {} into {} (element counts differ)",
                        input.shape, requested
                    ),
                )),
            }
        }
        Operation::Transpose { dim0, dim1 } => {
            let input = inputs[0];
            ensure_dim(name, "dim0", *dim0, input.rank())?;
            ensure_dim(name, "dim1", *dim1, input.rank())?;
            if dim0 == dim1 {
                return Err(BuildError::attribute(
                    name,
                    format!("dim0 and dim1 must differ, both are {dim0}"),
                ));
            }
            let mut dims = input.dims().to_vec();
            dims.swap(*dim0, *dim1);
            Ok(TensorSpec::new(input.dtype, dims))
        }
        Operation::Permute { perm } => {
            let input = inputs[0];
            if perm.len() != input.rank() {
                return Err(BuildError::attribute(
                    name,
                    format!("permutation {perm:?} does not match rank {}", input.rank()),
                ));
            }
            let mut seen = vec![false; perm.len()];
            for &axis in perm {
                if axis >= perm.len() || seen[axis] {
                    return Err(BuildError::attribute(
                        name,
                        format!("{perm:?} is not a permutation of 0..{}", perm.len()),
                    ));
                }
                seen[axis] = true;
            }
            let dims = perm.iter().map(|&axis| input.dims()[axis]).collect::<Vec<_>>();
            Ok(TensorSpec::new(input.dtype, dims))
        }
        Operation::Squeeze { dim } => {
            let input = inputs[0];
            ensure_dim(name, "dim", *dim, input.rank())?;
            if input.dims()[*dim] != 1 {
                return Err(BuildError::attribute(
                    name,
                    format!(
                        "dimension {dim} of {} has size {}, expected 1",
                        input.shape,
                        input.dims()[*dim]
                    ),
                ));
            }
            let mut dims = input.dims().to_vec();
            dims.remove(*dim);
            Ok(TensorSpec::new(input.dtype, dims))
        }
        Operation::Unsqueeze { dim } => {
            let input = inputs[0];
            ensure_dim(name, "dim", *dim, input.rank() + 1)?;
            let mut dims = input.dims().to_vec();
            dims.insert(*dim, 1);
            Ok(TensorSpec::new(input.dtype, dims))
        }
        Operation::Concat { dim } => infer_concat(name, *dim, inputs),
        Operation::Typecast { dtype } => Ok(TensorSpec::new(*dtype, inputs[0].shape.clone())),
        Operation::Full { shape, dtype, fill } => {
            if !fill.is_finite() {
                return Err(BuildError::attribute(name, format!("fill value {fill} is not finite")));
            }
            Ok(TensorSpec::new(*dtype, shape.clone()))
        }
    }
}

fn infer_reduce(
    name: &'static str,
    spec: &ReduceSpec,
    input: &TensorSpec,
) -> Result<TensorSpec, BuildError> {
    if spec.dims.is_empty() {
        return Err(BuildError::attribute(name, "at least one dim must be reduced"));
    }
    let mut seen = vec![false; input.rank()];
    for &dim in &spec.dims {
        ensure_dim(name, "dim", dim, input.rank())?;
        if seen[dim] {
            return Err(BuildError::attribute(
                name,
                format!("dim {dim} is reduced more than once"),
            ));
        }
        seen[dim] = true;
    }
    let dims = input
        .dims()
        .iter()
        .enumerate()
        .filter_map(|(axis, &extent)| match (seen[axis], spec.keep_dim) {
            (false, _) => Some(extent),
            (true, true) => Some(1),
            (true, false) => None,
        })
        .collect::<Vec<_>>();
    Ok(TensorSpec::new(input.dtype, dims))
}

fn infer_concat(
    name: &'static str,
    dim: usize,
    inputs: &[&TensorSpec],
) -> Result<TensorSpec, BuildError> {
    let first = inputs[0];
    ensure_dim(name, "dim", dim, first.rank())?;
    let mut dims = first.dims().to_vec();
    for (index, other) in inputs.iter().enumerate().skip(1) {
        ensure_same_dtype(name, first.dtype, other.dtype)?;
        if other.rank() != first.rank() {
            return Err(BuildError::mismatch(
                name,
                format!(
                    "operand {index} has rank {}, expected {}",
                    other.rank(),
                    first.rank()
                ),
            ));
        }
        for (axis, (&lhs, &rhs)) in first.dims().iter().zip(other.dims()).enumerate() {
            if axis != dim && lhs != rhs {
                return Err(BuildError::mismatch(
                    name,
                    format!(
                        "operand {index} has shape {}, which differs from {} outside dim {dim}",
                        other.shape, first.shape
                    ),
                ));
            }
        }
        dims[dim] += other.dims()[dim];
    }
    Ok(TensorSpec::new(first.dtype, dims))
}
