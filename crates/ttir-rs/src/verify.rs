//! Structural and type verification of finished graphs.

use std::collections::{HashMap, HashSet};
use std::fmt;

use thiserror::Error;

use crate::error::BuildError;
use crate::ir::infer::infer_output;
use crate::ir::{Graph, TensorSpec, ValueId};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum VerifyErrorKind {
    #[error("operand {operand} is used before the node that produces it")]
    ForwardReference { operand: ValueId },
    #[error("operand {operand} is never defined")]
    UndefinedOperand { operand: ValueId },
    #[error("value is defined more than once")]
    DuplicateDefinition,
    #[error("{0}")]
    Inference(BuildError),
    #[error("declared result {declared} does not match inferred {inferred}")]
    TypeMismatch {
        declared: TensorSpec,
        inferred: TensorSpec,
    },
    #[error("graph declares no outputs")]
    NoOutputs,
    #[error("output is neither a graph input nor produced by a node")]
    MissingOutput,
}

/// First violation found in a graph.
///
/// `position` is the index of the offending node; it is `None` for violations attached to the
/// graph signature (inputs or the return list).
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationError {
    pub position: Option<usize>,
    pub value: ValueId,
    pub op: &'static str,
    pub kind: VerifyErrorKind,
}

impl fmt::Display for VerificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.position {
            Some(position) => write!(
                f,
                "verification failed at node {position} (`{}` producing {}): {}",
                self.op, self.value, self.kind
            ),
            None => write!(
                f,
                "verification failed at `{}` ({}): {}",
                self.op, self.value, self.kind
            ),
        }
    }
}

impl std::error::Error for VerificationError {}

/// Verifies `graph`, returning the first violation.
///
/// Checks run as separate passes in a fixed order: topology, single assignment, per-node
/// shape/type inference and finally the return list.
pub fn verify(graph: &Graph) -> Result<(), VerificationError> {
    check_topology(graph)?;
    check_single_assignment(graph)?;
    check_types(graph)?;
    check_outputs(graph)?;
    tracing::debug!(graph = %graph.name, nodes = graph.nodes.len(), "graph verified");
    Ok(())
}

fn check_topology(graph: &Graph) -> Result<(), VerificationError> {
    let defined = graph
        .inputs
        .iter()
        .map(|input| input.id)
        .chain(graph.nodes.iter().map(|node| node.id))
        .collect::<HashSet<_>>();
    let mut available = graph.inputs.iter().map(|input| input.id).collect::<HashSet<_>>();
    for (position, node) in graph.nodes.iter().enumerate() {
        for &operand in &node.inputs {
            if available.contains(&operand) {
                continue;
            }
            let kind = if defined.contains(&operand) {
                VerifyErrorKind::ForwardReference { operand }
            } else {
                VerifyErrorKind::UndefinedOperand { operand }
            };
            return Err(VerificationError {
                position: Some(position),
                value: node.id,
                op: node.op.mnemonic(),
                kind,
            });
        }
        available.insert(node.id);
    }
    Ok(())
}

fn check_single_assignment(graph: &Graph) -> Result<(), VerificationError> {
    let mut seen = HashSet::new();
    for input in &graph.inputs {
        if !seen.insert(input.id) {
            return Err(VerificationError {
                position: None,
                value: input.id,
                op: "input",
                kind: VerifyErrorKind::DuplicateDefinition,
            });
        }
    }
    for (position, node) in graph.nodes.iter().enumerate() {
        if !seen.insert(node.id) {
            return Err(VerificationError {
                position: Some(position),
                value: node.id,
                op: node.op.mnemonic(),
                kind: VerifyErrorKind::DuplicateDefinition,
            });
        }
    }
    Ok(())
}

fn check_types(graph: &Graph) -> Result<(), VerificationError> {
    let mut specs: HashMap<ValueId, &TensorSpec> = graph
        .inputs
        .iter()
        .map(|input| (input.id, &input.spec))
        .collect();
    for (position, node) in graph.nodes.iter().enumerate() {
        let fail = |kind| VerificationError {
            position: Some(position),
            value: node.id,
            op: node.op.mnemonic(),
            kind,
        };
        // Topology already guaranteed every operand is in the map.
        let operands = node
            .inputs
            .iter()
            .filter_map(|id| specs.get(id).copied())
            .collect::<Vec<_>>();
        let inferred =
            infer_output(&node.op, &operands).map_err(|err| fail(VerifyErrorKind::Inference(err)))?;
        if inferred != node.output {
            return Err(fail(VerifyErrorKind::TypeMismatch {
                declared: node.output.clone(),
                inferred,
            }));
        }
        specs.insert(node.id, &node.output);
    }
    Ok(())
}

fn check_outputs(graph: &Graph) -> Result<(), VerificationError> {
    if graph.outputs.is_empty() {
        return Err(VerificationError {
            position: None,
            value: ValueId(0),
            op: "return",
            kind: VerifyErrorKind::NoOutputs,
        });
    }
    for &output in &graph.outputs {
        if graph.value_spec(output).is_none() {
            return Err(VerificationError {
                position: None,
                value: output,
                op: "return",
                kind: VerifyErrorKind::MissingOutput,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GraphBuilder;
    use crate::ir::{DType, ElementwiseUnaryOp, Node, Operation};

    fn small_graph() -> Graph {
        let mut builder = GraphBuilder::new("small");
        let x = builder.input(&[2, 3], DType::F32).unwrap();
        let y = builder.relu(x).unwrap();
        let z = builder.exp(y).unwrap();
        builder.finish(&[z]).unwrap()
    }

    #[test]
    fn built_graphs_verify() {
        verify(&small_graph()).unwrap();
    }

    #[test]
    fn forward_reference_is_reported_with_position() {
        let mut graph = small_graph();
        graph.nodes.swap(0, 1);
        let err = verify(&graph).unwrap_err();
        assert_eq!(err.position, Some(0));
        assert_eq!(err.op, "exp");
        assert_eq!(
            err.kind,
            VerifyErrorKind::ForwardReference {
                operand: ValueId(1)
            }
        );
    }

    #[test]
    fn duplicate_definition_is_rejected() {
        let mut graph = small_graph();
        let mut dup = graph.nodes[1].clone();
        dup.inputs = vec![ValueId(0)];
        dup.op = Operation::ElementwiseUnary(ElementwiseUnaryOp::Neg);
        graph.nodes.push(dup);
        let err = verify(&graph).unwrap_err();
        assert_eq!(err.position, Some(2));
        assert_eq!(err.kind, VerifyErrorKind::DuplicateDefinition);
    }

    #[test]
    fn tampered_result_type_is_caught() {
        let mut graph = small_graph();
        graph.nodes[1].output = TensorSpec::new(DType::F32, vec![3, 2]);
        let err = verify(&graph).unwrap_err();
        assert_eq!(err.position, Some(1));
        assert!(matches!(err.kind, VerifyErrorKind::TypeMismatch { .. }));
    }

    #[test]
    fn tampered_arity_is_caught() {
        let mut graph = small_graph();
        graph.nodes.push(Node {
            id: ValueId(3),
            op: Operation::Matmul,
            inputs: vec![ValueId(2)],
            output: TensorSpec::new(DType::F32, vec![2, 3]),
        });
        let err = verify(&graph).unwrap_err();
        assert!(matches!(
            err.kind,
            VerifyErrorKind::Inference(BuildError::Arity { expected: 2, found: 1, .. })
        ));
    }

    #[test]
    fn outputs_must_exist() {
        let mut graph = small_graph();
        graph.outputs = vec![ValueId(42)];
        let err = verify(&graph).unwrap_err();
        assert_eq!(err.kind, VerifyErrorKind::MissingOutput);
        assert_eq!(err.value, ValueId(42));

        graph.outputs.clear();
        assert_eq!(verify(&graph).unwrap_err().kind, VerifyErrorKind::NoOutputs);
    }
}
