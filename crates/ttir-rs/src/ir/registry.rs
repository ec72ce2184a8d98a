//! Operand/type registry owning the graph under construction.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::BuildError;

use super::spec::{DType, Graph, GraphInput, Node, Operation, TensorSpec, ValueId};

static GRAPH_ID_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Process-unique identity of one graph under construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphId(u32);

/// Handle to a tensor value of one specific graph.
///
/// Handles are cheap to copy and carry the owning graph's identity, so passing a handle minted by
/// another builder is detected instead of silently aliasing a value with the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Operand {
    graph: GraphId,
    id: ValueId,
}

impl Operand {
    pub fn id(&self) -> ValueId {
        self.id
    }

    pub fn graph(&self) -> GraphId {
        self.graph
    }
}

/// Where a value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Producer {
    /// Declared graph input at this position.
    Input(usize),
    /// Output of the node at this position.
    Node(usize),
}

/// Mints value ids and records the spec and producer of every value in one graph.
#[derive(Debug)]
pub struct OperandRegistry {
    graph_id: GraphId,
    graph: Graph,
    specs: Vec<TensorSpec>,
    producers: Vec<Producer>,
}

impl OperandRegistry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            graph_id: GraphId(GRAPH_ID_COUNTER.fetch_add(1, Ordering::Relaxed)),
            graph: Graph::new(name),
            specs: Vec::new(),
            producers: Vec::new(),
        }
    }

    pub fn graph_id(&self) -> GraphId {
        self.graph_id
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Number of values minted so far (inputs and node outputs).
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    fn next_id(&self) -> ValueId {
        ValueId(self.specs.len() as u32)
    }

    /// Registers a graph input. Inputs must have rank >= 1.
    pub fn declare_input(
        &mut self,
        name: impl Into<String>,
        spec: TensorSpec,
    ) -> Result<Operand, BuildError> {
        if spec.rank() == 0 {
            return Err(BuildError::shape("input", "graph inputs must have rank >= 1"));
        }
        let id = self.next_id();
        self.graph.inputs.push(GraphInput {
            id,
            name: name.into(),
            spec: spec.clone(),
        });
        self.specs.push(spec);
        self.producers.push(Producer::Input(self.graph.inputs.len() - 1));
        Ok(Operand {
            graph: self.graph_id,
            id,
        })
    }

    /// Registers a graph input from signed extents, rejecting negative dimensions.
    pub fn declare_input_dims(
        &mut self,
        name: impl Into<String>,
        dims: &[i64],
        dtype: DType,
    ) -> Result<Operand, BuildError> {
        let dims = dims
            .iter()
            .map(|&dim| {
                usize::try_from(dim).map_err(|_| {
                    BuildError::shape("input", format!("dimension {dim} is negative"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.declare_input(name, TensorSpec::new(dtype, dims))
    }

    /// Checks that `operand` was minted by this registry.
    pub fn check(&self, operand: &Operand) -> Result<(), BuildError> {
        if operand.graph != self.graph_id || operand.id.index() >= self.specs.len() {
            return Err(BuildError::UnknownOperand {
                value: operand.id.0,
                graph: self.graph.name.clone(),
            });
        }
        Ok(())
    }

    pub fn spec(&self, operand: &Operand) -> Result<&TensorSpec, BuildError> {
        self.check(operand)?;
        Ok(&self.specs[operand.id.index()])
    }

    pub fn producer(&self, operand: &Operand) -> Result<Producer, BuildError> {
        self.check(operand)?;
        Ok(self.producers[operand.id.index()])
    }

    /// Appends a node whose output spec was already inferred and returns the new operand.
    pub fn record(
        &mut self,
        op: Operation,
        inputs: &[Operand],
        output: TensorSpec,
    ) -> Result<Operand, BuildError> {
        for operand in inputs {
            self.check(operand)?;
        }
        let id = self.next_id();
        self.graph.nodes.push(Node {
            id,
            op,
            inputs: inputs.iter().map(Operand::id).collect(),
            output: output.clone(),
        });
        self.specs.push(output);
        self.producers.push(Producer::Node(self.graph.nodes.len() - 1));
        Ok(Operand {
            graph: self.graph_id,
            id,
        })
    }

    /// Declares the graph outputs and hands the graph over.
    pub fn finish(mut self, outputs: &[Operand]) -> Result<Graph, BuildError> {
        if outputs.is_empty() {
            return Err(BuildError::attribute(
                "return",
                "a graph must declare at least one output",
            ));
        }
        for operand in outputs {
            self.check(operand)?;
        }
        self.graph.outputs = outputs.iter().map(Operand::id).collect();
        Ok(self.graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_assigned_monotonically() {
        let mut registry = OperandRegistry::new("g");
        let a = registry
            .declare_input("in0", TensorSpec::new(DType::F32, vec![2, 2]))
            .unwrap();
        let b = registry
            .declare_input("in1", TensorSpec::new(DType::F32, vec![2, 2]))
            .unwrap();
        assert_eq!(a.id(), ValueId(0));
        assert_eq!(b.id(), ValueId(1));
        assert_eq!(registry.producer(&b).unwrap(), Producer::Input(1));
    }

    #[test]
    fn foreign_operands_are_rejected() {
        let mut first = OperandRegistry::new("first");
        let mut second = OperandRegistry::new("second");
        let foreign = first
            .declare_input("in0", TensorSpec::new(DType::F32, vec![4]))
            .unwrap();
        second
            .declare_input("in0", TensorSpec::new(DType::F32, vec![4]))
            .unwrap();
        let err = second
            .record(
                Operation::ElementwiseUnary(crate::ir::ElementwiseUnaryOp::Relu),
                &[foreign],
                TensorSpec::new(DType::F32, vec![4]),
            )
            .unwrap_err();
        assert!(matches!(err, BuildError::UnknownOperand { value: 0, .. }));
        assert!(second.graph().nodes.is_empty());
    }

    #[test]
    fn negative_dims_are_rejected() {
        let mut registry = OperandRegistry::new("g");
        let err = registry
            .declare_input_dims("in0", &[1, -784], DType::F32)
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidShape { op: "input", .. }));
        let ok = registry
            .declare_input_dims("in0", &[1, 784], DType::F32)
            .unwrap();
        assert_eq!(registry.spec(&ok).unwrap().dims(), &[1, 784]);
    }

    #[test]
    fn rank_zero_inputs_are_rejected() {
        let mut registry = OperandRegistry::new("g");
        let err = registry
            .declare_input("in0", TensorSpec::new(DType::F32, Vec::new()))
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidShape { .. }));
        assert!(registry.is_empty());
    }
}
