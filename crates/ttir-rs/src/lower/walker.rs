use crate::ir::{Graph, GraphInput, Node, ValueId};

pub trait GraphVisitor {
    fn on_graph(&mut self, _graph: &Graph) {}
    fn on_input(&mut self, _index: usize, _input: &GraphInput) {}
    fn on_node(&mut self, _index: usize, _node: &Node) {}
    fn on_output(&mut self, _index: usize, _value: ValueId) {}
}

/// Visits inputs, nodes in program order, then outputs.
pub fn walk_graph<V: GraphVisitor + ?Sized>(graph: &Graph, visitor: &mut V) {
    visitor.on_graph(graph);
    for (idx, input) in graph.inputs.iter().enumerate() {
        visitor.on_input(idx, input);
    }
    for (idx, node) in graph.nodes.iter().enumerate() {
        visitor.on_node(idx, node);
    }
    for (idx, value) in graph.outputs.iter().enumerate() {
        visitor.on_output(idx, *value);
    }
}
