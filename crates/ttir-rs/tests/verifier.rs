use ttir_rs::builder::GraphBuilder;
use ttir_rs::compile::build_graph;
use ttir_rs::golden::all_cases;
use ttir_rs::ir::{DType, Graph, TensorSpec, ValueId};
use ttir_rs::verify::{verify, VerifyErrorKind};

fn chain() -> Graph {
    let mut b = GraphBuilder::new("chain");
    let x = b.input(&[2, 8], DType::F32).unwrap();
    let e = b.exp(x).unwrap();
    let s = b.sum(e, &[-1], true).unwrap();
    let out = b.divide(e, s).unwrap();
    b.finish(&[out]).unwrap()
}

#[test]
fn golden_graphs_verify() {
    for case in all_cases() {
        let graph = build_graph(case).unwrap();
        verify(&graph).unwrap_or_else(|err| panic!("{}: {err}", case.name));
    }
}

#[test]
fn reordered_nodes_are_forward_references() {
    let mut graph = chain();
    graph.nodes.swap(0, 1);
    let err = verify(&graph).unwrap_err();
    assert_eq!(err.position, Some(0));
    assert!(
        matches!(err.kind, VerifyErrorKind::ForwardReference { .. }),
        "{err}"
    );
}

#[test]
fn tampered_result_type_is_caught() {
    let mut graph = chain();
    graph.nodes[1].output = TensorSpec::new(DType::F32, vec![2, 8]);
    let err = verify(&graph).unwrap_err();
    assert_eq!(err.position, Some(1));
    assert_eq!(err.op, "sum");
    assert!(matches!(err.kind, VerifyErrorKind::TypeMismatch { .. }), "{err}");
}

#[test]
fn return_list_is_checked() {
    let mut graph = chain();
    graph.outputs = vec![ValueId(42)];
    let err = verify(&graph).unwrap_err();
    assert_eq!(err.kind, VerifyErrorKind::MissingOutput);

    graph.outputs.clear();
    let err = verify(&graph).unwrap_err();
    assert_eq!(err.kind, VerifyErrorKind::NoOutputs);
}
