use ttir_rs::builder::GraphBuilder;
use ttir_rs::error::BuildError;
use ttir_rs::ir::{DType, Operation, TensorSpec};

#[test]
fn mnist_layer_shapes() {
    let mut b = GraphBuilder::new("mlp");
    let x = b.input(&[1, 784], DType::F32).unwrap();
    let w = b.input(&[784, 256], DType::F32).unwrap();
    let bias = b.input(&[1, 256], DType::F32).unwrap();

    let h = b.matmul(x, w).unwrap();
    assert_eq!(b.spec(&h).unwrap(), &TensorSpec::new(DType::F32, vec![1, 256]));
    let h = b.add(h, bias).unwrap();
    let h = b.relu(h).unwrap();
    let probs = b.softmax(h, -1).unwrap();
    assert_eq!(b.spec(&probs).unwrap().dims(), &[1, 256]);

    let graph = b.finish(&[probs]).unwrap();
    assert_eq!(graph.inputs.len(), 3);
    assert_eq!(graph.nodes.len(), 4);
    assert_eq!(graph.inputs[2].name, "in2");
    assert!(matches!(graph.nodes[0].op, Operation::Matmul));
}

#[test]
fn data_movement_shapes() {
    let mut b = GraphBuilder::new("movement");
    let a = b.input(&[1, 1, 12, 12], DType::F32).unwrap();
    let c = b.concat(&[a, a], -1).unwrap();
    assert_eq!(b.spec(&c).unwrap().dims(), &[1, 1, 12, 24]);

    let v = b.input(&[50, 1, 1], DType::F32).unwrap();
    let s = b.squeeze(v, -1).unwrap();
    assert_eq!(b.spec(&s).unwrap().dims(), &[50, 1]);
    let u = b.unsqueeze(s, 0).unwrap();
    assert_eq!(b.spec(&u).unwrap().dims(), &[1, 50, 1]);

    let t = b.transpose(a, -3, -2).unwrap();
    assert_eq!(b.spec(&t).unwrap().dims(), &[1, 1, 12, 12]);

    let r = b.reshape(c, &[12, -1]).unwrap();
    assert_eq!(b.spec(&r).unwrap().dims(), &[12, 24]);

    let p = b.permute(c, &[3, 2, 1, 0]).unwrap();
    assert_eq!(b.spec(&p).unwrap().dims(), &[24, 12, 1, 1]);
}

#[test]
fn rejected_calls_leave_graph_untouched() {
    let mut b = GraphBuilder::new("errors");
    let x = b.input(&[1, 784], DType::F32).unwrap();
    let w = b.input(&[256, 10], DType::F32).unwrap();
    let before = b.graph().nodes.len();

    let err = b.matmul(x, w).unwrap_err();
    assert!(matches!(err, BuildError::ShapeMismatch { op: "matmul", .. }), "{err}");
    assert_eq!(b.graph().nodes.len(), before);

    let err = b.transpose(x, 0, 0).unwrap_err();
    assert!(matches!(err, BuildError::InvalidAttribute { .. }), "{err}");

    let err = b.softmax(x, 2).unwrap_err();
    assert!(matches!(err, BuildError::InvalidAttribute { .. }), "{err}");

    let err = b.concat(&[], 0).unwrap_err();
    assert_eq!(
        err,
        BuildError::Arity {
            op: "concat",
            expected: 1,
            found: 0
        }
    );

    let err = b.reshape(x, &[-1, -1]).unwrap_err();
    assert!(matches!(err, BuildError::InvalidShape { .. }), "{err}");
    assert_eq!(b.graph().nodes.len(), before);
}

#[test]
fn operands_cannot_cross_graphs() {
    let mut first = GraphBuilder::new("first");
    let mut second = GraphBuilder::new("second");
    let a = first.input(&[4], DType::F32).unwrap();
    let b = second.input(&[4], DType::F32).unwrap();

    let err = second.add(b, a).unwrap_err();
    assert!(matches!(err, BuildError::UnknownOperand { .. }), "{err}");
}

#[test]
fn squeeze_drops_a_unit_leading_dim() {
    let mut b = GraphBuilder::new("squeeze");
    let x = b.input(&[1, 50, 1], DType::F32).unwrap();
    let y = b.squeeze(x, 0).unwrap();
    assert_eq!(b.spec(&y).unwrap().dims(), &[50, 1]);

    let before = b.graph().nodes.len();
    let err = b.squeeze(x, 1).unwrap_err();
    assert!(matches!(err, BuildError::InvalidAttribute { op: "squeeze", .. }), "{err}");
    assert_eq!(b.graph().nodes.len(), before);
}

#[test]
fn concat_operands_must_agree_off_axis() {
    let mut b = GraphBuilder::new("concat");
    let x = b.input(&[1, 1, 12, 12], DType::F32).unwrap();
    let y = b.input(&[1, 2, 12, 12], DType::F32).unwrap();

    let err = b.concat(&[x, y], -1).unwrap_err();
    assert!(matches!(err, BuildError::ShapeMismatch { op: "concat", .. }), "{err}");

    let joined = b.concat(&[x, y], 1).unwrap();
    assert_eq!(b.spec(&joined).unwrap().dims(), &[1, 3, 12, 12]);
}

#[test]
fn transpose_axes_must_be_in_range() {
    let mut b = GraphBuilder::new("transpose");
    let x = b.input(&[2, 3], DType::F32).unwrap();
    for (dim0, dim1) in [(0, 2), (-3, 1), (5, 0)] {
        let err = b.transpose(x, dim0, dim1).unwrap_err();
        assert!(
            matches!(err, BuildError::InvalidAttribute { op: "transpose", .. }),
            "({dim0}, {dim1}): {err}"
        );
    }
    assert!(b.graph().nodes.is_empty());
}
