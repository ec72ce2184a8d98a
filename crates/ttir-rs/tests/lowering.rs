use ttir_rs::builder::GraphBuilder;
use ttir_rs::compile::build_graph;
use ttir_rs::golden::find_case;
use ttir_rs::ir::{DType, Graph};
use ttir_rs::lower::{list_targets, lower_for, Layout, LoweringError, NativeKind};

fn mnist() -> Graph {
    build_graph(find_case("test_mnist").unwrap()).unwrap()
}

#[test]
fn builtin_targets_are_registered() {
    let targets = list_targets();
    assert!(targets.contains(&"ttnn".to_string()));
    assert!(targets.contains(&"ttmetal".to_string()));
}

#[test]
fn lowering_is_deterministic_and_leaves_source_alone() {
    let graph = mnist();
    let snapshot = graph.clone();
    for target in ["ttnn", "ttmetal"] {
        let first = lower_for(&graph, target).unwrap();
        let second = lower_for(&graph, target).unwrap();
        assert_eq!(first, second, "{target}");
        assert_eq!(first.to_text(), second.to_text());
    }
    assert_eq!(graph, snapshot);
}

#[test]
fn ttnn_keeps_fused_softmax_and_tiles_compute() {
    let lowered = lower_for(&mnist(), "ttnn").unwrap();
    assert_eq!(lowered.count(NativeKind::Softmax), 1);
    assert_eq!(lowered.count(NativeKind::Matmul), 2);
    assert!(lowered.count(NativeKind::ToLayout) >= 2);
    for node in &lowered.nodes {
        if node.op.kind() == NativeKind::Matmul {
            assert_eq!(node.layout, Layout::Tile);
        }
    }
    let last = lowered.nodes.last().unwrap();
    assert_eq!(last.layout, Layout::RowMajor);
    assert_eq!(lowered.outputs, vec![last.id]);
    assert_eq!(lowered.target.features.get("fused_softmax").map(String::as_str), Some("true"));
}

#[test]
fn ttmetal_decomposes_softmax_and_relu() {
    let lowered = lower_for(&mnist(), "ttmetal").unwrap();
    assert_eq!(lowered.count(NativeKind::Softmax), 0);
    assert_eq!(lowered.count(NativeKind::ToLayout), 0);
    assert_eq!(lowered.count(NativeKind::Reduce), 2);
    assert_eq!(lowered.count(NativeKind::Full), 1);
    assert!(lowered.nodes.iter().all(|node| node.layout == Layout::RowMajor));
    assert_eq!(lowered.output_specs(), mnist().output_specs());
}

#[test]
fn attention_lowers_for_both_targets() {
    let graph = build_graph(find_case("test_llama_attention").unwrap()).unwrap();
    for target in ["ttnn", "ttmetal"] {
        let lowered = lower_for(&graph, target).unwrap();
        assert_eq!(lowered.inputs.len(), 15);
        assert_eq!(lowered.output_specs()[0].dims(), &[1, 12, 3200]);
    }
    let metal = lower_for(&graph, "ttmetal").unwrap();
    assert_eq!(metal.count(NativeKind::Transpose), 0);
    assert!(metal.count(NativeKind::Permute) > 0);
}

#[test]
fn unsupported_input_is_reported_per_target() {
    let mut b = GraphBuilder::new("cast");
    let x = b.input(&[4, 4], DType::F32).unwrap();
    let y = b.typecast(x, DType::Bf16).unwrap();
    let graph = b.finish(&[y]).unwrap();

    assert!(lower_for(&graph, "ttnn").is_ok());
    let err = lower_for(&graph, "ttmetal").unwrap_err();
    assert!(
        matches!(err, LoweringError::UnsupportedOperator { node: 0, .. }),
        "{err}"
    );
    assert_eq!(
        lower_for(&graph, "npu").unwrap_err(),
        LoweringError::UnknownTarget("npu".to_string())
    );
}
