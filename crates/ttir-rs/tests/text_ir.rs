use ttir_rs::builder::GraphBuilder;
use ttir_rs::compile::build_graph;
use ttir_rs::golden::all_cases;
use ttir_rs::ir::DType;
use ttir_rs::text_ir::{parse_module, ParseError, KNOWN_DIALECTS};

#[test]
fn golden_dumps_parse_back_to_the_same_graph() {
    for case in all_cases() {
        let graph = build_graph(case).unwrap();
        let text = graph.to_text();
        let module = parse_module(&text, KNOWN_DIALECTS)
            .unwrap_or_else(|err| panic!("{}: {err}\n{text}", case.name));
        assert_eq!(module.graph, graph, "{}", case.name);
        assert_eq!(module.graph.to_text(), text);
        assert_eq!(module.dialects, vec!["ttir".to_string()]);
    }
}

#[test]
fn attributes_survive_the_text_form() {
    let mut b = GraphBuilder::new("attrs");
    let x = b.input(&[2, 3, 4], DType::F32).unwrap();
    let m = b.mean(x, &[-1, 0], false).unwrap();
    let f = b.full(&[3], DType::F32, 0.5).unwrap();
    let y = b.multiply(m, f).unwrap();
    let p = b.permute(x, &[2, 0, 1]).unwrap();
    let c = b.typecast(p, DType::Bf16).unwrap();
    let graph = b.finish(&[y, c]).unwrap();

    let module = parse_module(&graph.to_text(), KNOWN_DIALECTS).unwrap();
    assert_eq!(module.graph, graph);
}

#[test]
fn malformed_modules_report_a_line() {
    let src = "func @f(%0: tensor<4xf32> {name = \"in0\"}) -> (tensor<4xf32>) {\n  %1 = ttir.frobnicate %0 -> tensor<4xf32>\n  return %1\n}\n";
    let err = parse_module(src, KNOWN_DIALECTS).unwrap_err();
    assert!(matches!(err, ParseError::Syntax { line: 2, .. }), "{err}");

    let src = "func @f(%0: tensor<4xf32> {name = \"in0\"}) -> (tensor<8xf32>) {\n  %1 = ttir.relu %0 -> tensor<8xf32>\n  return %1\n}\n";
    let err = parse_module(src, KNOWN_DIALECTS).unwrap_err();
    assert!(
        matches!(err, ParseError::Syntax { line: 2, .. } | ParseError::Build { line: 2, .. }),
        "{err}"
    );
}
