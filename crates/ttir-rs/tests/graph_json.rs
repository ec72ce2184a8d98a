use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use ttir_rs::compile::{build_graph, compile_module_file, run_cases, CompileOptions};
use ttir_rs::golden::{all_cases, find_case};
use ttir_rs::ir::{Graph, GraphSerdeError, SPEC_VERSION};

fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "ttir_rs_{tag}_{}",
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis()
    ));
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn save_then_load_restores_the_graph() {
    let dir = temp_dir("graph_json");
    for case in all_cases() {
        let graph = build_graph(case).unwrap();
        let path = dir.join(format!("{}.graph.json", case.name));
        graph.save_json(&path).unwrap();
        let loaded = Graph::load_json(&path).unwrap();
        assert_eq!(loaded, graph, "{}", case.name);
        assert_eq!(loaded.spec_version, SPEC_VERSION);
    }
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn foreign_spec_version_is_rejected() {
    let graph = build_graph(find_case("test_mnist").unwrap()).unwrap();
    let json = graph
        .to_json_string()
        .unwrap()
        .replace(SPEC_VERSION, "ttir.v9");
    match Graph::from_json_str(&json) {
        Err(GraphSerdeError::SpecVersionMismatch { found, expected }) => {
            assert_eq!(found, "ttir.v9");
            assert_eq!(expected, SPEC_VERSION);
        }
        other => panic!("expected version mismatch, got {other:?}"),
    }
    assert!(matches!(
        Graph::from_json_str("{\"name\": 3}"),
        Err(GraphSerdeError::Json(_))
    ));
}

#[test]
fn exported_graph_compiles_again() {
    let export_dir = temp_dir("graph_json_export");
    let options = CompileOptions::default()
        .with_output_dir(&export_dir)
        .with_graph_json(true);
    run_cases(all_cases(), Some("mnist"), &options).unwrap();

    let rebuild_dir = temp_dir("graph_json_rebuild");
    let options = CompileOptions::default().with_output_dir(&rebuild_dir);
    let report = compile_module_file(&export_dir.join("test_mnist.graph.json"), &options);
    assert!(report.succeeded(), "{report:?}");
    assert_eq!(report.case, "test_mnist");
    assert!(rebuild_dir.join("test_mnist_ttnn.ttb").exists());

    let report = compile_module_file(&export_dir.join("missing.graph.json"), &options);
    assert_eq!(report.error.unwrap().stage, "io");

    fs::remove_dir_all(&export_dir).unwrap();
    fs::remove_dir_all(&rebuild_dir).unwrap();
}
