use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use ttir_rs::compile::{compile_case, run_cases, CompileOptions, TargetOutcome};
use ttir_rs::flatbuffer::read_artifact;
use ttir_rs::golden::{all_cases, find_case};

fn temp_dir(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "ttir_rs_{tag}_{}",
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis()
    ))
}

#[test]
fn every_case_compiles_for_every_target() {
    let dir = temp_dir("golden");
    let options = CompileOptions::default()
        .with_output_dir(&dir)
        .with_parallel_targets(true);
    let reports = run_cases(all_cases(), None, &options).unwrap();
    assert_eq!(reports.len(), all_cases().len());

    for report in &reports {
        assert!(report.succeeded(), "{report:?}");
        assert_eq!(report.targets.len(), 2);
        for target in &report.targets {
            let TargetOutcome::Compiled { artifact, bytes, .. } = &target.outcome else {
                panic!("{} / {} failed", report.case, target.target);
            };
            assert_eq!(
                artifact,
                &dir.join(format!("{}_{}.ttb", report.case, target.target))
            );
            assert!(*bytes > 8);
            let decoded = read_artifact(artifact).unwrap();
            assert_eq!(decoded.name, report.case);
        }
    }

    // Only the attention case asks for text dumps.
    assert!(dir.join("test_llama_attention.ttir.mlir").exists());
    assert!(dir.join("test_llama_attention.ttnn.mlir").exists());
    assert!(dir.join("test_llama_attention.ttmetal.mlir").exists());
    assert!(!dir.join("test_mnist.ttir.mlir").exists());

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn target_failures_do_not_stop_the_run() {
    let dir = temp_dir("golden_unknown");
    let options = CompileOptions::default()
        .with_output_dir(&dir)
        .with_targets(vec!["npu".to_string(), "ttnn".to_string()]);
    options.prepare_output_dir().unwrap();

    let report = compile_case(find_case("test_mnist").unwrap(), &options);
    assert!(!report.succeeded());
    assert!(report.error.is_none());
    assert_eq!(report.source_nodes, 6);
    match &report.targets[0].outcome {
        TargetOutcome::Failed { stage, error } => {
            assert_eq!(stage, "lower");
            assert!(error.contains("npu"), "{error}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(report.targets[1].succeeded());

    let json = serde_json::to_string(&report).unwrap();
    assert!(json.contains("\"status\":\"failed\""), "{json}");

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn filter_selects_cases_by_name() {
    let dir = temp_dir("golden_filter");
    let options = CompileOptions::default()
        .with_output_dir(&dir)
        .with_graph_json(true);
    let reports = run_cases(all_cases(), Some("mnist"), &options).unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].case, "test_mnist");
    assert!(dir.join("test_mnist.graph.json").exists());

    fs::remove_dir_all(&dir).unwrap();
}
