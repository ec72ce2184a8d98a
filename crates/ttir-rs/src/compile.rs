//! Compilation driver: build, verify, lower and serialize golden cases.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::builder::GraphBuilder;
use crate::env;
use crate::error::{CompileError, CompileResult};
use crate::flatbuffer::write_artifact;
use crate::golden::ModelCase;
use crate::ir::{DType, Graph, Node};
use crate::lower::{lower_for, walk_graph, GraphVisitor};
use crate::text_ir::{parse_module_file, KNOWN_DIALECTS};
use crate::verify::verify;

pub const ARTIFACT_EXTENSION: &str = "ttb";

#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub output_dir: PathBuf,
    /// Write text dumps for every case, not only the ones that ask for it.
    pub module_dump: bool,
    /// Replaces each case's own target list when set.
    pub targets: Option<Vec<String>>,
    pub parallel_targets: bool,
    pub emit_graph_json: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            module_dump: false,
            targets: None,
            parallel_targets: false,
            emit_graph_json: false,
        }
    }
}

impl CompileOptions {
    /// Defaults overridden by `TTIR_OUTPUT_DIR`, `TTIR_MODULE_DUMP` and `TTIR_TARGETS`.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Some(dir) = env::output_dir() {
            options.output_dir = dir;
        }
        options.module_dump = env::module_dump_enabled();
        options.targets = env::targets_override();
        options
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_module_dump(mut self, enabled: bool) -> Self {
        self.module_dump = enabled;
        self
    }

    pub fn with_targets(mut self, targets: Vec<String>) -> Self {
        self.targets = (!targets.is_empty()).then_some(targets);
        self
    }

    pub fn with_parallel_targets(mut self, enabled: bool) -> Self {
        self.parallel_targets = enabled;
        self
    }

    pub fn with_graph_json(mut self, enabled: bool) -> Self {
        self.emit_graph_json = enabled;
        self
    }

    /// Creates the output directory if it does not exist yet.
    pub fn prepare_output_dir(&self) -> CompileResult<()> {
        fs::create_dir_all(&self.output_dir).map_err(|source| CompileError::Io {
            path: self.output_dir.clone(),
            source,
        })
    }

    pub fn artifact_path(&self, case: &str, target: &str) -> PathBuf {
        self.output_dir
            .join(format!("{case}_{target}.{ARTIFACT_EXTENSION}"))
    }

    fn source_dump_path(&self, case: &str) -> PathBuf {
        self.output_dir.join(format!("{case}.ttir.mlir"))
    }

    fn target_dump_path(&self, case: &str, target: &str) -> PathBuf {
        self.output_dir.join(format!("{case}.{target}.mlir"))
    }

    fn graph_json_path(&self, case: &str) -> PathBuf {
        self.output_dir.join(format!("{case}.graph.json"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TargetOutcome {
    Compiled {
        artifact: PathBuf,
        bytes: usize,
        nodes: usize,
    },
    Failed {
        stage: String,
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetReport {
    pub target: String,
    #[serde(flatten)]
    pub outcome: TargetOutcome,
}

impl TargetReport {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, TargetOutcome::Compiled { .. })
    }

    fn failed(target: &str, err: &CompileError) -> Self {
        Self {
            target: target.to_string(),
            outcome: TargetOutcome::Failed {
                stage: err.stage().to_string(),
                error: err.to_string(),
            },
        }
    }
}

/// Case-level failure raised before any target ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    pub stage: String,
    pub error: String,
}

impl From<&CompileError> for StageError {
    fn from(err: &CompileError) -> Self {
        Self {
            stage: err.stage().to_string(),
            error: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseReport {
    pub case: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StageError>,
    pub source_nodes: usize,
    /// Source op mnemonic -> occurrences.
    pub ops: BTreeMap<String, usize>,
    pub targets: Vec<TargetReport>,
}

impl CaseReport {
    fn new(case: &str) -> Self {
        Self {
            case: case.to_string(),
            error: None,
            source_nodes: 0,
            ops: BTreeMap::new(),
            targets: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.targets.iter().all(TargetReport::succeeded)
    }

    fn fail(mut self, err: CompileError) -> Self {
        tracing::warn!(case = %self.case, stage = err.stage(), error = %err, "case failed");
        self.error = Some(StageError::from(&err));
        self
    }
}

#[derive(Default)]
struct OpHistogram {
    counts: BTreeMap<String, usize>,
}

impl GraphVisitor for OpHistogram {
    fn on_node(&mut self, _index: usize, node: &Node) {
        *self
            .counts
            .entry(node.op.mnemonic().to_string())
            .or_default() += 1;
    }
}

/// Instantiates `case` with `f32` inputs named `in0..inN`.
pub fn build_graph(case: &ModelCase) -> CompileResult<Graph> {
    let mut builder = GraphBuilder::new(case.name);
    let mut args = Vec::with_capacity(case.inputs.len());
    for dims in case.inputs {
        args.push(builder.input(dims, DType::F32)?);
    }
    let outputs = (case.build)(&mut builder, &args)?;
    Ok(builder.finish(&outputs)?)
}

/// Verifies `graph` and compiles it for each of `targets`.
///
/// A target failure is recorded in its report and does not stop the remaining targets.
/// Only failures shared by every target (verification, source dumps) are returned as errors.
pub fn compile_graph(
    graph: &Graph,
    targets: &[String],
    options: &CompileOptions,
    module_dump: bool,
) -> CompileResult<Vec<TargetReport>> {
    verify(graph)?;

    if module_dump {
        write_text(&options.source_dump_path(&graph.name), &graph.to_text())?;
    }
    if options.emit_graph_json {
        graph.save_json(options.graph_json_path(&graph.name))?;
    }

    let reports = if options.parallel_targets && targets.len() > 1 {
        std::thread::scope(|scope| {
            let handles = targets
                .iter()
                .map(|target| {
                    let handle =
                        scope.spawn(move || compile_target(graph, target, options, module_dump));
                    (target, handle)
                })
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|(target, handle)| {
                    handle.join().unwrap_or_else(|_| TargetReport {
                        target: target.clone(),
                        outcome: TargetOutcome::Failed {
                            stage: "lower".to_string(),
                            error: "compilation thread panicked".to_string(),
                        },
                    })
                })
                .collect()
        })
    } else {
        targets
            .iter()
            .map(|target| compile_target(graph, target, options, module_dump))
            .collect()
    };
    Ok(reports)
}

fn compile_target(
    graph: &Graph,
    target: &str,
    options: &CompileOptions,
    module_dump: bool,
) -> TargetReport {
    let _span = tracing::debug_span!("compile_target", graph = %graph.name, target).entered();
    let result = (|| -> CompileResult<TargetOutcome> {
        let lowered = lower_for(graph, target)?;
        if module_dump {
            write_text(
                &options.target_dump_path(&graph.name, target),
                &lowered.to_text(),
            )?;
        }
        let artifact = options.artifact_path(&graph.name, target);
        let bytes = write_artifact(&lowered, &artifact)?;
        Ok(TargetOutcome::Compiled {
            artifact,
            bytes,
            nodes: lowered.nodes.len(),
        })
    })();

    match result {
        Ok(outcome) => {
            tracing::info!(graph = %graph.name, target, "compiled");
            TargetReport {
                target: target.to_string(),
                outcome,
            }
        }
        Err(err) => {
            tracing::warn!(
                graph = %graph.name,
                target,
                stage = err.stage(),
                error = %err,
                "target failed"
            );
            TargetReport::failed(target, &err)
        }
    }
}

fn summarize(graph: &Graph, report: &mut CaseReport) {
    let mut histogram = OpHistogram::default();
    walk_graph(graph, &mut histogram);
    report.source_nodes = graph.nodes.len();
    report.ops = histogram.counts;
}

fn resolve_targets(own: &[&str], options: &CompileOptions) -> Vec<String> {
    match &options.targets {
        Some(targets) => targets.clone(),
        None => own.iter().map(|target| target.to_string()).collect(),
    }
}

/// Builds and compiles one golden case. Never fails: errors end up in the report.
pub fn compile_case(case: &ModelCase, options: &CompileOptions) -> CaseReport {
    let _span = tracing::info_span!("case", name = case.name).entered();
    let report = CaseReport::new(case.name);
    let graph = match build_graph(case) {
        Ok(graph) => graph,
        Err(err) => return report.fail(err),
    };
    compile_into(
        report,
        &graph,
        &resolve_targets(case.targets, options),
        options,
        case.module_dump || options.module_dump,
    )
}

/// Loads a module and compiles it like a golden case named after its function.
///
/// `.json` files are graph exports (see [`CompileOptions::with_graph_json`]); anything else is
/// parsed as a `ttir` text dump.
pub fn compile_module_file(path: &Path, options: &CompileOptions) -> CaseReport {
    let graph = match load_module(path) {
        Ok(graph) => graph,
        Err(err) => {
            let name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            return CaseReport::new(&name).fail(err);
        }
    };
    let targets = resolve_targets(&["ttnn"], options);
    compile_into(
        CaseReport::new(&graph.name),
        &graph,
        &targets,
        options,
        options.module_dump,
    )
}

fn load_module(path: &Path) -> CompileResult<Graph> {
    if path.extension().is_some_and(|ext| ext == "json") {
        return Ok(Graph::load_json(path)?);
    }
    Ok(parse_module_file(path, KNOWN_DIALECTS)?.graph)
}

fn compile_into(
    mut report: CaseReport,
    graph: &Graph,
    targets: &[String],
    options: &CompileOptions,
    module_dump: bool,
) -> CaseReport {
    summarize(graph, &mut report);
    match compile_graph(graph, targets, options, module_dump) {
        Ok(targets) => {
            report.targets = targets;
            report
        }
        Err(err) => report.fail(err),
    }
}

/// Compiles every case whose name starts with `test_` and passes `filter`.
pub fn run_cases<'a>(
    cases: impl IntoIterator<Item = &'a ModelCase>,
    filter: Option<&str>,
    options: &CompileOptions,
) -> CompileResult<Vec<CaseReport>> {
    options.prepare_output_dir()?;
    let reports = cases
        .into_iter()
        .filter(|case| case.name.starts_with("test_"))
        .filter(|case| filter.map_or(true, |pattern| case.name.contains(pattern)))
        .map(|case| compile_case(case, options))
        .collect::<Vec<_>>();
    let failed = reports.iter().filter(|report| !report.succeeded()).count();
    tracing::info!(cases = reports.len(), failed, "run finished");
    Ok(reports)
}

fn write_text(path: &Path, contents: &str) -> CompileResult<()> {
    fs::write(path, contents).map_err(|source| CompileError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::golden::find_case;

    #[test]
    fn option_overrides() {
        let options = CompileOptions::default()
            .with_output_dir("/tmp/out")
            .with_targets(Vec::new());
        assert!(options.targets.is_none());
        assert_eq!(
            options.artifact_path("test_mnist", "ttnn"),
            PathBuf::from("/tmp/out/test_mnist_ttnn.ttb")
        );
        assert_eq!(
            resolve_targets(&["ttnn"], &options.with_targets(vec!["ttmetal".into()])),
            vec!["ttmetal".to_string()]
        );
    }

    #[test]
    fn mnist_histogram() {
        let case = find_case("test_mnist").expect("mnist registered");
        let graph = build_graph(case).expect("build");
        let mut report = CaseReport::new(case.name);
        summarize(&graph, &mut report);
        assert_eq!(report.source_nodes, 6);
        assert_eq!(report.ops.get("matmul"), Some(&2));
        assert_eq!(report.ops.get("add"), Some(&2));
        assert_eq!(report.ops.get("softmax"), Some(&1));
    }
}
