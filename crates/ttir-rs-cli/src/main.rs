use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use ttir_rs::compile::{compile_module_file, run_cases, CaseReport, CompileOptions, TargetOutcome};
use ttir_rs::flatbuffer::read_artifact;
use ttir_rs::golden::all_cases;
use ttir_rs::lower::list_targets;

#[derive(Parser, Debug)]
#[command(name = "ttir-rs")]
#[command(version, about = "Compile tensor graphs to target artifacts")]
struct Cli {
    #[command(flatten)]
    run: RunArgs,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Output directory for artifacts and dumps; created if missing
    #[arg(long, global = true, env = "TTIR_OUTPUT_DIR")]
    path: Option<PathBuf>,

    /// Only compile cases whose name contains this string
    #[arg(long)]
    filter: Option<String>,

    /// Override the targets of every case (repeatable)
    #[arg(long = "target", global = true)]
    targets: Vec<String>,

    /// Write text dumps for every case
    #[arg(long, global = true)]
    module_dump: bool,

    /// Lower targets of a case on separate threads
    #[arg(long, global = true)]
    parallel: bool,

    /// Also write the source graph as JSON
    #[arg(long, global = true)]
    emit_json: bool,

    /// Write a JSON run report to this file
    #[arg(long, global = true)]
    report: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registered cases and targets
    #[command(alias = "ls")]
    List,
    /// Decode an artifact and print its contents
    Inspect { file: PathBuf },
    /// Compile a `ttir` text dump or a `.graph.json` export
    Parse { file: PathBuf },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let options = compile_options(&cli.run);
    let reports = match cli.command {
        Some(Command::List) => return list(),
        Some(Command::Inspect { file }) => return inspect(&file),
        Some(Command::Parse { file }) => {
            options.prepare_output_dir()?;
            vec![compile_module_file(&file, &options)]
        }
        None => run_cases(all_cases(), cli.run.filter.as_deref(), &options)?,
    };

    print_summary(&reports);
    if let Some(path) = &cli.run.report {
        let json = serde_json::to_string_pretty(&reports)?;
        fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    }

    let failed = reports.iter().filter(|report| !report.succeeded()).count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} case(s) failed", reports.len());
    }
    Ok(())
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .init();
}

fn compile_options(args: &RunArgs) -> CompileOptions {
    let mut options = CompileOptions::from_env()
        .with_parallel_targets(args.parallel)
        .with_graph_json(args.emit_json);
    if let Some(path) = &args.path {
        options = options.with_output_dir(path);
    }
    if args.module_dump {
        options = options.with_module_dump(true);
    }
    if !args.targets.is_empty() {
        options = options.with_targets(args.targets.clone());
    }
    options
}

fn list() -> Result<()> {
    println!("cases:");
    for case in all_cases() {
        println!(
            "  {:<24} inputs={:<3} targets={}",
            case.name,
            case.inputs.len(),
            case.targets.join(",")
        );
    }
    println!("targets: {}", list_targets().join(", "));
    Ok(())
}

fn inspect(path: &Path) -> Result<()> {
    let artifact =
        read_artifact(path).with_context(|| format!("failed to read {}", path.display()))?;
    print!("{artifact}");
    Ok(())
}

fn print_summary(reports: &[CaseReport]) {
    for report in reports {
        if let Some(err) = &report.error {
            println!("FAIL {} [{}] {}", report.case, err.stage, err.error);
            continue;
        }
        for target in &report.targets {
            match &target.outcome {
                TargetOutcome::Compiled {
                    artifact,
                    bytes,
                    nodes,
                } => println!(
                    "ok   {} -> {} ({nodes} nodes, {bytes} bytes) {}",
                    report.case,
                    target.target,
                    artifact.display()
                ),
                TargetOutcome::Failed { stage, error } => println!(
                    "FAIL {} -> {} [{stage}] {error}",
                    report.case, target.target
                ),
            }
        }
    }
}
