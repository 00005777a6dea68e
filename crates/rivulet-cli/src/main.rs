use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rivulet_core::{model_id, Config, Diagnostic, ModelStatus, RunReport, Severity, TestStatus};
use rivulet_engine::{preflight, write_compiled, CancellationFlag, CompiledProject, Pipeline, TaskGraph};
use rivulet_project::{NodeKind, Project};
use rivulet_warehouse::{ConnectionPool, MockWarehouse, Warehouse};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Rivulet - dependency-aware SQL transformation runner
#[derive(Parser)]
#[command(name = "rivulet")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: <project-dir>/rivulet.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Project directory containing models/, macros/ and tests/
    #[arg(short, long, global = true)]
    project_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Materialize models wave by wave, then run data tests
    Run {
        /// Node selectors (`name`, `+name`, `name+`)
        #[arg(short, long)]
        select: Vec<String>,

        /// Output file for run_results.json
        #[arg(short, long, default_value = "run_results.json")]
        output: PathBuf,

        /// Run against the mock warehouse and print the statements
        #[arg(long)]
        dry_run: bool,

        /// Cancel the run after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Run data tests against existing relations
    Test {
        #[arg(short, long)]
        select: Vec<String>,

        #[arg(short, long, default_value = "run_results.json")]
        output: PathBuf,
    },

    /// Render every model to target/compiled
    Compile {
        #[arg(short, long, default_value = "target/compiled")]
        out: PathBuf,
    },

    /// Print the execution waves
    Plan {
        #[arg(short, long)]
        select: Vec<String>,
    },

    /// Show upstream and downstream nodes of a model
    Lineage {
        /// Model name
        model: String,
    },

    /// Export the execution plan for a workflow scheduler
    ExportDag {
        #[arg(short, long, value_enum, default_value_t = DagFormat::Json)]
        format: DagFormat,

        #[arg(long, default_value = "rivulet")]
        dag_id: String,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DagFormat {
    Json,
    Airflow,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    let project_dir = cli
        .project_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));

    // Warehouse credentials may live in .env next to the project
    let _ = dotenvy::from_path(project_dir.join(".env"));

    let config = load_config(cli.config.as_deref(), &project_dir, cli.verbose)?;

    if cli.verbose {
        eprintln!("{} dialect: {:?}, threads: {}", "Using".cyan(), config.dialect, config.threads);
    }

    match cli.command {
        Commands::Run {
            select,
            output,
            dry_run,
            timeout,
        } => run_command(config, &project_dir, &select, &output, dry_run, timeout, cli.verbose).await,
        Commands::Test { select, output } => {
            test_command(config, &project_dir, &select, &output, cli.verbose).await
        }
        Commands::Compile { out } => compile_command(config, &project_dir, &out),
        Commands::Plan { select } => plan_command(config, &project_dir, &select),
        Commands::Lineage { model } => lineage_command(config, &project_dir, &model),
        Commands::ExportDag {
            format,
            dag_id,
            output,
        } => export_dag_command(config, &project_dir, format, &dag_id, output.as_deref()),
    }
}

/// Log to stderr; `RUST_LOG` wins over `--verbose`
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(path: Option<&Path>, project_dir: &Path, verbose: bool) -> Result<Config> {
    let default_path = project_dir.join("rivulet.toml");

    let mut config = if let Some(path) = path {
        Config::from_file(path)?
    } else if default_path.exists() {
        Config::from_file(&default_path)?
    } else {
        if verbose {
            eprintln!("{}", "No config file found, using defaults".yellow());
        }
        Config::default()
    };

    config.project_root = project_dir.to_path_buf();
    Ok(config)
}

fn load_project(config: Config, project_dir: &Path) -> Result<Project> {
    Project::load(project_dir, config)
        .with_context(|| format!("Failed to load project from {}", project_dir.display()))
}

/// Pre-flight the project, printing diagnostics on failure
fn compile_project(project: &Project, select: &[String]) -> Result<CompiledProject, RunReport> {
    preflight(project, select).map_err(|err| {
        eprintln!("{} {}", "✗".red(), err.to_string().red().bold());
        print_diagnostics(&err.diagnostics);
        RunReport::from_preflight(err.diagnostics)
    })
}

/// Run command - materialize models and run tests
async fn run_command(
    config: Config,
    project_dir: &Path,
    select: &[String],
    output: &Path,
    dry_run: bool,
    timeout: Option<u64>,
    verbose: bool,
) -> Result<()> {
    let project = load_project(config, project_dir)?;

    if verbose {
        eprintln!(
            "{} {} models, {} sources, {} macros",
            "Loaded".cyan(),
            project.models.len(),
            project.sources.len(),
            project.macros.len()
        );
    }

    let compiled = match compile_project(&project, select) {
        Ok(compiled) => compiled,
        Err(report) => return finish(report, output),
    };

    let mock = MockWarehouse::new();
    let warehouse: Arc<dyn Warehouse> = if dry_run {
        Arc::new(mock.clone())
    } else {
        rivulet_warehouse::connect(project.config.warehouse.as_ref())?
    };

    if verbose {
        eprintln!("{} {}...", "Connecting to".cyan(), warehouse.name());
    }
    warehouse
        .test_connection()
        .await
        .map_err(|e| anyhow::anyhow!("Connection test failed: {}", e))?;

    let pool = ConnectionPool::new(warehouse, project.config.threads);
    let pipeline = Pipeline::new(pool, &project.config);
    watch_for_cancellation(pipeline.cancellation(), timeout);

    let report = pipeline.run(&compiled).await;

    if dry_run {
        println!("{}", "Statements (dry run):".bold());
        for statement in mock.statements().await {
            println!("{};\n", statement);
        }
    }

    print_run_summary(&report);
    finish(report, output)
}

/// Test command - run tests against relations built by an earlier run
async fn test_command(
    config: Config,
    project_dir: &Path,
    select: &[String],
    output: &Path,
    verbose: bool,
) -> Result<()> {
    let project = load_project(config, project_dir)?;

    let compiled = match compile_project(&project, select) {
        Ok(compiled) => compiled,
        Err(report) => return finish(report, output),
    };

    if verbose {
        eprintln!("{} {} tests...", "Running".cyan(), compiled.tests.len());
    }

    let warehouse = rivulet_warehouse::connect(project.config.warehouse.as_ref())?;
    let pipeline = Pipeline::new(ConnectionPool::new(warehouse, project.config.threads), &project.config);
    watch_for_cancellation(pipeline.cancellation(), None);

    let report = pipeline.test_only(&compiled).await;

    print_run_summary(&report);
    finish(report, output)
}

/// Save the report and exit with its status
fn finish(report: RunReport, output: &Path) -> Result<()> {
    report
        .save_to_file(output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    eprintln!("{} {}", "Run results saved to:".green(), output.display());

    let code = report.exit_code();
    if code != 0 {
        std::process::exit(code);
    }

    Ok(())
}

/// Ctrl-C and `--timeout` both set the cancellation flag
fn watch_for_cancellation(cancel: CancellationFlag, timeout: Option<u64>) {
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted, finishing in-flight statements...".yellow());
            on_signal.cancel();
        }
    });

    if let Some(secs) = timeout {
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            tracing::warn!(timeout_secs = secs, "run timed out, cancelling");
            cancel.cancel();
        });
    }
}

/// Compile command - write rendered SQL and checksums
fn compile_command(config: Config, project_dir: &Path, out: &Path) -> Result<()> {
    let project = load_project(config, project_dir)?;

    let compiled = match compile_project(&project, &[]) {
        Ok(compiled) => compiled,
        Err(_) => std::process::exit(1),
    };

    let out_dir = if out.is_relative() {
        project_dir.join(out)
    } else {
        out.to_path_buf()
    };

    let manifest = write_compiled(&compiled, &out_dir)
        .with_context(|| format!("Failed to write compiled SQL to {}", out_dir.display()))?;

    for entry in &manifest.models {
        println!(
            "  {} {} {}",
            "✓".green(),
            entry.model,
            format!("({})", entry.materialization).dimmed()
        );
    }
    println!();
    println!(
        "{} {} models to {}",
        "Compiled".green().bold(),
        manifest.models.len(),
        out_dir.display()
    );

    Ok(())
}

/// Plan command - print execution waves
fn plan_command(config: Config, project_dir: &Path, select: &[String]) -> Result<()> {
    let project = load_project(config, project_dir)?;

    let compiled = match compile_project(&project, select) {
        Ok(compiled) => compiled,
        Err(_) => std::process::exit(1),
    };

    print_header("Execution Plan");

    for (index, wave) in compiled.plan.waves().iter().enumerate() {
        println!("{}", format!("Wave {}", index).bold());
        for node_id in wave {
            if let Some(model) = compiled.model(node_id) {
                println!(
                    "  - {} {} {}",
                    model.name.green(),
                    "->".dimmed(),
                    format!("{} {}", model.materialization, model.relation).dimmed()
                );
            }
        }
    }

    println!();
    println!(
        "{} models in {} waves, {} tests",
        compiled.plan.model_count(),
        compiled.plan.len(),
        compiled.tests.len()
    );
    print_footer();

    Ok(())
}

/// Lineage command - upstream and downstream nodes of one model
fn lineage_command(config: Config, project_dir: &Path, model: &str) -> Result<()> {
    let project = load_project(config, project_dir)?;

    let compiled = match compile_project(&project, &[]) {
        Ok(compiled) => compiled,
        Err(_) => std::process::exit(1),
    };
    let graph = &compiled.graph;

    let node_id = model_id(model);
    if !graph.contains(&node_id) {
        return Err(anyhow::anyhow!(
            "Model '{}' not found. Available models: {}",
            model,
            graph
                .models()
                .iter()
                .map(|id| graph.display_name(id))
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }

    let upstream = graph.upstream(&node_id);
    let downstream = graph.downstream(&node_id);

    print_header("Lineage");
    println!("{} {}", "Model:".bold(), model.green());
    println!();

    println!("{} {}", "Upstream:".bold(), upstream.len());
    for id in &upstream {
        let kind = match graph.kind(id) {
            Some(NodeKind::Source) => "source",
            _ => "model",
        };
        println!("  - {} {}", graph.display_name(id), format!("({})", kind).dimmed());
    }
    println!();

    println!("{} {}", "Downstream:".bold(), downstream.len());
    if downstream.is_empty() {
        println!("  {}", "✓ No downstream models".green());
    }
    for id in &downstream {
        println!("  - {}", graph.display_name(id).yellow());
    }
    print_footer();

    Ok(())
}

/// Export-dag command - task graph as JSON or an Airflow DAG file
fn export_dag_command(
    config: Config,
    project_dir: &Path,
    format: DagFormat,
    dag_id: &str,
    output: Option<&Path>,
) -> Result<()> {
    let project = load_project(config, project_dir)?;

    let compiled = match compile_project(&project, &[]) {
        Ok(compiled) => compiled,
        Err(_) => std::process::exit(1),
    };

    let dag = TaskGraph::from_plan(dag_id, &compiled.plan, &compiled.graph);
    let rendered = match format {
        DagFormat::Json => dag.to_json()?,
        DagFormat::Airflow => dag.to_airflow(),
    };

    match output {
        Some(path) => {
            std::fs::write(path, rendered).with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("{} {}", "DAG saved to:".green(), path.display());
        }
        None => println!("{}", rendered),
    }

    Ok(())
}

fn print_header(title: &str) {
    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", title.bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();
}

fn print_footer() {
    println!();
    println!("{}", "=".repeat(60).bright_blue());
}

fn severity_label(severity: Severity) -> colored::ColoredString {
    match severity {
        Severity::Error => "ERROR".red().bold(),
        Severity::Warn => "WARN".yellow().bold(),
        Severity::Info => "INFO".cyan(),
    }
}

fn print_diagnostics(diagnostics: &[Diagnostic]) {
    for diag in diagnostics {
        println!("  [{}] {}: {}", severity_label(diag.severity), diag.code, diag.message);

        if let Some(loc) = &diag.location {
            match loc.line {
                Some(line) => println!("    Location: {}:{}", loc.file, line),
                None => println!("    Location: {}", loc.file),
            }
        }
    }
}

fn print_run_summary(report: &RunReport) {
    print_header("Run Results");

    if !report.models.is_empty() {
        println!("{}", "Models:".bold());
        for result in &report.models {
            let status = match &result.status {
                ModelStatus::Success => "OK".green(),
                ModelStatus::Failed { .. } => "ERROR".red().bold(),
                ModelStatus::Skipped(_) => "SKIP".yellow(),
            };
            println!(
                "  [{}] {} {}",
                status,
                result.model,
                format!("(wave {}, {} ms)", result.wave, result.duration_ms).dimmed()
            );
            match &result.status {
                ModelStatus::Failed { reason } => println!("    {}", reason.red()),
                ModelStatus::Skipped(reason) => println!("    {}", reason.to_string().dimmed()),
                ModelStatus::Success => {}
            }
        }
        println!();
    }

    if !report.tests.is_empty() {
        println!("{}", "Tests:".bold());
        for result in &report.tests {
            let status = match result.status {
                TestStatus::Passed => "PASS".green(),
                TestStatus::Warned => "WARN".yellow().bold(),
                TestStatus::Failed => "FAIL".red().bold(),
                TestStatus::Skipped => "SKIP".yellow(),
            };
            println!("  [{}] {}", status, result.test_id);
            if result.failures > 0 {
                println!("    {} failing rows", result.failures);
            }
            if let Some(message) = &result.message {
                println!("    {}", message.dimmed());
            }
        }
        println!();
    }

    let summary = &report.summary;
    println!("{}", "Summary:".bold());
    println!(
        "  Models: {} ok, {} failed, {} skipped",
        summary.models_succeeded.to_string().green(),
        colour_count(summary.models_failed, |s| s.red().bold()),
        colour_count(summary.models_skipped, |s| s.yellow())
    );
    println!(
        "  Tests:  {} passed, {} warned, {} failed, {} skipped",
        summary.tests_passed.to_string().green(),
        colour_count(summary.tests_warned, |s| s.yellow()),
        colour_count(summary.tests_failed, |s| s.red().bold()),
        colour_count(summary.tests_skipped, |s| s.yellow())
    );
    println!("  Waves:  {} in {} ms", summary.waves, summary.elapsed_ms);
    println!();

    let other: Vec<Diagnostic> = report
        .diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error && d.node.is_none())
        .cloned()
        .collect();
    if !other.is_empty() {
        print_diagnostics(&other);
        println!();
    }

    if report.success {
        println!("{}", "✓ Run succeeded".green().bold());
    } else {
        println!("{}", "✗ Run failed".red().bold());
    }
    print_footer();
}

fn colour_count(count: usize, paint: impl Fn(&str) -> colored::ColoredString) -> colored::ColoredString {
    if count == 0 {
        count.to_string().green()
    } else {
        paint(&count.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_flags() {
        let cli = Cli::parse_from([
            "rivulet",
            "--project-dir",
            "demo",
            "run",
            "--select",
            "+fct_orders",
            "--select",
            "dim_dates",
            "--dry-run",
            "--timeout",
            "30",
        ]);

        assert_eq!(cli.project_dir, Some(PathBuf::from("demo")));
        match cli.command {
            Commands::Run {
                select,
                output,
                dry_run,
                timeout,
            } => {
                assert_eq!(select, vec!["+fct_orders", "dim_dates"]);
                assert_eq!(output, PathBuf::from("run_results.json"));
                assert!(dry_run);
                assert_eq!(timeout, Some(30));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn parses_export_dag() {
        let cli = Cli::parse_from(["rivulet", "export-dag", "--format", "airflow", "--dag-id", "nightly"]);
        match cli.command {
            Commands::ExportDag { format, dag_id, output } => {
                assert!(matches!(format, DagFormat::Airflow));
                assert_eq!(dag_id, "nightly");
                assert!(output.is_none());
            }
            _ => panic!("expected export-dag"),
        }
    }
}
