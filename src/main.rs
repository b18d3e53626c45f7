use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use nodeflow::config::Config;
use nodeflow::engine::{ActiveWorkflow, ExecutionMode, RunOptions, RunRecord, WorkflowExecutor};
use nodeflow::expression::{render_template, ItemScope};
use nodeflow::nodes::{NodeRegistry, Services};
use nodeflow::workflow::{parse_workflow_file, validate_workflow, Item, WorkflowGraph};

#[derive(Parser)]
#[command(name = "nodeflow")]
#[command(about = "Graph-based workflow automation engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.config/nodeflow/config.toml)
    #[arg(long, global = true, env = "NODEFLOW_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow file once
    Run {
        /// Path to workflow YAML or JSON file
        file: PathBuf,
        /// JSON input: an object or an array of objects
        #[arg(short, long)]
        input: Option<String>,
        /// Stop after this node and its ancestors have run
        #[arg(short, long)]
        destination: Option<String>,
        /// Print the full run record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate a workflow file
    Validate {
        /// Path to workflow YAML or JSON file
        file: PathBuf,
    },
    /// Activate a workflow's triggers and print each run until interrupted
    Watch {
        /// Path to workflow YAML or JSON file
        file: PathBuf,
    },
    /// List registered node types
    Nodes {
        /// Print full descriptions as JSON
        #[arg(long)]
        json: bool,
    },
    /// Evaluate an expression against one item
    Eval {
        /// Expression or template, e.g. "={{ $json.a + 1 }}"
        expression: String,
        /// JSON for `$json`
        #[arg(long = "json", value_name = "ITEM")]
        item: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load(),
    };
    nodeflow::telemetry::init_logging(&config.logging);

    match cli.command {
        Commands::Run {
            file,
            input,
            destination,
            json,
        } => cmd_run(&config, &file, input.as_deref(), destination.as_deref(), json).await?,
        Commands::Validate { file } => cmd_validate(&file)?,
        Commands::Watch { file } => cmd_watch(&config, &file).await?,
        Commands::Nodes { json } => cmd_nodes(json)?,
        Commands::Eval { expression, item } => cmd_eval(&expression, item.as_deref())?,
    }

    Ok(())
}

fn build_executor(config: &Config) -> anyhow::Result<Arc<WorkflowExecutor>> {
    let services = Services::from_config(config)?;
    Ok(Arc::new(WorkflowExecutor::new(
        Arc::new(NodeRegistry::new()),
        Arc::new(services),
        config.engine.clone(),
    )))
}

async fn cmd_run(
    config: &Config,
    file: &Path,
    input: Option<&str>,
    destination: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let workflow = parse_workflow_file(file)?;
    let items = input
        .map(|raw| serde_json::from_str::<serde_json::Value>(raw).map(Item::batch_from_value))
        .transpose()
        .map_err(|e| anyhow::anyhow!("Invalid --input JSON: {}", e))?;

    let mut options = RunOptions::new(ExecutionMode::Manual);
    if let Some(node) = destination {
        options = options.with_destination(node);
    }

    let executor = build_executor(config)?;
    let record = executor.execute(&workflow, items, options).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        print_summary(&record);
    }

    if !record.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_summary(record: &RunRecord) {
    println!("Execution ID: {}", record.execution_id);
    println!("Status: {}", record.status);
    if let Some(finished) = record.finished_at {
        println!(
            "Duration: {}ms",
            (finished - record.started_at).num_milliseconds()
        );
    }
    if let Some(error) = &record.error {
        match &error.node {
            Some(node) => println!("Error in '{}': {}", node, error.message),
            None => println!("Error: {}", error.message),
        }
    }

    println!();
    println!("{:<30} {:<10} {:>6} {:>10}", "NODE", "STATUS", "ITEMS", "TIME");
    println!("{}", "-".repeat(59));
    for (node, tasks) in &record.run_data {
        for task in tasks {
            let items: usize = task
                .data
                .as_ref()
                .map(|output| output.iter().map(Vec::len).sum())
                .unwrap_or(0);
            println!(
                "{:<30} {:<10} {:>6} {:>8}ms",
                node,
                task.status.to_string(),
                items,
                task.execution_time_ms
            );
        }
    }

    let output = record.last_output();
    if !output.is_empty() {
        let values: Vec<_> = output.iter().map(Item::json_value).collect();
        println!();
        println!(
            "{}",
            serde_json::to_string_pretty(&values).unwrap_or_default()
        );
    }
}

fn cmd_validate(file: &Path) -> anyhow::Result<()> {
    let workflow = parse_workflow_file(file)?;
    let mut errors = validate_workflow(&workflow).errors;

    let registry = NodeRegistry::new();
    for node in &workflow.nodes {
        if let Err(e) = registry.resolve(node) {
            errors.push(e.message());
        }
    }

    if errors.is_empty() {
        let graph = WorkflowGraph::from_definition(&workflow)?;
        println!("✓ Workflow '{}' is valid", workflow.name);
        println!();
        println!("  Nodes: {}", workflow.nodes.len());
        let connections: usize = workflow
            .connections
            .values()
            .flat_map(|kinds| kinds.values())
            .flatten()
            .map(Vec::len)
            .sum();
        println!("  Connections: {}", connections);
        println!("  Order: {}", graph.get_execution_order().join(" -> "));
        return Ok(());
    }

    println!("✗ Workflow '{}' is invalid:", workflow.name);
    for error in &errors {
        println!("  - {}", error);
    }
    anyhow::bail!("{} validation error(s)", errors.len())
}

async fn cmd_watch(config: &Config, file: &Path) -> anyhow::Result<()> {
    let workflow = parse_workflow_file(file)?;
    let executor = build_executor(config)?;
    let active = ActiveWorkflow::activate(executor, workflow).await?;
    let mut runs = active.subscribe();

    println!("Watching workflow '{}' (Ctrl+C to stop)", active.workflow().name);
    for route in active.routes() {
        println!("  Webhook: {} /{}", route.method, route.path);
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = runs.recv() => match received {
                Ok(record) => println!(
                    "[{}] {} {} ({})",
                    record.started_at.format("%H:%M:%S"),
                    record.execution_id,
                    record.status,
                    record.last_node_executed.as_deref().unwrap_or("-"),
                ),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    println!("... {} run(s) not shown", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    active.deactivate().await;
    Ok(())
}

fn cmd_nodes(json: bool) -> anyhow::Result<()> {
    let registry = NodeRegistry::new();
    let descriptions = registry.descriptions();

    if json {
        println!("{}", serde_json::to_string_pretty(&descriptions)?);
        return Ok(());
    }

    println!("{:<16} {:<20} {:<10} DESCRIPTION", "TYPE", "NAME", "GROUP");
    println!("{}", "-".repeat(80));
    for description in descriptions {
        println!(
            "{:<16} {:<20} {:<10} {}",
            description.name,
            description.display_name,
            format!("{:?}", description.group).to_lowercase(),
            description.description
        );
    }
    Ok(())
}

fn cmd_eval(expression: &str, item: Option<&str>) -> anyhow::Result<()> {
    let value: serde_json::Value = match item {
        Some(raw) => serde_json::from_str(raw)?,
        None => serde_json::json!({}),
    };
    let items = vec![Item::from_value(value)];
    let result = render_template(expression, &ItemScope::new(&items))?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
