//! # nodeflow
//!
//! Validate, inspect and step-debug node graph definitions.

mod nodes;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use nodeflow_core::{
    ConfigBuilder, EngineConfig, EngineEvent, EventBus, GraphDefinition, GraphEvent,
    GraphSession, LoadedGraph, NodeId, StepReport, ENV_PREFIX,
};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nodeflow")]
#[command(about = "nodeflow CLI - Run and debug node graphs", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Engine configuration file (YAML or JSON)
    #[arg(short, long, global = true, env = "NODEFLOW_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a graph definition
    Validate {
        /// Path to YAML or JSON file
        file: PathBuf,
    },

    /// Check graph structure, modes and execution order
    Check {
        /// Path to YAML or JSON file
        file: PathBuf,
    },

    /// Run a graph under the step debugger
    Run {
        /// Path to YAML or JSON file
        file: PathBuf,

        /// Arm a breakpoint on the named node (repeatable)
        #[arg(short = 'b', long = "break", value_name = "NAME")]
        breakpoints: Vec<String>,

        /// Number of driver steps to run
        #[arg(short, long, default_value_t = 1)]
        steps: u32,

        /// Resume halted nodes immediately instead of prompting
        #[arg(long)]
        auto_resume: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_engine_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Validate { file } => {
            println!("Validating: {}", file.display());
            validate_graph(&file)?;
        }
        Commands::Check { file } => {
            println!("Checking graph structure: {}", file.display());
            check_graph(&file, &config)?;
        }
        Commands::Run {
            file,
            breakpoints,
            steps,
            auto_resume,
        } => {
            println!("Running: {}", file.display());
            run_graph(&file, config, &breakpoints, steps, auto_resume).await?;
        }
    }

    Ok(())
}

/// Logs go to stderr so stdout stays readable for graph output
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_engine_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EngineConfig::from_env_with_defaults(ENV_PREFIX)?,
    };
    tracing::debug!(?config, "Engine configuration loaded");
    Ok(config)
}

fn load_definition(file: &Path) -> Result<GraphDefinition> {
    let definition = GraphDefinition::from_file(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    definition.validate()?;
    Ok(definition)
}

fn build(definition: &GraphDefinition, config: &EngineConfig) -> Result<LoadedGraph> {
    let loaded = definition.build(
        &nodes::builtin_registry(),
        EventBus::new(config.event_capacity),
    )?;
    Ok(loaded)
}

fn validate_graph(file: &Path) -> Result<()> {
    let definition = load_definition(file)?;

    println!("✓ Graph is valid");
    println!("  Graph name: {}", definition.name);
    println!("  Nodes: {}", definition.nodes.len());
    println!("  Links: {}", definition.links.len());
    Ok(())
}

fn check_graph(file: &Path, config: &EngineConfig) -> Result<()> {
    let definition = load_definition(file)?;
    let loaded = build(&definition, config)?;

    println!("✓ Graph structure is valid");
    println!("\nGraph Analysis:");
    println!("  Name: {}", definition.name);
    if let Some(desc) = &definition.description {
        println!("  Description: {}", desc);
    }

    println!("\nNodes ({}):", definition.nodes.len());
    for def in &definition.nodes {
        let Some(node) = loaded.node(&def.name) else {
            continue;
        };
        let marker = if node.has_breakpoint() { " ●" } else { "" };
        println!("  - {}: {} [{}]{}", def.name, def.kind, node.mode(), marker);
    }

    println!("\nLinks ({}):", definition.links.len());
    for link in &definition.links {
        println!(
            "  - {}[{}] -> {}[{}]",
            link.from, link.from_slot, link.to, link.to_slot
        );
    }

    println!("\nExecution order:");
    for (i, node) in loaded.graph.execution_order().iter().enumerate() {
        println!("  {}. {}", i + 1, display_name(&loaded, node.id()));
    }
    Ok(())
}

async fn run_graph(
    file: &Path,
    config: EngineConfig,
    breakpoints: &[String],
    steps: u32,
    auto_resume: bool,
) -> Result<()> {
    let definition = load_definition(file)?;
    let loaded = build(&definition, &config)?;

    for name in breakpoints {
        let Some(node) = loaded.node(name) else {
            bail!("Cannot set breakpoint: node '{}' not found", name);
        };
        node.set_breakpoint(true);
    }

    let session = GraphSession::new(loaded.graph.clone(), config);
    let mut events = session.subscribe();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    for step in 1..=steps {
        let report = drive_step(&session, &loaded, &mut events, &mut stdin, auto_resume).await?;
        println!(
            "Step {}: {} executed, {} failed, {} skipped",
            step,
            report.executed.len(),
            report.failures(),
            report.skipped.len()
        );
        if report.interrupted() || !session.is_running() {
            println!("Session stopped");
            return Ok(());
        }
    }

    session.stop();
    println!("✓ Run finished");
    Ok(())
}

/// Run one driver step, answering halts as they are reported
async fn drive_step(
    session: &GraphSession,
    loaded: &LoadedGraph,
    events: &mut broadcast::Receiver<EngineEvent>,
    stdin: &mut Lines<BufReader<Stdin>>,
    auto_resume: bool,
) -> Result<StepReport> {
    let mut step = tokio::spawn({
        let session = session.clone();
        async move { session.run_step().await }
    });

    loop {
        // Events first, so failures are reported before the step's summary
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Ok(EngineEvent { event: GraphEvent::NodePaused { node, .. }, .. }) => {
                    println!("⏸ Halted at '{}'", display_name(loaded, node));
                    print_stack(session, loaded);
                    if auto_resume {
                        session.resume(node);
                    } else {
                        debug_prompt(session, loaded, node, stdin).await?;
                    }
                }
                Ok(EngineEvent { event: GraphEvent::ComputeFailed { node, error }, .. }) => {
                    println!("✗ '{}' failed: {}", display_name(loaded, node), error);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event stream lagged");
                }
                Err(RecvError::Closed) => return Ok((&mut step).await?),
            },
            report = &mut step => return Ok(report?),
        }
    }
}

async fn debug_prompt(
    session: &GraphSession,
    loaded: &LoadedGraph,
    node: NodeId,
    stdin: &mut Lines<BufReader<Stdin>>,
) -> Result<()> {
    loop {
        println!("(nodeflow) c: continue, bt: call stack, s: stop");
        let Some(line) = stdin.next_line().await? else {
            tracing::info!("Input closed, stopping session");
            session.stop();
            return Ok(());
        };
        match line.trim() {
            "c" | "continue" => {
                session.resume(node);
                return Ok(());
            }
            "bt" | "stack" => print_stack(session, loaded),
            "s" | "stop" => {
                session.stop();
                return Ok(());
            }
            other => println!("Unknown command '{}'", other),
        }
    }
}

fn print_stack(session: &GraphSession, loaded: &LoadedGraph) {
    println!("Call stack (innermost last):");
    for (depth, frame) in session.call_stack().iter().enumerate() {
        println!("  #{} {}", depth, display_name(loaded, frame.node));
    }
}

fn display_name(loaded: &LoadedGraph, id: NodeId) -> String {
    loaded
        .name_of(id)
        .map(str::to_string)
        .unwrap_or_else(|| id.to_string())
}
