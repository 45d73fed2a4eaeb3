use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};

use common::log_setup::setup_logging;
use common::{FileFormat, Shared};
use rina::config::RenderConfig;
use rina::graph::Graph;
use rina::render::Renderer;

#[derive(Parser, Debug)]
#[command(name = "rina", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render one node of a graph file and print its output.
    Render(RenderArgs),
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Graph file (.yml, .yaml or .json).
    #[arg(long)]
    graph: PathBuf,

    /// Name of the node to materialize.
    #[arg(long)]
    node: String,

    /// Render config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override worker threads. 0 processes on the main thread.
    #[arg(long)]
    workers: Option<usize>,

    /// Print the processing journal.
    #[arg(long, default_value_t = false)]
    journal: bool,

    /// Print the queue plan before processing.
    #[arg(long, default_value_t = false)]
    plan: bool,

    /// Directory for rolling log files.
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Command::Render(args) => cmd_render(args),
    }
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let mut config = match args.config.as_ref() {
        Some(path) => RenderConfig::from_file(path)?,
        None => RenderConfig::default(),
    };
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    config.record_journal |= args.journal;
    setup_logging(&config.log_level, &args.log_dir)?;

    let graph = Graph::from_file(&args.graph)?;
    let target = graph
        .node_by_name(&args.node)
        .map(|node| node.id())
        .with_context(|| format!("Node '{}' not found in {}", args.node, args.graph.display()))?;
    let graph = Shared::new(graph);

    let renderer = Renderer::new(config)?;
    let plan = renderer.build(&graph, target)?;
    if args.plan {
        println!("{}", common::serialize(&plan.snapshot(), FileFormat::Yaml)?);
    }

    let report = renderer.execute(&plan)?;
    if !report.journal.is_empty() {
        println!("{}", common::serialize(&report.journal, FileFormat::Yaml)?);
    }
    match report.output.as_ref() {
        Some(output) => println!("|{}|", output.text),
        None => println!("<no output>"),
    }
    eprintln!(
        "generation {}: {} of {} nodes in {:.3}s",
        report.generation, report.executed_nodes, report.queued_nodes, report.elapsed_secs
    );

    Ok(())
}
