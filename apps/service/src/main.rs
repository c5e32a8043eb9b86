use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use netsentinel::config::Config;
use netsentinel::database::{Node, Repository, ResultFilter, open_repository};
use netsentinel::monitoring::{MonitoringScheduler, ProbeExecutor, ServiceMetrics, TcpConnector};

#[derive(Parser, Debug)]
#[command(version, about = "TCP reachability monitor")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Probe nodes on the configured interval until interrupted
    Serve,
    /// Run a single probe cycle
    RunOnce {
        /// Probe only this node, even if disabled
        #[arg(long)]
        node: Option<String>,
    },
    /// Register a node
    AddNode(AddNodeArgs),
    /// List registered nodes
    Nodes,
    /// List stored probe results, newest first
    Results {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Aggregate stored probe results
    Summary {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Print service counters
    Metrics,
}

#[derive(Args, Debug)]
struct AddNodeArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    host: String,
    #[arg(long)]
    port: u16,
    #[arg(long)]
    region: String,
    /// Register the node without probing it
    #[arg(long)]
    disabled: bool,
}

#[derive(Args, Debug)]
struct FilterArgs {
    #[arg(long)]
    node: Option<String>,
    /// Inclusive lower bound (RFC 3339)
    #[arg(long)]
    from: Option<DateTime<Utc>>,
    /// Inclusive upper bound (RFC 3339)
    #[arg(long)]
    to: Option<DateTime<Utc>>,
}

impl FilterArgs {
    fn to_filter(&self) -> ResultFilter {
        let mut filter = ResultFilter::new();
        if let Some(node) = &self.node {
            filter = filter.node(node.clone());
        }
        if let Some(from) = self.from {
            filter = filter.since(from);
        }
        if let Some(to) = self.to {
            filter = filter.until(to);
        }
        filter
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let started_at = Utc::now();
    let cli = Cli::parse();

    let config = Config::from_config(cli.config.as_deref()).context("loading configuration")?;
    logger::init(
        config.logging.format.parse().ok(),
        logger::level_from_str(&config.logging.level),
    );
    tracing::debug!("Configuration:\n{config}");

    let repository = open_repository(&config.storage).await.context("opening storage")?;
    let executor = Arc::new(ProbeExecutor::new(
        Arc::new(TcpConnector),
        Duration::try_from_secs_f64(config.probe.timeout_seconds)
            .context("probe timeout out of range")?,
        config.probe.retry_count,
    ));
    let scheduler = Arc::new(MonitoringScheduler::new(
        Arc::clone(&repository),
        executor,
        config.scheduler.interval_seconds,
    ));

    match cli.cmd.unwrap_or(Cmd::Serve) {
        Cmd::Serve => {
            scheduler.start();
            tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
            tracing::info!("Shutdown requested");
            scheduler.stop().await;
        }
        Cmd::RunOnce { node } => {
            let count = scheduler.run_once(node.as_deref()).await?;
            print_json(&serde_json::json!({ "probed": count }))?;
        }
        Cmd::AddNode(args) => {
            let node = Node::new(&args.name, &args.host, args.port, &args.region, !args.disabled)?;
            print_json(&repository.add_node(node).await?)?;
        }
        Cmd::Nodes => print_json(&repository.list_nodes().await?)?,
        Cmd::Results { filter, limit } => {
            print_json(&repository.list_probe_results(&filter.to_filter(), limit).await?)?;
        }
        Cmd::Summary { filter } => {
            print_json(&repository.summarize_probe_results(&filter.to_filter()).await?)?;
        }
        Cmd::Metrics => {
            let metrics = ServiceMetrics::collect(repository.as_ref(), &scheduler, started_at).await?;
            print_json(&metrics)?;
        }
    }

    Ok(())
}
