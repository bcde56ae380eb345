use anyhow::{Context, Result};
use bayview::config::{Config, DEFAULT_CONFIG_PATH};
use bayview::domain::TopologyReconciler;
use bayview::monitor::Monitor;
use bayview::state::{local_hostname, SharedState};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "bayview")]
#[command(about = "Disk bay topology monitor - publishes a JSON feed of controllers, bays and ZFS health")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Where the JSON feed is written
    #[arg(short, long, default_value = "/run/bayview/data.json")]
    output: PathBuf,

    /// Run a single topology scan, print it to stdout and exit
    #[arg(long)]
    once: bool,

    /// Host name reported in the feed
    #[arg(long)]
    hostname: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = Arc::new(Config::load(&args.config)?);
    let hostname = args.hostname.unwrap_or_else(local_hostname);
    let state = SharedState::new(hostname);

    if args.once {
        let scan = TopologyReconciler::new(config)
            .scan()
            .await
            .context("Topology scan failed")?;
        state.publish_topology(scan);
        let json = serde_json::to_string_pretty(&state.snapshot())?;
        println!("{}", json);
        return Ok(());
    }

    log::info!(
        "Starting bayview: topology every {}ms, feed at {}",
        config.general.topology_interval_ms,
        args.output.display()
    );

    let monitor = Monitor::new(config, state);
    let mut handles = monitor.spawn();
    handles.push(monitor.spawn_publisher(args.output));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    log::info!("Shutting down");
    for handle in handles {
        handle.abort();
    }

    Ok(())
}
