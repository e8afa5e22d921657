use std::fs;
use std::sync::Arc;

use clap::Parser;

use qot_common::pubsub::{PubSub, RedisPubSub};
use qot_peersync::dispatcher::{self, PeerSyncDispatcher};
use qot_peersync::graph::{GraphConfig, SyncGraph};
use qot_peersync::settings::Settings;

#[derive(Parser, Debug)]
#[command(name = "qot_peersyncd", about = "QoT peer-sync compute server")]
struct Cli {
    /// Path to a TOML config file (defaults to /etc/qot/peersync.toml).
    #[arg(long)]
    config: Option<String>,

    /// Pub/sub backend host:port.
    #[arg(long)]
    nats_server: Option<String>,

    /// Name of the master-clock node.
    #[arg(long)]
    master_clock: Option<String>,

    /// Cycle period, in seconds.
    #[arg(long)]
    period: Option<f64>,

    /// Path to the sync-graph JSON config (`{"nodes": [...], "edges": [[a,b],...]}`).
    #[arg(long = "graph-config")]
    graph_config: Option<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::read(cli.config.as_deref()).expect("failed to load settings");
    if let Some(nats_server) = cli.nats_server {
        settings.nats_server = nats_server;
    }
    if let Some(master_clock) = cli.master_clock {
        settings.master_clock = master_clock;
    }
    if let Some(period) = cli.period {
        settings.period = std::time::Duration::from_secs_f64(period);
    }
    if let Some(graph_config) = cli.graph_config {
        settings.graph_config_path = graph_config;
    }

    let raw = fs::read_to_string(&settings.graph_config_path)
        .unwrap_or_else(|e| panic!("failed to read graph config {}: {e}", settings.graph_config_path));
    let graph_config: GraphConfig = serde_json::from_str(&raw).expect("failed to parse graph config");

    // A singular M*M^T (degenerate topology) is fatal at startup, not a
    // retryable error (§7: "the peer-sync engine treats TopologyError as
    // fatal and exits with non-zero").
    let graph = match SyncGraph::build(&graph_config) {
        Ok(g) => g,
        Err(e) => {
            tracing::error!(error = %e, "fatal sync-graph topology error");
            std::process::exit(1);
        }
    };
    let master = graph
        .node_index(&settings.master_clock)
        .unwrap_or_else(|| panic!("master_clock {} is not a node in the graph config", settings.master_clock));

    let bus: Arc<dyn PubSub> = RedisPubSub::connect(&settings.nats_server)
        .expect("failed to connect to pub/sub backend");
    let dispatcher = PeerSyncDispatcher::new(graph, master, settings.period);

    dispatcher::subscribe(bus.as_ref(), dispatcher.clone()).expect("failed to subscribe to peer estimate topic");

    tracing::info!(
        master = %settings.master_clock,
        period_secs = settings.period.as_secs_f64(),
        "starting qot_peersyncd"
    );
    dispatcher.run(bus.as_ref());
}
