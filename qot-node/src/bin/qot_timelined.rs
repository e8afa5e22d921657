use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use qot_common::pubsub::{PubSub, RedisPubSub};
use qot_node::daemon::TimelineDaemon;
use qot_node::settings::Settings;

#[derive(Parser, Debug)]
#[command(name = "qot_timelined", about = "QoT node-local timeline daemon")]
struct Cli {
    /// Path to a TOML config file (defaults to /etc/qot/node.toml).
    #[arg(long)]
    config: Option<String>,

    /// Override the daemon's UNIX-domain socket path.
    #[arg(long)]
    socket_path: Option<PathBuf>,

    /// Override the Redis URL backing the pub/sub bus.
    #[arg(long)]
    redis_url: Option<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::read(cli.config.as_deref()).expect("failed to load settings");
    if let Some(socket_path) = cli.socket_path {
        settings.socket_path = socket_path;
    }
    if let Some(redis_url) = cli.redis_url {
        settings.redis_url = redis_url;
    }

    let bus: Arc<dyn PubSub> = RedisPubSub::connect(&settings.redis_url)
        .expect("failed to connect to pub/sub backend");
    let daemon = TimelineDaemon::new(bus);

    tracing::info!(socket = %settings.socket_path.display(), "starting qot_timelined");
    daemon
        .serve(&settings.socket_path)
        .expect("timeline daemon exited with an error");
}
