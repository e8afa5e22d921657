use std::sync::Arc;

use clap::Parser;

use qot_common::coordination_store::{CoordinationStore, RedisCoordinationStore};
use qot_common::pubsub::{PubSub, RedisPubSub};
use qot_coordinator::business::Business;
use qot_coordinator::replica::Replica;
use qot_coordinator::rest;
use qot_coordinator::settings::Settings;
use qot_coordinator::state_store::StateStore;

#[derive(Parser, Debug)]
#[command(name = "qot_coordinatord", about = "QoT coordinator replica")]
struct Cli {
    /// Path to a TOML config file (defaults to /etc/qot/coordinator.toml).
    #[arg(long)]
    config: Option<String>,

    /// Coordination-store hosts, comma-separated host:port.
    #[arg(long)]
    zk_hosts: Option<String>,

    /// Pub/sub backend host:port.
    #[arg(long)]
    pub_host: Option<String>,

    /// Leader-election group name.
    #[arg(long)]
    coordinator_group: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::read(cli.config.as_deref()).expect("failed to load settings");
    if let Some(zk_hosts) = cli.zk_hosts {
        settings.zk_hosts = zk_hosts;
    }
    if let Some(pub_host) = cli.pub_host {
        settings.pub_host = pub_host;
    }
    if let Some(group) = cli.coordinator_group {
        settings.coordinator_group = group;
    }

    let identity = uuid::Uuid::new_v4().to_string();
    let coord: Arc<dyn CoordinationStore> = RedisCoordinationStore::connect(&settings.zk_hosts, identity.clone())
        .expect("failed to connect to coordination store");
    let bus: Arc<dyn PubSub> = RedisPubSub::connect(&settings.pub_host)
        .expect("failed to connect to pub/sub backend");
    let store = Arc::new(StateStore::new());
    let business = Arc::new(Business::new(store, coord.clone(), bus));

    let replica = Replica::new(business.clone(), coord, settings.coordinator_group.clone(), identity);
    std::thread::spawn(move || replica.run());

    let app = rest::router(business);
    tracing::info!(address = %settings.http_address, "starting qot_coordinatord");
    let listener = tokio::net::TcpListener::bind(&settings.http_address)
        .await
        .expect("failed to bind HTTP listener");
    axum::serve(listener, app)
        .await
        .expect("coordinator HTTP server exited with an error");
}
