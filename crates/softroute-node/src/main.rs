use std::path::PathBuf;

use clap::Parser;

use softroute_core::types::HardwareId;
use softroute_node::{Node, NodeConfig, Wire};

#[derive(Parser)]
#[command(name = "softroute-node", about = "Software-defined edge router / backbone node")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/softroute/config.toml")]
    config: PathBuf,

    /// Link-layer identity to attach as
    #[arg(short, long, default_value = "node")]
    identity: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        softroute_node::logging::init_json();
    } else {
        softroute_node::logging::init();
    }

    let config = match NodeConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load config from {}: {e}", cli.config.display());
            std::process::exit(1);
        }
    };

    let wire = Wire::new();
    let link = wire.attach(HardwareId::new(cli.identity)).await;

    let mut node = match Node::new(config, Some(cli.config.clone()), link) {
        Ok(node) => node,
        Err(e) => {
            eprintln!("failed to build node: {e}");
            std::process::exit(1);
        }
    };
    let handle = node.shutdown_handle();

    // Spawn signal handler
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received SIGINT, shutting down");
        handle.shutdown();
    });

    if let Err(e) = node.start().await {
        tracing::error!("failed to start node: {e}");
        std::process::exit(1);
    }

    node.run().await;
    node.shutdown().await;
}
