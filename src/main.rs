use clap::Parser;
use distributed_cache::config::NodeConfig;
use distributed_cache::node::CacheNode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = NodeConfig::parse();
    let settings = config.settings()?;

    // 1. Sockets (gossip + HTTP):
    let node = CacheNode::bind(settings).await?;
    tracing::info!(
        "Node {} gossip={} http={}",
        node.directory.local_name(),
        node.gossip_addr(),
        node.http_addr
    );

    // 2. Cluster membership:
    match &config.peer {
        Some(peer) => {
            let size = node.join(peer).await?;
            tracing::info!("Joined cluster through {} ({} members)", peer, size);
        }
        None => {
            node.membership.clone().start().await;
            tracing::info!("Starting as first node of a new cluster");
        }
    }

    // 3. Spawn stats reporter:
    let directory = node.directory.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));

        loop {
            interval.tick().await;
            let members = directory.snapshot();
            tracing::info!("Cluster stats: {} alive nodes", members.len());
            for member in members {
                tracing::info!(
                    "  - {} gossip={}:{} http={}",
                    member.name,
                    member.addr,
                    member.port,
                    member.http_port
                );
            }
        }
    });

    // 4. Serve until Ctrl+C:
    tracing::info!("Press Ctrl+C to shutdown");
    node.serve(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
    })
    .await?;

    tracing::info!("Node stopped");
    Ok(())
}
