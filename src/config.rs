use clap::Parser;
use std::net::IpAddr;
use std::time::Duration;

use crate::error::{CacheError, Result};
use crate::membership::service::MembershipConfig;
use crate::node::NodeSettings;
use crate::replication::broadcaster::BroadcastConfig;

/// Command line and environment configuration of a cache node.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "distributed-cache",
    version,
    about = "Cluster-replicated in-memory cache node"
)]
pub struct NodeConfig {
    /// Node name, unique per cluster. A random one is generated when omitted.
    #[arg(long = "name", env = "NODE_NAME")]
    pub name: Option<String>,

    /// Address both the gossip socket and the HTTP listener bind to.
    #[arg(long = "bind", env = "BIND_ADDR", default_value = "127.0.0.1")]
    pub bind: IpAddr,

    /// UDP port of the membership protocol.
    #[arg(long = "port", env = "PORT")]
    pub port: u16,

    /// TCP port of the cache HTTP service.
    #[arg(long = "http-port", env = "HTTP_PORT")]
    pub http_port: u16,

    /// Gossip address (`host:port`) of an existing node to join.
    #[arg(long = "peer", env = "PEER")]
    pub peer: Option<String>,

    #[arg(
        long = "forward-timeout-ms",
        env = "FORWARD_TIMEOUT_MS",
        default_value_t = 2000
    )]
    pub forward_timeout_ms: u64,

    #[arg(long = "join-timeout-ms", env = "JOIN_TIMEOUT_MS", default_value_t = 3000)]
    pub join_timeout_ms: u64,

    /// Also send origin reads to every peer.
    #[arg(
        long = "broadcast-reads",
        env = "BROADCAST_READS",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub broadcast_reads: bool,

    /// Purge expired entries in the background at this interval.
    #[arg(long = "sweep-interval-secs", env = "SWEEP_INTERVAL_SECS")]
    pub sweep_interval_secs: Option<u64>,
}

impl NodeConfig {
    /// Validates the configuration and turns it into node settings.
    pub fn settings(&self) -> Result<NodeSettings> {
        if self.port == self.http_port {
            return Err(CacheError::Config(format!(
                "--port and --http-port must differ (both {})",
                self.port
            )));
        }

        if self.sweep_interval_secs == Some(0) {
            return Err(CacheError::Config("--sweep-interval-secs must be positive".to_string()));
        }

        Ok(NodeSettings {
            name: self.name.clone(),
            bind_ip: self.bind,
            gossip_port: self.port,
            http_port: self.http_port,
            membership: MembershipConfig {
                join_timeout: Duration::from_millis(self.join_timeout_ms),
                ..Default::default()
            },
            broadcast: BroadcastConfig {
                forward_timeout: Duration::from_millis(self.forward_timeout_ms),
                broadcast_reads: self.broadcast_reads,
            },
            sweep_interval: self.sweep_interval_secs.map(Duration::from_secs),
        })
    }
}
