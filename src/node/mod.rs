//! Cluster Node Module
//!
//! Wires one cache node together: the gossip socket, the expiring store, the broadcaster and the
//! HTTP listener serving `/cache`. Both the binary and the cluster tests build nodes through here.

use axum::{Extension, Router, routing::get};
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::cache::store::ExpiringStore;
use crate::error::{CacheError, Result};
use crate::membership::directory::MembershipDirectory;
use crate::membership::join::JoinCoordinator;
use crate::membership::meta::{META_MAX_SIZE, NodeMetadata};
use crate::membership::service::{MembershipConfig, MembershipService};
use crate::membership::types::NodeId;
use crate::replication::broadcaster::{BroadcastConfig, Broadcaster};
use crate::replication::handlers::{
    handle_delete, handle_get, handle_get_members, handle_put, handle_unsupported,
};
use crate::replication::protocol::{ROUTE_KEY, ROUTE_MEMBERS};

/// Everything needed to bring up one node. Port 0 picks a free port.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub name: Option<String>,
    pub bind_ip: IpAddr,
    pub gossip_port: u16,
    pub http_port: u16,
    pub membership: MembershipConfig,
    pub broadcast: BroadcastConfig,
    pub sweep_interval: Option<Duration>,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            name: None,
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            gossip_port: 0,
            http_port: 0,
            membership: MembershipConfig::default(),
            broadcast: BroadcastConfig::default(),
            sweep_interval: None,
        }
    }
}

/// A bound but not yet serving node.
pub struct CacheNode {
    pub membership: Arc<MembershipService>,
    pub directory: MembershipDirectory,
    pub broadcaster: Arc<Broadcaster>,
    pub http_addr: SocketAddr,
    listener: TcpListener,
    sweeper: Option<JoinHandle<()>>,
}

impl CacheNode {
    /// Binds the HTTP listener and the gossip socket.
    ///
    /// Fails with [`CacheError::Config`] if either port is taken or both are the same.
    pub async fn bind(settings: NodeSettings) -> Result<Self> {
        if settings.gossip_port != 0 && settings.gossip_port == settings.http_port {
            return Err(CacheError::Config(format!(
                "gossip and HTTP ports must differ (both {})",
                settings.gossip_port
            )));
        }

        let http_bind = SocketAddr::new(settings.bind_ip, settings.http_port);
        let listener = TcpListener::bind(http_bind).await.map_err(|e| {
            CacheError::Config(format!("cannot bind HTTP listener {}: {}", http_bind, e))
        })?;
        let http_addr = listener.local_addr()?;

        let id = settings.name.map(NodeId).unwrap_or_default();
        let meta = NodeMetadata::new(http_addr.port()).encode(META_MAX_SIZE);
        let membership = MembershipService::new(
            id,
            SocketAddr::new(settings.bind_ip, settings.gossip_port),
            meta,
            settings.membership,
        )
        .await?;

        let store = ExpiringStore::new();
        let sweeper = settings
            .sweep_interval
            .map(|interval| store.spawn_sweeper(interval));

        let directory = MembershipDirectory::new(membership.clone());
        let broadcaster = Arc::new(Broadcaster::new(
            store,
            directory.clone(),
            settings.broadcast,
        ));

        Ok(Self {
            membership,
            directory,
            broadcaster,
            http_addr,
            listener,
            sweeper,
        })
    }

    pub fn gossip_addr(&self) -> SocketAddr {
        self.membership.local_node.gossip_addr
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(ROUTE_MEMBERS, get(handle_get_members))
            .route(
                ROUTE_KEY,
                get(handle_get)
                    .put(handle_put)
                    .delete(handle_delete)
                    .fallback(handle_unsupported),
            )
            .layer(Extension(self.broadcaster.clone()))
            .layer(Extension(self.directory.clone()))
    }

    /// Starts the gossip loops and joins the cluster through `seed`.
    pub async fn join(&self, seed: &str) -> Result<usize> {
        JoinCoordinator::new(self.membership.clone())
            .join_cluster(seed)
            .await
    }

    /// Serves HTTP until `shutdown` resolves, then announces the departure to the cluster.
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.membership.clone().start().await;

        let router = self.router();
        tracing::info!("HTTP server listening on {}", self.http_addr);

        axum::serve(self.listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        self.membership.leave().await;
        self.membership.shutdown();
        if let Some(sweeper) = self.sweeper {
            sweeper.abort();
        }

        Ok(())
    }

    /// Starts serving in a background task and returns handles to the running node.
    pub async fn spawn(self) -> RunningNode {
        self.membership.clone().start().await;

        let membership = self.membership.clone();
        let directory = self.directory.clone();
        let broadcaster = self.broadcaster.clone();
        let http_addr = self.http_addr;

        let task = tokio::spawn(async move {
            if let Err(e) = self.serve(std::future::pending()).await {
                tracing::error!("Node stopped: {}", e);
            }
        });

        RunningNode {
            membership,
            directory,
            broadcaster,
            http_addr,
            task: Some(task),
        }
    }
}

/// Handles to a node serving in the background.
pub struct RunningNode {
    pub membership: Arc<MembershipService>,
    pub directory: MembershipDirectory,
    pub broadcaster: Arc<Broadcaster>,
    pub http_addr: SocketAddr,
    task: Option<JoinHandle<()>>,
}

impl RunningNode {
    pub fn gossip_addr(&self) -> SocketAddr {
        self.membership.local_node.gossip_addr
    }

    pub fn store(&self) -> &ExpiringStore {
        self.broadcaster.store()
    }

    pub async fn join(&self, seed: SocketAddr) -> Result<usize> {
        JoinCoordinator::new(self.membership.clone())
            .join_cluster(&seed.to_string())
            .await
    }

    /// Stops the HTTP server and the gossip loops without announcing a departure.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.membership.shutdown();
    }
}

impl Drop for RunningNode {
    fn drop(&mut self) {
        self.stop();
    }
}
