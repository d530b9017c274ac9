//! Background datanode health monitor.
//!
//! Each tick reads the whole fleet and probes every node in parallel. Status
//! flips are edge-triggered writes; `used` and the healthy status are
//! refreshed every tick so the fleet view tracks the nodes' self-reports.

use anyhow::{Context, Result};
use futures_util::future::join_all;
use tokio::task::JoinHandle;

use crate::proto::DataNode;
use crate::server::ClusterServer;
use crate::transport::addr;

/// Spawn the periodic health sweep.
pub fn spawn(server: ClusterServer) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(server.config().health_tick());
        loop {
            ticker.tick().await;
            if let Err(err) = probe_fleet_once(&server).await {
                tracing::warn!(error = ?err, "datanode health sweep failed");
            }
        }
    })
}

/// Probe every registered datanode once, in parallel, and persist whatever
/// changed. Returns once every probe has finished.
pub async fn probe_fleet_once(server: &ClusterServer) -> Result<()> {
    let nodes = server
        .kv()
        .datanode_list()
        .await
        .context("list datanodes for health sweep")?;

    let probes: Vec<JoinHandle<()>> = nodes
        .into_iter()
        .map(|node| {
            let server = server.clone();
            tokio::spawn(async move { probe_datanode(&server, node).await })
        })
        .collect();
    join_all(probes).await;
    Ok(())
}

async fn probe_datanode(server: &ClusterServer, mut node: DataNode) {
    let target = addr(&node.ip, node.port);
    let outcome = tokio::time::timeout(
        server.config().probe_timeout(),
        server.datanodes.health_check(&target),
    )
    .await;

    let ack = match outcome {
        Ok(Ok(ack)) => ack,
        Ok(Err(_)) | Err(_) => {
            // Unreachable or erroring: flip a good node to bad, leave an
            // already-bad node untouched.
            if node.status == 0 {
                node.status = 1;
                tracing::info!(addr = %target, "datanode went from good to bad");
                persist(server, &node).await;
            }
            return;
        }
    };

    if ack.status != 0 {
        if node.status == 0 {
            node.status = ack.status;
            node.used = ack.used;
            tracing::info!(addr = %target, status = ack.status, "datanode reported itself degraded");
            persist(server, &node).await;
        }
        return;
    }

    if node.status != 0 {
        tracing::info!(addr = %target, "datanode recovered");
    }
    node.status = 0;
    node.used = ack.used;
    persist(server, &node).await;
}

async fn persist(server: &ClusterServer, node: &DataNode) {
    if let Err(err) = server.kv().datanode_set(node).await {
        tracing::error!(
            error = ?err,
            ip = %node.ip,
            port = node.port,
            "health status persist failed"
        );
    }
}
