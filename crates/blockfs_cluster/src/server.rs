//! Cluster server context and the fleet registry handlers.
//!
//! `ClusterServer` is the explicit context threaded through every handler:
//! the typed KV façade, the collaborator clients, the immutable config and
//! the server-wide serial lock. It is cheap to clone; background tasks
//! (health sweeps, drains) carry their own clone.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::task::JoinHandle;

use blockfs_raft::RaftKv;

use crate::config::ClusterConfig;
use crate::kv::ClusterKv;
use crate::proto::{DataNode, DelDatanodeAck, DelDatanodeReq, DatanodeRegistryAck, GetAllDatanodeAck};
use crate::transport::{addr, DataNodeClient, MetaNodeClient, NamespaceKeeper};

/// Shared server state behind every RPC handler.
#[derive(Clone)]
pub struct ClusterServer {
    pub(crate) cfg: Arc<ClusterConfig>,
    pub(crate) kv: ClusterKv,
    pub(crate) namespaces: Arc<dyn NamespaceKeeper>,
    pub(crate) meta_peers: Arc<dyn MetaNodeClient>,
    pub(crate) datanodes: Arc<dyn DataNodeClient>,
    /// Serializes volume create/expand and each migration step. Held across
    /// consensus writes, so those calls queue behind commit latency.
    pub(crate) serial: Arc<tokio::sync::Mutex<()>>,
    /// One live drain task per evacuating datanode, keyed by `ip:port`.
    pub(crate) drains: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl ClusterServer {
    pub fn new(
        cfg: ClusterConfig,
        raft: Arc<dyn RaftKv>,
        namespaces: Arc<dyn NamespaceKeeper>,
        meta_peers: Arc<dyn MetaNodeClient>,
        datanodes: Arc<dyn DataNodeClient>,
    ) -> Self {
        Self {
            cfg: Arc::new(cfg),
            kv: ClusterKv::new(raft),
            namespaces,
            meta_peers,
            datanodes,
            serial: Arc::new(tokio::sync::Mutex::new(())),
            drains: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.cfg
    }

    pub fn kv(&self) -> &ClusterKv {
        &self.kv
    }

    /// Idempotent upsert of a datanode record.
    pub async fn datanode_registry(&self, node: DataNode) -> Result<DatanodeRegistryAck> {
        let mut ack = DatanodeRegistryAck::default();
        self.kv
            .datanode_set(&node)
            .await
            .with_context(|| format!("register datanode {}:{}", node.ip, node.port))?;
        tracing::info!(
            ip = %node.ip,
            port = node.port,
            tier = %node.tier,
            free = node.free,
            "datanode registered"
        );
        ack.ret = 0;
        Ok(ack)
    }

    pub async fn get_all_datanode(&self) -> Result<GetAllDatanodeAck> {
        let mut ack = GetAllDatanodeAck::default();
        ack.datanodes = self.kv.datanode_list().await?;
        ack.ret = 0;
        Ok(ack)
    }

    /// Remove a datanode record. Does not cascade to blocks; the operator is
    /// expected to drain the node first via `Migrate`. Any drain still
    /// running against the node is cancelled so it cannot race the removal.
    pub async fn del_datanode(&self, req: DelDatanodeReq) -> Result<DelDatanodeAck> {
        let mut ack = DelDatanodeAck::default();
        let target = addr(&req.ip, req.port);
        if let Some(drain) = self.drains.lock().unwrap().remove(&target) {
            drain.abort();
            tracing::info!(addr = %target, "cancelled running drain for deleted datanode");
        }

        let deleted = self
            .kv
            .datanode_del(&req.ip, req.port)
            .await
            .with_context(|| format!("delete datanode {target}"))?;
        if !deleted {
            tracing::error!(addr = %target, "delete of unknown datanode");
            ack.ret = -1;
            return Ok(ack);
        }
        tracing::info!(addr = %target, "datanode deleted");
        ack.ret = 0;
        Ok(ack)
    }
}
