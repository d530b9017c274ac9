//! Interfaces to the out-of-process collaborators.
//!
//! The cluster core talks to three parties it does not implement: peer
//! cluster servers (namespace fan-out), datanode daemons (health probes and
//! replica copies) and the local per-volume namespace subsystem. Each is a
//! trait here; the embedding daemon supplies transport-backed
//! implementations, tests supply programmable fakes. Clients dial a fresh
//! short-lived channel per call, so the traits take the target address
//! explicitly.

use anyhow::Result;
use async_trait::async_trait;

use crate::proto::{
    CreateNameSpaceAck, CreateNameSpaceReq, DatanodeHealthCheckAck, DeleteNameSpaceAck,
    DeleteNameSpaceReq, RecvMigrateAck, RecvMigrateReq,
};

/// Dial address of a datanode or cluster server endpoint.
pub fn addr(ip: &str, port: i32) -> String {
    format!("{ip}:{port}")
}

/// RPC client for peer cluster servers.
#[async_trait]
pub trait MetaNodeClient: Send + Sync {
    async fn create_namespace(
        &self,
        addr: &str,
        req: CreateNameSpaceReq,
    ) -> Result<CreateNameSpaceAck>;

    async fn delete_namespace(
        &self,
        addr: &str,
        req: DeleteNameSpaceReq,
    ) -> Result<DeleteNameSpaceAck>;
}

/// RPC client for datanode daemons.
#[async_trait]
pub trait DataNodeClient: Send + Sync {
    async fn health_check(&self, addr: &str) -> Result<DatanodeHealthCheckAck>;

    async fn recv_migrate(&self, addr: &str, req: RecvMigrateReq) -> Result<RecvMigrateAck>;
}

/// Local per-volume metadata namespace subsystem.
///
/// Creating a namespace brings up the volume's own consensus group on this
/// server, bound to the given group id.
#[async_trait]
pub trait NamespaceKeeper: Send + Sync {
    async fn create_namespace(&self, vol_id: &str, rg_id: u64) -> Result<()>;
}
