//! Shared helpers for cluster-core integration tests.
//!
//! The harness wires a `ClusterServer` to the in-memory consensus stand-in
//! and programmable fakes for the three out-of-process collaborators, so
//! each test drives the real handlers end to end.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;

use blockfs_cluster::kv::ClusterKv;
use blockfs_cluster::proto::{
    Block, CreateNameSpaceAck, CreateNameSpaceReq, DataNode, DatanodeHealthCheckAck,
    DeleteNameSpaceAck, DeleteNameSpaceReq, RecvMigrateAck, RecvMigrateReq,
};
use blockfs_cluster::transport::{DataNodeClient, MetaNodeClient, NamespaceKeeper};
use blockfs_cluster::{ClusterConfig, ClusterServer};
use blockfs_raft::mem::MemKv;

/// Local namespace keeper that records every created namespace.
#[derive(Default)]
pub struct FakeNamespaces {
    pub created: Mutex<Vec<(String, u64)>>,
    fail: AtomicBool,
}

impl FakeNamespaces {
    pub fn fail_creates(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl NamespaceKeeper for FakeNamespaces {
    async fn create_namespace(&self, vol_id: &str, rg_id: u64) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("namespace keeper offline");
        }
        self.created
            .lock()
            .unwrap()
            .push((vol_id.to_string(), rg_id));
        Ok(())
    }
}

/// Peer cluster servers that record fan-out traffic and can be told to
/// refuse or drop requests for a given address.
#[derive(Default)]
pub struct FakeMetaPeers {
    pub created: Mutex<Vec<(String, CreateNameSpaceReq)>>,
    pub deleted: Mutex<Vec<(String, String)>>,
    refusing: Mutex<HashSet<String>>,
    unreachable: Mutex<HashSet<String>>,
}

impl FakeMetaPeers {
    pub fn refuse(&self, addr: &str) {
        self.refusing.lock().unwrap().insert(addr.to_string());
    }

    pub fn unreachable(&self, addr: &str) {
        self.unreachable.lock().unwrap().insert(addr.to_string());
    }
}

#[async_trait]
impl MetaNodeClient for FakeMetaPeers {
    async fn create_namespace(
        &self,
        addr: &str,
        req: CreateNameSpaceReq,
    ) -> Result<CreateNameSpaceAck> {
        if self.unreachable.lock().unwrap().contains(addr) {
            bail!("dial {addr}: connection refused");
        }
        let ret = if self.refusing.lock().unwrap().contains(addr) {
            -1
        } else {
            0
        };
        self.created
            .lock()
            .unwrap()
            .push((addr.to_string(), req));
        Ok(CreateNameSpaceAck { ret })
    }

    async fn delete_namespace(
        &self,
        addr: &str,
        req: DeleteNameSpaceReq,
    ) -> Result<DeleteNameSpaceAck> {
        self.deleted
            .lock()
            .unwrap()
            .push((addr.to_string(), req.vol_id));
        Ok(DeleteNameSpaceAck { ret: 0 })
    }
}

/// Per-node health answer served by the fake fleet.
#[derive(Clone, Copy, Debug)]
pub enum HealthBehavior {
    Healthy { used: i32 },
    Unreachable,
    Degraded { status: i32, used: i32 },
}

/// Datanode daemons that answer health probes and replica copies.
#[derive(Default)]
pub struct FakeDataFleet {
    health: Mutex<HashMap<String, HealthBehavior>>,
    pub copies: Mutex<Vec<(String, RecvMigrateReq)>>,
    fail_copies: AtomicBool,
}

impl FakeDataFleet {
    pub fn set_health(&self, addr: &str, behavior: HealthBehavior) {
        self.health
            .lock()
            .unwrap()
            .insert(addr.to_string(), behavior);
    }

    pub fn fail_copies(&self, fail: bool) {
        self.fail_copies.store(fail, Ordering::SeqCst);
    }

    pub fn copied_destinations(&self) -> Vec<String> {
        self.copies
            .lock()
            .unwrap()
            .iter()
            .map(|(_, req)| req.dst_ip.clone())
            .collect()
    }
}

#[async_trait]
impl DataNodeClient for FakeDataFleet {
    async fn health_check(&self, addr: &str) -> Result<DatanodeHealthCheckAck> {
        let behavior = self
            .health
            .lock()
            .unwrap()
            .get(addr)
            .copied()
            .unwrap_or(HealthBehavior::Healthy { used: 0 });
        match behavior {
            HealthBehavior::Healthy { used } => Ok(DatanodeHealthCheckAck {
                ret: 0,
                status: 0,
                used,
            }),
            HealthBehavior::Unreachable => bail!("dial {addr}: connection refused"),
            HealthBehavior::Degraded { status, used } => Ok(DatanodeHealthCheckAck {
                ret: 0,
                status,
                used,
            }),
        }
    }

    async fn recv_migrate(&self, addr: &str, req: RecvMigrateReq) -> Result<RecvMigrateAck> {
        if self.fail_copies.load(Ordering::SeqCst) {
            bail!("copy on {addr} failed: disk error");
        }
        self.copies
            .lock()
            .unwrap()
            .push((addr.to_string(), req));
        Ok(RecvMigrateAck { ret: 0 })
    }
}

/// One wired-up cluster server plus handles on all of its fakes.
pub struct TestCluster {
    pub server: ClusterServer,
    pub raft: Arc<MemKv>,
    pub kv: ClusterKv,
    pub namespaces: Arc<FakeNamespaces>,
    pub peers: Arc<FakeMetaPeers>,
    pub fleet: Arc<FakeDataFleet>,
}

/// Address the harness assigns to the local cluster server.
pub const LOCAL_ADDR: &str = "10.1.0.1:9901";

/// Build a cluster whose address book holds only the local server.
pub fn cluster() -> TestCluster {
    cluster_with_peers(&[LOCAL_ADDR])
}

/// Build a cluster with an explicit peer address book.
pub fn cluster_with_peers(peer_addrs: &[&str]) -> TestCluster {
    let peers: Vec<String> = peer_addrs.iter().map(|addr| addr.to_string()).collect();
    cluster_with_config(move |cfg| cfg.peers = peers)
}

/// Install a subscriber once so `RUST_LOG=debug` surfaces handler traces.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Build a cluster with harness defaults, then let the test tweak the
/// config before the server is wired up.
pub fn cluster_with_config(update: impl FnOnce(&mut ClusterConfig)) -> TestCluster {
    init_tracing();
    let mut cfg = ClusterConfig {
        grpc_addr: LOCAL_ADDR.to_string(),
        peers: vec![LOCAL_ADDR.to_string()],
        // Keep test failures fast; the real default is five minutes.
        copy_timeout_ms: 2_000,
        ..ClusterConfig::default()
    };
    update(&mut cfg);
    let raft = Arc::new(MemKv::new());
    let namespaces = Arc::new(FakeNamespaces::default());
    let peers = Arc::new(FakeMetaPeers::default());
    let fleet = Arc::new(FakeDataFleet::default());
    let server = ClusterServer::new(
        cfg,
        raft.clone(),
        namespaces.clone(),
        peers.clone(),
        fleet.clone(),
    );
    TestCluster {
        kv: ClusterKv::new(raft.clone()),
        server,
        raft,
        namespaces,
        peers,
        fleet,
    }
}

/// A freshly registered datanode record.
pub fn datanode(ip: &str, port: i32, free: i32, tier: &str) -> DataNode {
    DataNode {
        ip: ip.to_string(),
        port,
        mount_point: format!("/mnt/disk{port}"),
        capacity: free,
        used: 0,
        free,
        tier: tier.to_string(),
        status: 0,
    }
}

/// Register a uniform fleet of healthy nodes.
pub async fn register_fleet(cluster: &TestCluster, ips: &[&str], free: i32, tier: &str) {
    for ip in ips {
        let ack = cluster
            .server
            .datanode_registry(datanode(ip, 1, free, tier))
            .await
            .unwrap();
        assert_eq!(ack.ret, 0);
    }
}

/// Distinct IPs hosting the blocks of one group.
pub fn block_ips(blocks: &[Block]) -> Vec<String> {
    let mut ips: Vec<String> = blocks.iter().map(|blk| blk.ip.clone()).collect();
    ips.sort();
    ips
}

/// Fetch one datanode record or panic.
pub async fn must_get_node(cluster: &TestCluster, ip: &str, port: i32) -> DataNode {
    cluster
        .kv
        .datanode_get(ip, port)
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("datanode {ip}:{port} missing"))
}
