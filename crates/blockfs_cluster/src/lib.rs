//! Cluster control core of the blockfs distributed block-file store.
//!
//! One logical cluster authority: it tracks the datanode fleet, carves
//! volumes into 3-way replicated block groups, expands and deletes volumes,
//! drains failing or decommissioned nodes, and health-checks the fleet. All
//! durable state lives in the replicated cluster group behind the
//! [`blockfs_raft::RaftKv`] seam; this crate is that group's state-machine
//! client. The RPC transport, the consensus engine, the per-volume metadata
//! namespace and the datanode daemon are collaborators reached through the
//! traits in [`transport`].

pub mod config;
pub mod health;
pub mod kv;
pub mod migrate;
pub mod placement;
pub mod proto;
pub mod server;
pub mod transport;
pub mod volume;

pub use config::ClusterConfig;
pub use migrate::DrainSummary;
pub use server::ClusterServer;

/// Size of one replica block in GiB. Every block group carves exactly one
/// block of this size on each of its three hosts.
pub const BLK_SIZE_GIB: i32 = 5;
