//! Wire types shared by the cluster RPC surface and the replicated keyspaces.
//!
//! Every persisted value and every RPC payload is a protobuf message; the
//! field tags here are the wire contract and must not be renumbered. Keys are
//! plain ASCII strings, formatted in `kv.rs`.

/// One storage server contributing disk capacity. Persisted under
/// `"<ip>:<port>"` in the DN keyspace; also the request body of
/// `DatanodeRegistry`. Capacities are GiB.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DataNode {
    #[prost(string, tag = "1")]
    pub ip: String,
    #[prost(int32, tag = "2")]
    pub port: i32,
    #[prost(string, tag = "3")]
    pub mount_point: String,
    #[prost(int32, tag = "4")]
    pub capacity: i32,
    #[prost(int32, tag = "5")]
    pub used: i32,
    #[prost(int32, tag = "6")]
    pub free: i32,
    #[prost(string, tag = "7")]
    pub tier: String,
    /// 0 = healthy, nonzero = degraded or unreachable.
    #[prost(int32, tag = "8")]
    pub status: i32,
}

/// A user-facing volume. Persisted under its uuid in the VOL keyspace.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Volume {
    #[prost(string, tag = "1")]
    pub uuid: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub tier: String,
    /// Quota promised to the client, GiB.
    #[prost(int32, tag = "4")]
    pub total_size: i32,
    /// Space materialized as block groups, GiB, always a multiple of the
    /// block size.
    #[prost(int32, tag = "5")]
    pub allocated_size: i32,
    /// Consensus group id of the volume's own metadata namespace.
    #[prost(uint64, tag = "6")]
    pub rg_id: u64,
}

/// One replica extent on one datanode. Persisted under
/// `"<ip>:<port>-<blk-id>"` in the BLK keyspace.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Block {
    #[prost(uint64, tag = "1")]
    pub blk_id: u64,
    #[prost(string, tag = "2")]
    pub ip: String,
    #[prost(int32, tag = "3")]
    pub port: i32,
    #[prost(string, tag = "4")]
    pub path: String,
    #[prost(int32, tag = "5")]
    pub status: i32,
    #[prost(uint64, tag = "6")]
    pub bg_id: u64,
    #[prost(string, tag = "7")]
    pub vol_id: String,
}

/// The replication unit: three blocks on three distinct host IPs. Persisted
/// under `"<volume-uuid>-<bg-id>"` in the BGP keyspace.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlockGroup {
    #[prost(message, repeated, tag = "1")]
    pub blocks: Vec<Block>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DatanodeRegistryAck {
    #[prost(int32, tag = "1")]
    pub ret: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetAllDatanodeAck {
    #[prost(int32, tag = "1")]
    pub ret: i32,
    #[prost(message, repeated, tag = "2")]
    pub datanodes: Vec<DataNode>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DelDatanodeReq {
    #[prost(string, tag = "1")]
    pub ip: String,
    #[prost(int32, tag = "2")]
    pub port: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DelDatanodeAck {
    #[prost(int32, tag = "1")]
    pub ret: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateVolReq {
    #[prost(string, tag = "1")]
    pub vol_name: String,
    /// Requested quota, GiB.
    #[prost(int32, tag = "2")]
    pub space_quota: i32,
    #[prost(string, tag = "3")]
    pub tier: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateVolAck {
    #[prost(int32, tag = "1")]
    pub ret: i32,
    #[prost(string, tag = "2")]
    pub uuid: String,
    #[prost(uint64, tag = "3")]
    pub raft_group_id: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExpandVolTsReq {
    #[prost(string, tag = "1")]
    pub vol_id: String,
    #[prost(int32, tag = "2")]
    pub expand_quota: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExpandVolTsAck {
    #[prost(int32, tag = "1")]
    pub ret: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExpandVolRsReq {
    #[prost(string, tag = "1")]
    pub vol_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExpandVolRsAck {
    /// 0 = nothing to materialize, 1 = progress made, -1 = placement failed.
    #[prost(int32, tag = "1")]
    pub ret: i32,
    #[prost(message, repeated, tag = "2")]
    pub bgps: Vec<BlockGroup>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DelVolRsForExpandReq {
    #[prost(string, tag = "1")]
    pub uuid: String,
    #[prost(message, repeated, tag = "2")]
    pub bgps: Vec<BlockGroup>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DelVolRsForExpandAck {
    #[prost(int32, tag = "1")]
    pub ret: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteVolReq {
    #[prost(string, tag = "1")]
    pub uuid: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteVolAck {
    #[prost(int32, tag = "1")]
    pub ret: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MigrateReq {
    #[prost(string, tag = "1")]
    pub datanode_ip: String,
    #[prost(int32, tag = "2")]
    pub datanode_port: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MigrateAck {
    #[prost(int32, tag = "1")]
    pub ret: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateNameSpaceReq {
    #[prost(string, tag = "1")]
    pub vol_id: String,
    #[prost(uint64, tag = "2")]
    pub raft_group_id: u64,
    #[prost(int32, tag = "3")]
    pub r#type: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateNameSpaceAck {
    #[prost(int32, tag = "1")]
    pub ret: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteNameSpaceReq {
    #[prost(string, tag = "1")]
    pub vol_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteNameSpaceAck {
    #[prost(int32, tag = "1")]
    pub ret: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RecvMigrateReq {
    #[prost(uint64, tag = "1")]
    pub src_blk_id: u64,
    #[prost(string, tag = "2")]
    pub src_mount: String,
    #[prost(string, tag = "3")]
    pub dst_ip: String,
    #[prost(int32, tag = "4")]
    pub dst_port: i32,
    #[prost(uint64, tag = "5")]
    pub dst_blk_id: u64,
    #[prost(string, tag = "6")]
    pub dst_mount: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RecvMigrateAck {
    #[prost(int32, tag = "1")]
    pub ret: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DatanodeHealthCheckAck {
    #[prost(int32, tag = "1")]
    pub ret: i32,
    /// Self-reported status, 0 = healthy.
    #[prost(int32, tag = "2")]
    pub status: i32,
    /// Self-reported used capacity, GiB.
    #[prost(int32, tag = "3")]
    pub used: i32,
}
