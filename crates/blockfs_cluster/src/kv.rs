//! Typed façade over the replicated cluster group.
//!
//! Four keyspaces live side by side in the cluster group, told apart by key
//! prefix: datanodes (`DN#`), volumes (`VOL#`), block groups (`BGP#`) and
//! blocks (`BLK#`). The façade owns key formatting and value codecs; every
//! mutation crosses consensus through the [`RaftKv`] handle and every read
//! comes from the local replica's committed state. Nothing here is cached:
//! callers re-read whatever they need inside each handler.

use anyhow::{Context, Result};
use prost::Message;
use std::sync::Arc;

use blockfs_raft::{GroupId, RaftKv};

use crate::proto::{Block, BlockGroup, DataNode, Volume};

/// Well-known id of the consensus group holding cluster-level metadata.
pub const CLUSTER_GROUP: GroupId = 1;

const DN_PREFIX: &str = "DN#";
const VOL_PREFIX: &str = "VOL#";
const BGP_PREFIX: &str = "BGP#";
const BLK_PREFIX: &str = "BLK#";

/// Reserved counter keys for the monotonic id allocators.
const RGID_COUNTER: &str = "ALLOC#rgid";
const BGID_COUNTER: &str = "ALLOC#bgid";
const BLKID_COUNTER: &str = "ALLOC#blkid";

pub(crate) fn datanode_key(ip: &str, port: i32) -> String {
    format!("{DN_PREFIX}{ip}:{port}")
}

pub(crate) fn vol_key(vol_id: &str) -> String {
    format!("{VOL_PREFIX}{vol_id}")
}

pub(crate) fn bgp_key(vol_id: &str, bg_id: u64) -> String {
    format!("{BGP_PREFIX}{vol_id}-{bg_id}")
}

pub(crate) fn block_key(ip: &str, port: i32, blk_id: u64) -> String {
    format!("{BLK_PREFIX}{ip}:{port}-{blk_id}")
}

/// Outcome of a block-group range scan. Records that fail to decode are
/// counted rather than failing the scan, so volume teardown can keep going
/// and report the garbage instead of orphaning the remaining groups.
pub struct BgpScan {
    pub groups: Vec<BlockGroup>,
    pub undecodable: usize,
}

/// Typed access to the cluster group's keyspaces.
#[derive(Clone)]
pub struct ClusterKv {
    raft: Arc<dyn RaftKv>,
}

impl ClusterKv {
    pub fn new(raft: Arc<dyn RaftKv>) -> Self {
        Self { raft }
    }

    pub async fn datanode_get(&self, ip: &str, port: i32) -> Result<Option<DataNode>> {
        let key = datanode_key(ip, port);
        let Some(raw) = self.raft.get(CLUSTER_GROUP, &key).await? else {
            return Ok(None);
        };
        let node = DataNode::decode(raw.as_slice())
            .with_context(|| format!("decode datanode record {key}"))?;
        Ok(Some(node))
    }

    pub async fn datanode_set(&self, node: &DataNode) -> Result<()> {
        let key = datanode_key(&node.ip, node.port);
        self.raft
            .set(CLUSTER_GROUP, &key, node.encode_to_vec())
            .await
            .with_context(|| format!("replicate datanode record {key}"))
    }

    pub async fn datanode_del(&self, ip: &str, port: i32) -> Result<bool> {
        let key = datanode_key(ip, port);
        self.raft
            .delete(CLUSTER_GROUP, &key)
            .await
            .with_context(|| format!("delete datanode record {key}"))
    }

    /// Every registered datanode, in lexical key order.
    pub async fn datanode_list(&self) -> Result<Vec<DataNode>> {
        let entries = self
            .raft
            .get_range(CLUSTER_GROUP, DN_PREFIX)
            .await
            .context("range datanode keyspace")?;
        entries
            .into_iter()
            .map(|entry| {
                DataNode::decode(entry.value.as_slice())
                    .with_context(|| format!("decode datanode record {}", entry.key))
            })
            .collect()
    }

    pub async fn vol_get(&self, vol_id: &str) -> Result<Option<Volume>> {
        let key = vol_key(vol_id);
        let Some(raw) = self.raft.get(CLUSTER_GROUP, &key).await? else {
            return Ok(None);
        };
        let vol =
            Volume::decode(raw.as_slice()).with_context(|| format!("decode volume record {key}"))?;
        Ok(Some(vol))
    }

    pub async fn vol_set(&self, vol: &Volume) -> Result<()> {
        let key = vol_key(&vol.uuid);
        self.raft
            .set(CLUSTER_GROUP, &key, vol.encode_to_vec())
            .await
            .with_context(|| format!("replicate volume record {key}"))
    }

    pub async fn vol_del(&self, vol_id: &str) -> Result<bool> {
        let key = vol_key(vol_id);
        self.raft
            .delete(CLUSTER_GROUP, &key)
            .await
            .with_context(|| format!("delete volume record {key}"))
    }

    pub async fn bgp_get(&self, vol_id: &str, bg_id: u64) -> Result<Option<BlockGroup>> {
        let key = bgp_key(vol_id, bg_id);
        let Some(raw) = self.raft.get(CLUSTER_GROUP, &key).await? else {
            return Ok(None);
        };
        let group = BlockGroup::decode(raw.as_slice())
            .with_context(|| format!("decode block group record {key}"))?;
        Ok(Some(group))
    }

    pub async fn bgp_set(&self, vol_id: &str, bg_id: u64, group: &BlockGroup) -> Result<()> {
        let key = bgp_key(vol_id, bg_id);
        self.raft
            .set(CLUSTER_GROUP, &key, group.encode_to_vec())
            .await
            .with_context(|| format!("replicate block group record {key}"))
    }

    pub async fn bgp_del(&self, vol_id: &str, bg_id: u64) -> Result<bool> {
        let key = bgp_key(vol_id, bg_id);
        self.raft
            .delete(CLUSTER_GROUP, &key)
            .await
            .with_context(|| format!("delete block group record {key}"))
    }

    /// Every decodable block group of one volume, in lexical key order,
    /// plus a tally of records that would not decode. The trailing `-`
    /// keeps a volume whose uuid is a prefix of another uuid from leaking
    /// into the scan.
    pub async fn bgp_list(&self, vol_id: &str) -> Result<BgpScan> {
        let prefix = format!("{BGP_PREFIX}{vol_id}-");
        let entries = self
            .raft
            .get_range(CLUSTER_GROUP, &prefix)
            .await
            .with_context(|| format!("range block groups of volume {vol_id}"))?;
        let mut scan = BgpScan {
            groups: Vec::with_capacity(entries.len()),
            undecodable: 0,
        };
        for entry in entries {
            match BlockGroup::decode(entry.value.as_slice()) {
                Ok(group) => scan.groups.push(group),
                Err(err) => {
                    tracing::error!(error = ?err, key = %entry.key, "undecodable block group record");
                    scan.undecodable += 1;
                }
            }
        }
        Ok(scan)
    }

    pub async fn block_get(&self, ip: &str, port: i32, blk_id: u64) -> Result<Option<Block>> {
        let key = block_key(ip, port, blk_id);
        let Some(raw) = self.raft.get(CLUSTER_GROUP, &key).await? else {
            return Ok(None);
        };
        let blk =
            Block::decode(raw.as_slice()).with_context(|| format!("decode block record {key}"))?;
        Ok(Some(blk))
    }

    pub async fn block_set(&self, blk: &Block) -> Result<()> {
        let key = block_key(&blk.ip, blk.port, blk.blk_id);
        self.raft
            .set(CLUSTER_GROUP, &key, blk.encode_to_vec())
            .await
            .with_context(|| format!("replicate block record {key}"))
    }

    pub async fn block_del(&self, ip: &str, port: i32, blk_id: u64) -> Result<bool> {
        let key = block_key(ip, port, blk_id);
        self.raft
            .delete(CLUSTER_GROUP, &key)
            .await
            .with_context(|| format!("delete block record {key}"))
    }

    /// Every block hosted on one datanode. The trailing `-` keeps port 80
    /// from matching port 8001.
    pub async fn block_list(&self, ip: &str, port: i32) -> Result<Vec<Block>> {
        let prefix = format!("{BLK_PREFIX}{ip}:{port}-");
        let entries = self
            .raft
            .get_range(CLUSTER_GROUP, &prefix)
            .await
            .with_context(|| format!("range blocks of datanode {ip}:{port}"))?;
        entries
            .into_iter()
            .map(|entry| {
                Block::decode(entry.value.as_slice())
                    .with_context(|| format!("decode block record {}", entry.key))
            })
            .collect()
    }

    /// Allocate the consensus group id for a new volume namespace.
    pub async fn allocate_rgid(&self) -> Result<u64> {
        Ok(self.raft.next_id(CLUSTER_GROUP, RGID_COUNTER).await?)
    }

    pub async fn allocate_bgid(&self) -> Result<u64> {
        Ok(self.raft.next_id(CLUSTER_GROUP, BGID_COUNTER).await?)
    }

    pub async fn allocate_block_id(&self) -> Result<u64> {
        Ok(self.raft.next_id(CLUSTER_GROUP, BLKID_COUNTER).await?)
    }
}
