//! Volume lifecycle: create, expand, tear down.
//!
//! Create and expand share one allocation path: size the request in whole
//! blocks, snapshot the fleet, then place block groups one by one, debiting
//! each chosen disk as it is picked. The underlying KV offers no multi-key
//! atomicity, so a failure mid-allocation leaves the ids, blocks and debits
//! already committed in place; teardown is correspondingly best-effort and
//! counts failures instead of aborting, so a partial garbage state never
//! blocks a retry.

use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use uuid::Uuid;

use crate::placement::{clock_seed, CandidateFilter, CandidateSet, CREATE_MIN_FREE_GIB};
use crate::proto::{
    Block, BlockGroup, CreateNameSpaceReq, CreateVolAck, CreateVolReq, DelVolRsForExpandAck,
    DelVolRsForExpandReq, DeleteNameSpaceReq, DeleteVolAck, DeleteVolReq, ExpandVolRsAck,
    ExpandVolRsReq, ExpandVolTsAck, ExpandVolTsReq, Volume,
};
use crate::server::ClusterServer;
use crate::BLK_SIZE_GIB;

/// Size a quota in whole block groups.
///
/// Returns the group count and the quota clamped to `groups * BLK_SIZE_GIB`.
/// The cap bounds how much one call materializes; a request demanding more
/// comes back for the remainder through `ExpandVolTS`/`ExpandVolRS`.
pub(crate) fn block_group_demand(quota_gib: i32, cap: i32) -> (i32, i32) {
    let mut groups = quota_gib / BLK_SIZE_GIB;
    if quota_gib % BLK_SIZE_GIB != 0 {
        groups += 1;
    }
    let groups = groups.min(cap);
    (groups, groups * BLK_SIZE_GIB)
}

impl ClusterServer {
    /// Create a volume: allocate its namespace group id, place its block
    /// groups, persist the volume record, then bring up the per-volume
    /// namespace locally and on every peer.
    pub async fn create_vol(&self, req: CreateVolReq) -> Result<CreateVolAck> {
        let _serial = self.serial.lock().await;
        let mut ack = CreateVolAck::default();

        let vol_id = Uuid::new_v4().to_string();
        let (bg_count, quota) =
            block_group_demand(req.space_quota, self.cfg.max_block_groups_per_request);

        let rg_id = self
            .kv
            .allocate_rgid()
            .await
            .with_context(|| format!("allocate namespace group id for volume {vol_id}"))?;

        if self
            .allocate_block_groups(&vol_id, &req.tier, bg_count)
            .await?
            .is_none()
        {
            tracing::error!(
                vol_id = %vol_id,
                tier = %req.tier,
                "create refused: fewer than three distinct hosts match the placement filter"
            );
            ack.ret = -1;
            return Ok(ack);
        }

        let vol = Volume {
            uuid: vol_id.clone(),
            name: req.vol_name.clone(),
            tier: req.tier.clone(),
            total_size: quota,
            allocated_size: bg_count * BLK_SIZE_GIB,
            rg_id,
        };
        self.kv.vol_set(&vol).await?;

        if let Err(err) = self.namespaces.create_namespace(&vol_id, rg_id).await {
            tracing::error!(
                error = ?err,
                vol_id = %vol_id,
                rg_id,
                "local namespace create failed, refusing volume"
            );
            ack.ret = -1;
            return Ok(ack);
        }
        self.fan_out_namespace(&vol_id, rg_id).await?;

        tracing::info!(
            vol_id = %vol_id,
            name = %req.vol_name,
            tier = %req.tier,
            total_size = quota,
            block_groups = bg_count,
            rg_id,
            "volume created"
        );
        ack.ret = 0;
        ack.uuid = vol_id;
        ack.raft_group_id = rg_id;
        Ok(ack)
    }

    /// Raise a volume's promised quota without materializing space.
    pub async fn expand_vol_ts(&self, req: ExpandVolTsReq) -> Result<ExpandVolTsAck> {
        let mut ack = ExpandVolTsAck::default();
        let Some(mut vol) = self.kv.vol_get(&req.vol_id).await? else {
            tracing::error!(vol_id = %req.vol_id, "quota expand of unknown volume");
            ack.ret = -1;
            return Ok(ack);
        };

        let mut expand = req.expand_quota;
        if expand % BLK_SIZE_GIB != 0 {
            expand = (expand / BLK_SIZE_GIB + 1) * BLK_SIZE_GIB;
        }
        vol.total_size += expand;
        self.kv.vol_set(&vol).await?;

        tracing::info!(vol_id = %req.vol_id, total_size = vol.total_size, "volume quota raised");
        ack.ret = 0;
        Ok(ack)
    }

    /// Materialize the space promised by prior quota bumps. Returns ret 1
    /// plus the new block groups while progress is possible, ret 0 once
    /// allocated size has caught up; callers loop until 0.
    pub async fn expand_vol_rs(&self, req: ExpandVolRsReq) -> Result<ExpandVolRsAck> {
        let _serial = self.serial.lock().await;
        let mut ack = ExpandVolRsAck::default();

        let Some(mut vol) = self.kv.vol_get(&req.vol_id).await? else {
            tracing::error!(vol_id = %req.vol_id, "space expand of unknown volume");
            ack.ret = -1;
            return Ok(ack);
        };

        let need = vol.total_size - vol.allocated_size;
        if need <= 0 {
            ack.ret = 0;
            return Ok(ack);
        }
        let (bg_count, _) = block_group_demand(need, self.cfg.max_block_groups_per_request);

        let Some(bgps) = self
            .allocate_block_groups(&vol.uuid, &vol.tier, bg_count)
            .await?
        else {
            tracing::error!(
                vol_id = %req.vol_id,
                tier = %vol.tier,
                "expand refused: fewer than three distinct hosts match the placement filter"
            );
            ack.ret = -1;
            return Ok(ack);
        };

        vol.allocated_size += bg_count * BLK_SIZE_GIB;
        self.kv.vol_set(&vol).await?;

        tracing::info!(
            vol_id = %req.vol_id,
            block_groups = bg_count,
            allocated_size = vol.allocated_size,
            "volume space materialized"
        );
        ack.ret = 1;
        ack.bgps = bgps;
        Ok(ack)
    }

    /// Rollback counterpart to `expand_vol_rs`, used when the client-side
    /// expansion flow aborts after the cluster committed the new groups but
    /// before the volume namespace learned about them.
    pub async fn del_vol_rs_for_expand(
        &self,
        req: DelVolRsForExpandReq,
    ) -> Result<DelVolRsForExpandAck> {
        let mut ack = DelVolRsForExpandAck::default();
        let mut failed_groups = 0;
        for bgp in &req.bgps {
            if !self.teardown_block_group(&req.uuid, bgp).await {
                failed_groups += 1;
            }
        }
        if failed_groups != 0 {
            tracing::error!(
                vol_id = %req.uuid,
                failed_groups,
                "expansion rollback left partial state"
            );
            ack.ret = -1;
            return Ok(ack);
        }
        tracing::info!(vol_id = %req.uuid, groups = req.bgps.len(), "expansion rolled back");
        ack.ret = 0;
        Ok(ack)
    }

    /// Delete a volume and tear down every block group it owns, refunding
    /// the space to the hosting datanodes.
    pub async fn delete_vol(&self, req: DeleteVolReq) -> Result<DeleteVolAck> {
        let mut ack = DeleteVolAck::default();
        if !self.kv.vol_del(&req.uuid).await? {
            tracing::error!(vol_id = %req.uuid, "delete of unknown volume");
            ack.ret = -1;
            return Ok(ack);
        }

        let scan = self.kv.bgp_list(&req.uuid).await?;
        // Undecodable group records count as failed teardowns; the rest of
        // the volume still comes down.
        let mut failed_groups = scan.undecodable;
        for bgp in &scan.groups {
            if !self.teardown_block_group(&req.uuid, bgp).await {
                failed_groups += 1;
            }
        }
        if failed_groups != 0 {
            tracing::error!(vol_id = %req.uuid, failed_groups, "volume delete left partial state");
            ack.ret = -1;
            return Ok(ack);
        }
        tracing::info!(vol_id = %req.uuid, groups = scan.groups.len(), "volume deleted");
        ack.ret = 0;
        Ok(ack)
    }

    /// Place `bg_count` block groups for one volume out of a single fleet
    /// snapshot. Returns `None` when fewer than three distinct IPs pass the
    /// placement filter; anything already written stays written.
    pub(crate) async fn allocate_block_groups(
        &self,
        vol_id: &str,
        tier: &str,
        bg_count: i32,
    ) -> Result<Option<Vec<BlockGroup>>> {
        let nodes = self.kv.datanode_list().await?;
        let filter = CandidateFilter {
            tier,
            min_free: CREATE_MIN_FREE_GIB,
            exclude_ips: &[],
        };
        let mut candidates = CandidateSet::build(nodes, &filter);
        if candidates.distinct_ips() < 3 {
            return Ok(None);
        }

        let mut rng = StdRng::seed_from_u64(clock_seed());
        let mut bgps = Vec::with_capacity(bg_count as usize);
        for _ in 0..bg_count {
            let bg_id = self
                .kv
                .allocate_bgid()
                .await
                .context("allocate block group id")?;
            let Some(hosts) = candidates.take_hosts(&mut rng, 3) else {
                return Ok(None);
            };

            let mut group = BlockGroup::default();
            for host in hosts {
                let blk_id = self.kv.allocate_block_id().await.context("allocate block id")?;
                let blk = Block {
                    blk_id,
                    ip: host.ip.clone(),
                    port: host.port,
                    path: host.mount_point.clone(),
                    status: host.status,
                    bg_id,
                    vol_id: vol_id.to_string(),
                };
                self.kv.block_set(&blk).await?;
                // `host` already carries the placement debit.
                self.kv.datanode_set(&host).await?;
                group.blocks.push(blk);
            }
            self.kv.bgp_set(vol_id, bg_id, &group).await?;
            tracing::debug!(vol_id = %vol_id, bg_id, "block group placed");
            bgps.push(group);
        }
        Ok(Some(bgps))
    }

    /// Delete one block group and its blocks, refunding each hosting
    /// datanode. Best-effort: failures are logged and tallied, not fatal.
    /// Returns true when every record went away.
    pub(crate) async fn teardown_block_group(&self, vol_id: &str, bgp: &BlockGroup) -> bool {
        let Some(bg_id) = bgp.blocks.first().map(|blk| blk.bg_id) else {
            tracing::error!(vol_id = %vol_id, "teardown of block group with no blocks");
            return false;
        };

        let mut failed_blocks = 0;
        for blk in &bgp.blocks {
            if let Err(err) = self.release_block(blk).await {
                tracing::error!(
                    error = ?err,
                    vol_id = %vol_id,
                    bg_id,
                    blk_id = blk.blk_id,
                    "block release failed during teardown"
                );
                failed_blocks += 1;
            }
        }

        match self.kv.bgp_del(vol_id, bg_id).await {
            Ok(true) => failed_blocks == 0,
            Ok(false) => {
                tracing::error!(vol_id = %vol_id, bg_id, "block group record already missing");
                false
            }
            Err(err) => {
                tracing::error!(error = ?err, vol_id = %vol_id, bg_id, "block group delete failed");
                false
            }
        }
    }

    /// Drop one block record and credit the space back to its datanode.
    pub(crate) async fn release_block(&self, blk: &Block) -> Result<()> {
        if !self.kv.block_del(&blk.ip, blk.port, blk.blk_id).await? {
            bail!("block record {}:{}-{} already missing", blk.ip, blk.port, blk.blk_id);
        }
        let Some(mut node) = self.kv.datanode_get(&blk.ip, blk.port).await? else {
            bail!("datanode record {}:{} missing for refund", blk.ip, blk.port);
        };
        node.free += BLK_SIZE_GIB;
        self.kv.datanode_set(&node).await
    }

    /// Tell every peer cluster server to host the new volume's namespace
    /// group. A refusing or unreachable peer fails the whole create; peers
    /// already notified get a best-effort compensating delete first.
    async fn fan_out_namespace(&self, vol_id: &str, rg_id: u64) -> Result<()> {
        let mut notified: Vec<&String> = Vec::new();
        for peer in &self.cfg.peers {
            if *peer == self.cfg.grpc_addr {
                continue;
            }
            let req = CreateNameSpaceReq {
                vol_id: vol_id.to_string(),
                raft_group_id: rg_id,
                r#type: 1,
            };
            let outcome = self.meta_peers.create_namespace(peer, req).await;
            match outcome {
                Ok(ack) if ack.ret == 0 => notified.push(peer),
                Ok(ack) => {
                    self.retract_namespace(vol_id, &notified).await;
                    bail!("peer {peer} refused namespace for volume {vol_id}: ret {}", ack.ret);
                }
                Err(err) => {
                    self.retract_namespace(vol_id, &notified).await;
                    return Err(err)
                        .with_context(|| format!("create namespace for volume {vol_id} on peer {peer}"));
                }
            }
        }
        Ok(())
    }

    async fn retract_namespace(&self, vol_id: &str, notified: &[&String]) {
        for peer in notified {
            let req = DeleteNameSpaceReq {
                vol_id: vol_id.to_string(),
            };
            match self.meta_peers.delete_namespace(peer, req).await {
                Ok(ack) if ack.ret == 0 => {}
                Ok(ack) => tracing::warn!(
                    peer = %peer,
                    vol_id = %vol_id,
                    ret = ack.ret,
                    "namespace retraction refused"
                ),
                Err(err) => tracing::warn!(
                    error = ?err,
                    peer = %peer,
                    vol_id = %vol_id,
                    "namespace retraction failed"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demand_rounds_up_to_whole_blocks() {
        assert_eq!(block_group_demand(1, 6), (1, 5));
        assert_eq!(block_group_demand(5, 6), (1, 5));
        assert_eq!(block_group_demand(10, 6), (2, 10));
        assert_eq!(block_group_demand(14, 6), (3, 15));
    }

    #[test]
    fn demand_clamps_to_the_per_call_cap() {
        assert_eq!(block_group_demand(30, 6), (6, 30));
        assert_eq!(block_group_demand(31, 6), (6, 30));
        assert_eq!(block_group_demand(100, 6), (6, 30));
        // The cap is a config knob, not a constant.
        assert_eq!(block_group_demand(100, 8), (8, 40));
    }

    #[test]
    fn zero_quota_demands_nothing() {
        assert_eq!(block_group_demand(0, 6), (0, 0));
    }
}
