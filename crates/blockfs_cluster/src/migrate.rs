//! Migration engine: drain blocks off an evacuating datanode.
//!
//! `migrate` only enqueues: it spawns one detached drain task per source
//! node and acks immediately; completion is reported through logs. The drain
//! walks every block hosted on the node and replaces them one at a time
//! through `begin_migrate`, which runs under the server-wide serial lock so
//! at most one replica of any group is in flight across the whole cluster.

use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::placement::{clock_seed, CandidateFilter, CandidateSet, MIGRATE_MIN_FREE_GIB};
use crate::proto::{Block, BlockGroup, MigrateAck, MigrateReq, RecvMigrateReq};
use crate::server::ClusterServer;
use crate::transport::addr;
use crate::BLK_SIZE_GIB;

/// Outcome of one datanode drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainSummary {
    pub total: usize,
    pub moved: usize,
    pub failed: usize,
}

impl ClusterServer {
    /// Start draining a datanode in the background and ack immediately.
    /// A node with a drain already running is left alone.
    pub async fn migrate(&self, req: MigrateReq) -> Result<MigrateAck> {
        let mut ack = MigrateAck::default();
        let source = addr(&req.datanode_ip, req.datanode_port);

        let mut drains = self.drains.lock().unwrap();
        if let Some(running) = drains.get(&source) {
            if !running.is_finished() {
                tracing::info!(addr = %source, "drain already running, ignoring migrate request");
                ack.ret = 0;
                return Ok(ack);
            }
        }

        let server = self.clone();
        let (ip, port) = (req.datanode_ip.clone(), req.datanode_port);
        let task = tokio::spawn(async move {
            if let Err(err) = server.drain_datanode(&ip, port).await {
                tracing::error!(error = ?err, ip = %ip, port, "datanode drain failed");
            }
        });
        drains.insert(source, task);

        ack.ret = 0;
        Ok(ack)
    }

    /// Replace every block hosted on the given datanode. Best-effort per
    /// block: one block's failure does not stop the drain.
    pub async fn drain_datanode(&self, ip: &str, port: i32) -> Result<DrainSummary> {
        let Some(node) = self.kv.datanode_get(ip, port).await? else {
            bail!("drain of unknown datanode {}:{}", ip, port);
        };

        let blocks = self.kv.block_list(ip, port).await?;
        let total = blocks.len();
        tracing::info!(ip, port, total, "datanode drain started");

        let mut moved = 0;
        let mut failed = 0;
        for blk in blocks {
            match self.begin_migrate(&blk, &node.tier).await {
                Ok(()) => {
                    moved += 1;
                    tracing::debug!(ip, port, blk_id = blk.blk_id, moved, total, "block migrated");
                }
                Err(err) => {
                    failed += 1;
                    tracing::error!(
                        error = ?err,
                        ip,
                        port,
                        blk_id = blk.blk_id,
                        "block migration failed"
                    );
                }
            }
        }

        tracing::info!(ip, port, total, moved, failed, "datanode drain finished");
        Ok(DrainSummary { total, moved, failed })
    }

    /// One atomic replacement: reserve a block on a fresh host, copy the
    /// data from a healthy surviving replica, swap the group membership,
    /// drop the old record. Serialized cluster-wide.
    pub async fn begin_migrate(&self, blk: &Block, tier: &str) -> Result<()> {
        let _serial = self.serial.lock().await;

        let Some(group) = self.kv.bgp_get(&blk.vol_id, blk.bg_id).await? else {
            bail!("block group {}-{} missing", blk.vol_id, blk.bg_id);
        };
        let survivors: Vec<Block> = group
            .blocks
            .iter()
            .filter(|member| member.blk_id != blk.blk_id)
            .cloned()
            .collect();
        if survivors.len() != 2 {
            bail!(
                "block group {}-{} has {} surviving replicas, need exactly 2",
                blk.vol_id,
                blk.bg_id,
                survivors.len()
            );
        }

        // Anti-affinity: the replacement may not land on a surviving host
        // nor back on the node being evacuated.
        let mut exclude: Vec<String> = survivors.iter().map(|member| member.ip.clone()).collect();
        exclude.push(blk.ip.clone());

        let nodes = self.kv.datanode_list().await?;
        let filter = CandidateFilter {
            tier,
            min_free: MIGRATE_MIN_FREE_GIB,
            exclude_ips: &exclude,
        };
        let mut candidates = CandidateSet::build(nodes, &filter);
        if candidates.distinct_ips() < 1 {
            bail!(
                "no datanode matches the replacement filter for block {} of group {}-{}",
                blk.blk_id,
                blk.vol_id,
                blk.bg_id
            );
        }

        let mut rng = StdRng::seed_from_u64(clock_seed());
        let host = candidates
            .take_hosts(&mut rng, 1)
            .and_then(|mut hosts| hosts.pop())
            .context("sample replacement host")?;

        let blk_id = self
            .kv
            .allocate_block_id()
            .await
            .context("allocate replacement block id")?;
        let new_blk = Block {
            blk_id,
            ip: host.ip.clone(),
            port: host.port,
            path: host.mount_point.clone(),
            status: host.status,
            bg_id: blk.bg_id,
            vol_id: blk.vol_id.clone(),
        };
        self.kv
            .block_set(&new_blk)
            .await
            .context("reserve replacement block")?;
        // `host` already carries the placement debit.
        self.kv
            .datanode_set(&host)
            .await
            .context("debit replacement host")?;

        // Copy from the first healthy surviving replica.
        let Some(source) = survivors.iter().find(|member| member.status == 0) else {
            self.drop_reservation(&new_blk).await;
            bail!(
                "no healthy surviving replica in group {}-{}",
                blk.vol_id,
                blk.bg_id
            );
        };
        if let Err(err) = self.copy_replica(source, &new_blk).await {
            self.drop_reservation(&new_blk).await;
            return Err(err);
        }

        let mut blocks = survivors;
        blocks.push(new_blk);
        self.kv
            .bgp_set(&blk.vol_id, blk.bg_id, &BlockGroup { blocks })
            .await
            .context("rewrite block group membership")?;
        self.kv
            .block_del(&blk.ip, blk.port, blk.blk_id)
            .await
            .context("drop migrated block record")?;
        // Credit the evacuated host so its record keeps tracking hosted blocks.
        if let Some(mut evacuated) = self.kv.datanode_get(&blk.ip, blk.port).await? {
            evacuated.free += BLK_SIZE_GIB;
            self.kv.datanode_set(&evacuated).await?;
        }
        Ok(())
    }

    /// Drive the block-to-block copy on the source datanode.
    async fn copy_replica(&self, source: &Block, dest: &Block) -> Result<()> {
        let source_addr = addr(&source.ip, source.port);
        let req = RecvMigrateReq {
            src_blk_id: source.blk_id,
            src_mount: source.path.clone(),
            dst_ip: dest.ip.clone(),
            dst_port: dest.port,
            dst_blk_id: dest.blk_id,
            dst_mount: dest.path.clone(),
        };
        let outcome = tokio::time::timeout(
            self.cfg.copy_timeout(),
            self.datanodes.recv_migrate(&source_addr, req),
        )
        .await;
        match outcome {
            Ok(Ok(ack)) if ack.ret == 0 => Ok(()),
            Ok(Ok(ack)) => bail!(
                "replica copy {} -> {} refused by {}: ret {}",
                source.blk_id,
                dest.blk_id,
                source_addr,
                ack.ret
            ),
            Ok(Err(err)) => {
                Err(err).with_context(|| format!("replica copy rpc to {source_addr}"))
            }
            Err(_) => bail!(
                "replica copy {} -> {} via {} timed out",
                source.blk_id,
                dest.blk_id,
                source_addr
            ),
        }
    }

    /// Undo a replacement reservation after a failed copy: best-effort
    /// delete of the fresh block record plus a refund on the chosen host.
    async fn drop_reservation(&self, blk: &Block) {
        if let Err(err) = self.release_block(blk).await {
            tracing::warn!(
                error = ?err,
                ip = %blk.ip,
                port = blk.port,
                blk_id = blk.blk_id,
                "replacement reservation left behind"
            );
        }
    }
}
