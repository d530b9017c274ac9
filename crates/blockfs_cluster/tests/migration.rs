//! Migration-engine integration tests: draining an evacuating datanode,
//! replacement placement, copy-failure rollback and drain cancellation.

mod common;

use std::collections::HashSet;
use std::time::{Duration, Instant};

use blockfs_cluster::proto::{Block, BlockGroup, CreateVolReq, DelDatanodeReq, MigrateReq};
use blockfs_cluster::BLK_SIZE_GIB;

use common::{cluster, datanode, must_get_node, register_fleet, TestCluster};

const HDD_IPS: [&str; 3] = ["10.1.1.1", "10.1.1.2", "10.1.1.3"];
const SPARE_IP: &str = "10.1.1.4";

/// Three hosts with one volume of two groups, plus one empty spare host.
async fn seeded_cluster() -> (TestCluster, String) {
    let cluster = cluster();
    register_fleet(&cluster, &HDD_IPS, 100, "hdd").await;
    let ack = cluster
        .server
        .create_vol(CreateVolReq {
            vol_name: "v1".to_string(),
            space_quota: 10,
            tier: "hdd".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(ack.ret, 0);
    cluster
        .server
        .datanode_registry(datanode(SPARE_IP, 1, 100, "hdd"))
        .await
        .unwrap();
    (cluster, ack.uuid)
}

#[tokio::test]
async fn drain_moves_every_block_to_the_spare_host() {
    let (cluster, vol_id) = seeded_cluster().await;

    let summary = cluster.server.drain_datanode(HDD_IPS[0], 1).await.unwrap();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.moved, 2);
    assert_eq!(summary.failed, 0);

    // Every block that lived on the drained host is gone from it.
    assert!(cluster.kv.block_list(HDD_IPS[0], 1).await.unwrap().is_empty());

    // Groups are whole again: three blocks, three distinct IPs, none the
    // drained host.
    let groups = cluster.kv.bgp_list(&vol_id).await.unwrap().groups;
    assert_eq!(groups.len(), 2);
    for group in &groups {
        assert_eq!(group.blocks.len(), 3);
        let ips: HashSet<&str> = group.blocks.iter().map(|blk| blk.ip.as_str()).collect();
        assert_eq!(ips.len(), 3);
        assert!(!ips.contains(HDD_IPS[0]));
        for blk in &group.blocks {
            let hosted = cluster.kv.block_list(&blk.ip, blk.port).await.unwrap();
            assert!(hosted.iter().any(|candidate| candidate.blk_id == blk.blk_id));
        }
    }

    // Both replacements landed on the only admissible host.
    assert_eq!(
        cluster.fleet.copied_destinations(),
        vec![SPARE_IP.to_string(), SPARE_IP.to_string()]
    );
    assert_eq!(
        must_get_node(&cluster, SPARE_IP, 1).await.free,
        100 - 2 * BLK_SIZE_GIB
    );
    // The evacuated host got its space back.
    assert_eq!(must_get_node(&cluster, HDD_IPS[0], 1).await.free, 100);
}

#[tokio::test]
async fn migrate_acks_immediately_and_drains_in_the_background() {
    let (cluster, _) = seeded_cluster().await;

    let ack = cluster
        .server
        .migrate(MigrateReq {
            datanode_ip: HDD_IPS[0].to_string(),
            datanode_port: 1,
        })
        .await
        .unwrap();
    assert_eq!(ack.ret, 0);

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if cluster.kv.block_list(HDD_IPS[0], 1).await.unwrap().is_empty() {
            break;
        }
        assert!(Instant::now() < deadline, "drain did not finish in time");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn duplicate_migrate_requests_run_one_drain() {
    let (cluster, _) = seeded_cluster().await;
    let req = MigrateReq {
        datanode_ip: HDD_IPS[0].to_string(),
        datanode_port: 1,
    };

    assert_eq!(cluster.server.migrate(req.clone()).await.unwrap().ret, 0);
    assert_eq!(cluster.server.migrate(req).await.unwrap().ret, 0);

    let deadline = Instant::now() + Duration::from_secs(5);
    while !cluster.kv.block_list(HDD_IPS[0], 1).await.unwrap().is_empty() {
        assert!(Instant::now() < deadline, "drain did not finish in time");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    // Two blocks lived on the node, so exactly two copies ran.
    assert_eq!(cluster.fleet.copies.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn copy_failure_rolls_the_reservation_back() {
    let (cluster, vol_id) = seeded_cluster().await;
    cluster.fleet.fail_copies(true);

    let summary = cluster.server.drain_datanode(HDD_IPS[0], 1).await.unwrap();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.moved, 0);
    assert_eq!(summary.failed, 2);

    // Nothing moved: the drained host keeps its blocks and the groups their
    // original membership.
    assert_eq!(cluster.kv.block_list(HDD_IPS[0], 1).await.unwrap().len(), 2);
    for group in cluster.kv.bgp_list(&vol_id).await.unwrap().groups {
        let ips: HashSet<&str> = group.blocks.iter().map(|blk| blk.ip.as_str()).collect();
        assert!(ips.contains(HDD_IPS[0]));
    }
    // The failed reservation was rolled back on the spare host.
    assert!(cluster.kv.block_list(SPARE_IP, 1).await.unwrap().is_empty());
    assert_eq!(must_get_node(&cluster, SPARE_IP, 1).await.free, 100);
}

#[tokio::test]
async fn drain_without_an_admissible_host_leaves_blocks_in_place() {
    let cluster = cluster();
    register_fleet(&cluster, &HDD_IPS, 100, "hdd").await;
    let ack = cluster
        .server
        .create_vol(CreateVolReq {
            vol_name: "v1".to_string(),
            space_quota: 5,
            tier: "hdd".to_string(),
        })
        .await
        .unwrap();

    // No spare host: the survivors and the evacuating host are all excluded.
    let summary = cluster.server.drain_datanode(HDD_IPS[0], 1).await.unwrap();
    assert_eq!(summary.failed, summary.total);
    assert_eq!(cluster.kv.bgp_list(&ack.uuid).await.unwrap().groups.len(), 1);
    assert_eq!(cluster.kv.block_list(HDD_IPS[0], 1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn replacement_requires_exactly_two_survivors() {
    let (cluster, vol_id) = seeded_cluster().await;

    // Shrink one group to two blocks; migrating one of them leaves a single
    // survivor, which the engine must refuse.
    let groups = cluster.kv.bgp_list(&vol_id).await.unwrap().groups;
    let group = &groups[0];
    let bg_id = group.blocks[0].bg_id;
    let two_blocks = BlockGroup {
        blocks: group.blocks[..2].to_vec(),
    };
    cluster.kv.bgp_set(&vol_id, bg_id, &two_blocks).await.unwrap();

    let err = cluster
        .server
        .begin_migrate(&two_blocks.blocks[0], "hdd")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("surviving replicas"));
}

#[tokio::test]
async fn migrating_an_orphan_block_fails() {
    let (cluster, _) = seeded_cluster().await;
    let orphan = Block {
        blk_id: 999,
        ip: HDD_IPS[0].to_string(),
        port: 1,
        path: "/mnt/disk1".to_string(),
        status: 0,
        bg_id: 999,
        vol_id: "no-such-volume".to_string(),
    };
    assert!(cluster.server.begin_migrate(&orphan, "hdd").await.is_err());
}

#[tokio::test]
async fn drain_of_unknown_datanode_fails() {
    let cluster = cluster();
    assert!(cluster.server.drain_datanode("10.9.9.9", 1).await.is_err());
}

#[tokio::test]
async fn deleting_a_datanode_cancels_its_drain() {
    let (cluster, _) = seeded_cluster().await;

    cluster
        .server
        .migrate(MigrateReq {
            datanode_ip: HDD_IPS[0].to_string(),
            datanode_port: 1,
        })
        .await
        .unwrap();
    let ack = cluster
        .server
        .del_datanode(DelDatanodeReq {
            ip: HDD_IPS[0].to_string(),
            port: 1,
        })
        .await
        .unwrap();
    assert_eq!(ack.ret, 0);
    assert!(cluster
        .kv
        .datanode_get(HDD_IPS[0], 1)
        .await
        .unwrap()
        .is_none());
}
