//! Randomized block placement with per-IP anti-affinity.
//!
//! Placement is deliberately cheap: filter the fleet, group the surviving
//! disks by host IP, then sample distinct IPs uniformly. There is no
//! weighting by free capacity; evening out load is the migration engine's
//! job. A fresh PRNG is seeded from the wall clock per allocation request so
//! no process-global RNG lock is needed.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::Rng;

use crate::proto::DataNode;
use crate::BLK_SIZE_GIB;

/// Free-space floor for create/expand placement. Six groups of one request
/// may land on the same host, so a candidate must fit the worst case.
pub const CREATE_MIN_FREE_GIB: i32 = 30;

/// Free-space floor for a migration replacement block.
pub const MIGRATE_MIN_FREE_GIB: i32 = 10;

/// Wall-clock nanosecond seed for a per-request PRNG.
pub fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64 ^ d.as_secs())
        .unwrap_or(0)
}

/// Admission filter for placement candidates.
pub struct CandidateFilter<'a> {
    pub tier: &'a str,
    pub min_free: i32,
    /// Host IPs that must not receive a replica (anti-affinity anchors).
    pub exclude_ips: &'a [String],
}

impl CandidateFilter<'_> {
    fn admits(&self, node: &DataNode) -> bool {
        node.status == 0
            && node.free >= self.min_free
            && node.tier == self.tier
            && !self.exclude_ips.iter().any(|ip| *ip == node.ip)
    }
}

/// Placement candidates of one allocation request, grouped by host IP.
///
/// The set carries its own working copy of each datanode record: every pick
/// debits the chosen disk in place, so later picks inside the same request
/// see the updated free space. The caller persists the debited records.
pub struct CandidateSet {
    by_ip: HashMap<String, Vec<DataNode>>,
    ips: Vec<String>,
}

impl CandidateSet {
    pub fn build(nodes: Vec<DataNode>, filter: &CandidateFilter<'_>) -> Self {
        let mut by_ip: HashMap<String, Vec<DataNode>> = HashMap::new();
        for node in nodes {
            if filter.admits(&node) {
                by_ip.entry(node.ip.clone()).or_default().push(node);
            }
        }
        let mut ips: Vec<String> = by_ip.keys().cloned().collect();
        ips.sort();
        Self { by_ip, ips }
    }

    /// Number of distinct host IPs with at least one admitted disk.
    pub fn distinct_ips(&self) -> usize {
        self.ips.len()
    }

    /// Pick `count` hosts on distinct IPs, one disk per IP, and debit each
    /// chosen disk by one block. Returns `None` when fewer than `count`
    /// distinct IPs are available.
    pub fn take_hosts(&mut self, rng: &mut StdRng, count: usize) -> Option<Vec<DataNode>> {
        let ip_picks = sample_distinct(rng, self.ips.len(), count)?;
        let mut hosts = Vec::with_capacity(count);
        for ip_idx in ip_picks {
            let disks = self.by_ip.get_mut(&self.ips[ip_idx])?;
            let disk_idx = rng.gen_range(0..disks.len());
            disks[disk_idx].free -= BLK_SIZE_GIB;
            hosts.push(disks[disk_idx].clone());
        }
        Some(hosts)
    }
}

/// Draw `count` distinct indices from `[0, bound)` by rejection sampling.
pub fn sample_distinct(rng: &mut StdRng, bound: usize, count: usize) -> Option<Vec<usize>> {
    if bound < count {
        return None;
    }
    let mut picked: Vec<usize> = Vec::with_capacity(count);
    while picked.len() < count {
        let candidate = rng.gen_range(0..bound);
        if !picked.contains(&candidate) {
            picked.push(candidate);
        }
    }
    Some(picked)
}
