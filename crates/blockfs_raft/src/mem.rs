//! Deterministic single-process [`RaftKv`] used by tests and embedded tooling.
//!
//! `MemKv` keeps each group's state in an ordered map and applies every
//! mutation under one lock, which gives the same per-key linearizability the
//! real engine provides. A fault toggle lets tests exercise the quorum-loss
//! paths of callers without a real cluster.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{GroupId, KvEntry, RaftError, RaftKv};

/// In-memory replicated KV stand-in.
#[derive(Default)]
pub struct MemKv {
    groups: Mutex<HashMap<GroupId, BTreeMap<String, Vec<u8>>>>,
    unavailable: AtomicBool,
}

impl MemKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, every mutation fails with [`RaftError::Unavailable`].
    /// Reads keep working, mirroring a replica that still serves its
    /// committed state while the group has no leader.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_writable(&self, group: GroupId) -> Result<(), RaftError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RaftError::Unavailable(group));
        }
        Ok(())
    }
}

#[async_trait]
impl RaftKv for MemKv {
    async fn get(&self, group: GroupId, key: &str) -> Result<Option<Vec<u8>>, RaftError> {
        let groups = self.groups.lock().unwrap();
        Ok(groups.get(&group).and_then(|kv| kv.get(key)).cloned())
    }

    async fn set(&self, group: GroupId, key: &str, value: Vec<u8>) -> Result<(), RaftError> {
        self.check_writable(group)?;
        let mut groups = self.groups.lock().unwrap();
        groups.entry(group).or_default().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, group: GroupId, key: &str) -> Result<bool, RaftError> {
        self.check_writable(group)?;
        let mut groups = self.groups.lock().unwrap();
        Ok(groups
            .get_mut(&group)
            .map(|kv| kv.remove(key).is_some())
            .unwrap_or(false))
    }

    async fn get_range(&self, group: GroupId, prefix: &str) -> Result<Vec<KvEntry>, RaftError> {
        let groups = self.groups.lock().unwrap();
        let Some(kv) = groups.get(&group) else {
            return Ok(Vec::new());
        };
        Ok(kv
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| KvEntry {
                key: key.clone(),
                value: value.clone(),
            })
            .collect())
    }

    async fn next_id(&self, group: GroupId, counter: &str) -> Result<u64, RaftError> {
        self.check_writable(group)?;
        let mut groups = self.groups.lock().unwrap();
        let kv = groups.entry(group).or_default();
        let current = match kv.get(counter) {
            Some(raw) => {
                let bytes: [u8; 8] = raw
                    .as_slice()
                    .try_into()
                    .map_err(|_| RaftError::Storage(format!("corrupt counter {counter}")))?;
                u64::from_be_bytes(bytes)
            }
            None => 0,
        };
        let next = current + 1;
        kv.insert(counter.to_string(), next.to_be_bytes().to_vec());
        Ok(next)
    }
}
