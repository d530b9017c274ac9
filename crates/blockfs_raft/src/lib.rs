//! Client-side interface to the replicated consensus groups.
//!
//! The consensus engine itself lives outside this repository. Higher layers
//! see one replicated key-value store per group: every mutation is linearized
//! through the group's log before `set`/`delete`/`next_id` return, and every
//! read is served from the local replica's committed state. The cluster core
//! is written against the [`RaftKv`] trait only, so the engine can be swapped
//! for the in-memory stand-in in [`mem`] under test.

pub mod mem;

use async_trait::async_trait;

/// Identifier of one consensus group.
pub type GroupId = u64;

/// Errors surfaced by the consensus client.
///
/// `Unavailable` and `NoQuorum` are terminal for the current operation: the
/// client has already exhausted its own bounded retries by the time either is
/// returned, and callers propagate them upstream rather than retrying.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RaftError {
    #[error("group {0} has no elected leader")]
    Unavailable(GroupId),
    #[error("group {0} lost quorum before the entry committed")]
    NoQuorum(GroupId),
    #[error("consensus storage: {0}")]
    Storage(String),
}

/// One committed key-value pair returned by a range read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    pub key: String,
    pub value: Vec<u8>,
}

/// Replicated key-value store handle.
///
/// Values are opaque byte strings; interpretation belongs to the caller.
/// Keys are ASCII strings ordered lexically.
#[async_trait]
pub trait RaftKv: Send + Sync + 'static {
    /// Read one key from the local committed state.
    async fn get(&self, group: GroupId, key: &str) -> Result<Option<Vec<u8>>, RaftError>;

    /// Replicate an upsert of `key` through the group's log.
    async fn set(&self, group: GroupId, key: &str, value: Vec<u8>) -> Result<(), RaftError>;

    /// Replicate a delete. Returns `false` when the key was not present.
    async fn delete(&self, group: GroupId, key: &str) -> Result<bool, RaftError>;

    /// Return every committed entry whose key starts with `prefix`, in
    /// lexical key order.
    async fn get_range(&self, group: GroupId, prefix: &str) -> Result<Vec<KvEntry>, RaftError>;

    /// Replicate an increment of the named monotonic counter and return the
    /// new value. Successive calls for one counter yield strictly increasing
    /// ids, across every client of the group.
    async fn next_id(&self, group: GroupId, counter: &str) -> Result<u64, RaftError>;
}
