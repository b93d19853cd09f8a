//! Token-owned lock bookkeeping for one store.
//!
//! Every lock kind nests per owner: `n` acquisitions need `n` releases
//! before another owner can take a conflicting lock. Kinds are tracked
//! independently, so a token may hold the whole-store lock and a page lock
//! at the same time.

use crate::error::{EngineError, EngineResult};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Holder {
    owner: u64,
    depth: u32,
}

/// Lock state of a single store.
#[derive(Debug, Default)]
pub(crate) struct LockTable {
    exclusive: Option<Holder>,
    shared: HashMap<u64, u32>,
    partitions: HashMap<usize, Holder>,
}

impl LockTable {
    fn exclusive_by_other(&self, owner: u64) -> bool {
        self.exclusive.is_some_and(|h| h.owner != owner)
    }

    fn shared_by_other(&self, owner: u64) -> bool {
        self.shared.keys().any(|&o| o != owner)
    }

    fn partition_by_other(&self, owner: u64, page: usize) -> bool {
        self.partitions
            .get(&page)
            .is_some_and(|h| h.owner != owner)
    }

    fn any_partition_by_other(&self, owner: u64) -> bool {
        self.partitions.values().any(|h| h.owner != owner)
    }

    /// Takes (or nests) the whole-store lock. Returns false if another
    /// owner holds any conflicting lock.
    pub fn try_exclusive(&mut self, owner: u64) -> bool {
        if let Some(holder) = self.exclusive.as_mut() {
            if holder.owner == owner {
                holder.depth += 1;
                return true;
            }
            return false;
        }
        if self.shared_by_other(owner) || self.any_partition_by_other(owner) {
            return false;
        }
        self.exclusive = Some(Holder { owner, depth: 1 });
        true
    }

    /// Takes (or nests) a shared lock.
    pub fn try_shared(&mut self, owner: u64) -> bool {
        if self.exclusive_by_other(owner) {
            return false;
        }
        *self.shared.entry(owner).or_insert(0) += 1;
        true
    }

    /// Takes (or nests) the lock on one page.
    pub fn try_partition(&mut self, owner: u64, page: usize) -> bool {
        if self.exclusive_by_other(owner) || self.partition_by_other(owner, page) {
            return false;
        }
        self.partitions
            .entry(page)
            .and_modify(|h| h.depth += 1)
            .or_insert(Holder { owner, depth: 1 });
        true
    }

    pub fn release_exclusive(&mut self, owner: u64) -> EngineResult<()> {
        match self.exclusive.as_mut() {
            Some(holder) if holder.owner == owner => {
                holder.depth -= 1;
                if holder.depth == 0 {
                    self.exclusive = None;
                }
                Ok(())
            }
            _ => Err(EngineError::NotLockOwner {
                token: owner,
                kind: "exclusive",
            }),
        }
    }

    pub fn release_shared(&mut self, owner: u64) -> EngineResult<()> {
        let Some(depth) = self.shared.get_mut(&owner) else {
            return Err(EngineError::NotLockOwner {
                token: owner,
                kind: "shared",
            });
        };
        *depth -= 1;
        if *depth == 0 {
            self.shared.remove(&owner);
        }
        Ok(())
    }

    pub fn release_partition(&mut self, owner: u64, page: usize) -> EngineResult<()> {
        match self.partitions.get_mut(&page) {
            Some(holder) if holder.owner == owner => {
                holder.depth -= 1;
                if holder.depth == 0 {
                    self.partitions.remove(&page);
                }
                Ok(())
            }
            _ => Err(EngineError::NotLockOwner {
                token: owner,
                kind: "partition",
            }),
        }
    }

    /// Drops every lock `owner` holds, whatever its depth.
    pub fn release_all(&mut self, owner: u64) {
        if self.exclusive.is_some_and(|h| h.owner == owner) {
            self.exclusive = None;
        }
        self.shared.remove(&owner);
        self.partitions.retain(|_, h| h.owner != owner);
    }

    pub fn is_locked(&self) -> bool {
        self.exclusive.is_some() || !self.shared.is_empty() || !self.partitions.is_empty()
    }

    pub fn is_owned(&self, owner: u64) -> bool {
        self.exclusive.is_some_and(|h| h.owner == owner)
            || self.shared.contains_key(&owner)
            || self.partitions.values().any(|h| h.owner == owner)
    }

    /// True if a read by `owner` touching `page` must wait.
    pub fn read_blocked(&self, owner: u64, page: Option<usize>) -> bool {
        self.exclusive_by_other(owner)
            || page.is_some_and(|p| self.partition_by_other(owner, p))
    }

    /// True if a write by `owner` touching `page` must wait.
    pub fn write_blocked(&self, owner: u64, page: Option<usize>) -> bool {
        self.read_blocked(owner, page) || self.shared_by_other(owner)
    }

    /// True if any owner other than `owner` holds any lock.
    pub fn held_by_other(&self, owner: u64) -> bool {
        self.exclusive_by_other(owner)
            || self.shared_by_other(owner)
            || self.any_partition_by_other(owner)
    }
}
