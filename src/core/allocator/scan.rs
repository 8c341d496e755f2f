//! Tag-scanning allocator
//!
//! Walks tag bytes forward from a cursor. Indices handed out but not yet
//! written still read as free on disk, so they are tracked in a pending set
//! until the session writes them.

use super::ReusePolicy;
use crate::core::error::{BvfsError, Result};
use crate::core::header::ROOT_BLOCK_INDEX;
use crate::core::io::{BackingStore, BlockStore};
use crate::core::page::{is_free_tag, BlockType};
use std::collections::BTreeSet;

/// First index the allocator will ever consider
const FIRST_CANDIDATE: u64 = 1;

/// Cursor-based free block finder
#[derive(Debug, Clone)]
pub struct ScanAllocator {
    /// Next index to inspect
    cursor: u64,

    policy: ReusePolicy,

    /// Handed out but not yet written
    pending: BTreeSet<u64>,

    /// Blocks that may never be released besides the root block
    reserved: BTreeSet<u64>,
}

impl ScanAllocator {
    pub fn new(policy: ReusePolicy) -> Self {
        ScanAllocator {
            cursor: FIRST_CANDIDATE,
            policy,
            pending: BTreeSet::new(),
            reserved: BTreeSet::new(),
        }
    }

    /// Protect `index` from [`ScanAllocator::deallocate`]
    pub fn reserve(&mut self, index: u64) {
        self.reserved.insert(index);
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn policy(&self) -> ReusePolicy {
        self.policy
    }

    pub fn is_pending(&self, index: u64) -> bool {
        self.pending.contains(&index)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Find a free block, growing the store by one block if none is left
    pub fn allocate<B: BackingStore>(&mut self, store: &mut BlockStore<B>) -> Result<u64> {
        while self.cursor < store.block_count() {
            let index = self.cursor;
            self.cursor += 1;

            if self.pending.contains(&index) {
                continue;
            }
            if is_free_tag(store.read_tag(index)?) {
                self.pending.insert(index);
                tracing::debug!("Allocated free block {}", index);
                return Ok(index);
            }
        }

        let index = store.grow()?;
        self.cursor = index + 1;
        self.pending.insert(index);
        tracing::debug!("Grew store to {} blocks for allocation", index + 1);
        Ok(index)
    }

    /// Mark a block free by rewriting only its tag byte
    ///
    /// The payload is left in place. Releasing a block that is already free
    /// is logged and otherwise harmless.
    pub fn deallocate<B: BackingStore>(
        &mut self,
        store: &mut BlockStore<B>,
        index: u64,
    ) -> Result<()> {
        self.check_releasable(store, index)?;

        let tag = store.read_tag(index)?;
        if is_free_tag(tag) && !self.pending.contains(&index) {
            tracing::warn!("Double free detected for block {}", index);
        }

        store.write_tag(index, BlockType::Unknown as u8)?;
        self.pending.remove(&index);

        if self.policy == ReusePolicy::Rewind && index < self.cursor {
            self.cursor = index;
        }
        tracing::debug!("Released block {} (cursor {})", index, self.cursor);
        Ok(())
    }

    /// Fail the way [`ScanAllocator::deallocate`] would, without touching the store
    pub fn check_releasable<B: BackingStore>(
        &self,
        store: &BlockStore<B>,
        index: u64,
    ) -> Result<()> {
        if index >= store.block_count() {
            return Err(BvfsError::InvalidBlockIndex(index));
        }
        if index == ROOT_BLOCK_INDEX || self.reserved.contains(&index) {
            return Err(BvfsError::ReservedBlock(index));
        }
        Ok(())
    }

    /// Forget the pending mark once a block has been written
    pub fn mark_written(&mut self, index: u64) {
        self.pending.remove(&index);
    }

    /// Drop state beyond `block_count` after the store shrank
    pub fn clamp(&mut self, block_count: u64) {
        self.cursor = self.cursor.min(block_count).max(FIRST_CANDIDATE);
        self.pending.retain(|&index| index < block_count);
    }
}

impl Default for ScanAllocator {
    fn default() -> Self {
        Self::new(ReusePolicy::default())
    }
}
