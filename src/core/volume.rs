//! Mounted volume sessions
//!
//! A [`Volume`] is the only way to mutate a formatted store. Opening takes
//! the backing store's advisory lock, checks the root block and sets its
//! persisted lock flag; closing (or dropping) reverses both.

use crate::core::allocator::ScanAllocator;
use crate::core::catalog::{
    DataBlock, DirEntry, DirectoryBlock, EntryName, NodeKind, NodeMetadata, Superblock,
    SB_EXTENT_COUNT,
};
use crate::core::config::VolumeOptions;
use crate::core::error::{BvfsError, Result};
use crate::core::header::{RootBlock, LOCKED, ROOT_BLOCK_INDEX, ROOT_DIRECTORY_INDEX, UNLOCKED};
use crate::core::io::{BackingStore, BlockStore, FileBacking};
use crate::core::page::{is_free_tag, Block, BlockContent, BlockType};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// Root block plus root directory
const MIN_BLOCKS: u64 = ROOT_DIRECTORY_INDEX + 1;

/// Block usage summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VolumeStats {
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub used_blocks: u64,
    pub root_blocks: u64,
    pub directory_blocks: u64,
    pub node_metadata_blocks: u64,
    pub superblocks: u64,
    pub data_blocks: u64,
    /// Nonzero tags this version does not recognize
    pub unrecognized_blocks: u64,
}

impl VolumeStats {
    /// Count blocks by tag byte
    pub fn collect<B: BackingStore>(store: &mut BlockStore<B>) -> Result<Self> {
        let mut stats = VolumeStats {
            total_blocks: store.block_count(),
            ..Default::default()
        };

        for index in 0..stats.total_blocks {
            let tag = store.read_tag(index)?;
            match BlockType::from_u8(tag) {
                BlockType::Unknown if is_free_tag(tag) => stats.free_blocks += 1,
                BlockType::Unknown => stats.unrecognized_blocks += 1,
                BlockType::Data => stats.data_blocks += 1,
                BlockType::Superblock => stats.superblocks += 1,
                BlockType::NodeMetadata => stats.node_metadata_blocks += 1,
                BlockType::Directory => stats.directory_blocks += 1,
                BlockType::Root => stats.root_blocks += 1,
            }
        }

        stats.used_blocks = stats.total_blocks - stats.free_blocks;
        Ok(stats)
    }
}

enum SessionState<B: BackingStore> {
    Open(Session<B>),
    Closed,
}

/// An open bvfs volume
///
/// All operations are serialized through one internal mutex, so a volume can
/// be shared between threads. Every operation fails with
/// [`BvfsError::NotOpen`] once [`Volume::close`] has run.
pub struct Volume<B: BackingStore = FileBacking> {
    state: Mutex<SessionState<B>>,
    options: VolumeOptions,
    location: String,
}

impl Volume<FileBacking> {
    /// Write an empty volume to `path`
    ///
    /// A file that already holds data is only replaced when `overwrite` is set.
    pub fn format<P: AsRef<Path>>(path: P, overwrite: bool) -> Result<()> {
        Self::format_store(FileBacking::create(path)?, overwrite)
    }

    /// Format a new volume and open it
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::create_with(path, VolumeOptions::default())
    }

    pub fn create_with<P: AsRef<Path>>(path: P, options: VolumeOptions) -> Result<Self> {
        Self::format(path.as_ref(), options.overwrite)?;
        Self::open_with(path, options)
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, VolumeOptions::default())
    }

    pub fn open_with<P: AsRef<Path>>(path: P, options: VolumeOptions) -> Result<Self> {
        Self::open_store(FileBacking::open(path)?, options)
    }

    /// Clear the lock flag left behind by a session that never closed
    pub fn force_unlock<P: AsRef<Path>>(path: P) -> Result<bool> {
        Self::force_unlock_store(FileBacking::open(path)?)
    }
}

impl<B: BackingStore> Volume<B> {
    /// Write the root block and an empty root directory
    pub fn format_store(mut backing: B, overwrite: bool) -> Result<()> {
        let location = backing.describe();
        if !backing.try_lock_exclusive()? {
            return Err(BvfsError::Locked);
        }

        let existing = backing.len()?;
        if existing > 0 {
            if !overwrite {
                return Err(BvfsError::AlreadyExists(existing));
            }
            warn!("Overwriting {} bytes at {}", existing, location);
            backing.set_len(0)?;
        }

        let mut store = BlockStore::new(backing)?;
        store.write_block(
            ROOT_BLOCK_INDEX,
            &Block::root(RootBlock::new(ROOT_DIRECTORY_INDEX)),
        )?;
        store.write_block(ROOT_DIRECTORY_INDEX, &Block::directory(DirectoryBlock::new(0)))?;
        store.sync()?;
        store.backing_mut().unlock()?;

        info!("Formatted volume at {}", location);
        Ok(())
    }

    /// Mount a formatted store
    ///
    /// Fails with [`BvfsError::Locked`] when another session holds the
    /// advisory lock or the persisted lock flag is set.
    pub fn open_store(mut backing: B, options: VolumeOptions) -> Result<Self> {
        let location = backing.describe();
        if !backing.try_lock_exclusive()? {
            debug!("Advisory lock on {} is held elsewhere", location);
            return Err(BvfsError::Locked);
        }

        let mut store = BlockStore::new(backing)?;
        store.set_sync_writes(options.sync_writes);

        let root = read_root(&mut store)?;
        if root.is_locked() {
            warn!("Volume {} is marked as mounted", location);
            return Err(BvfsError::Locked);
        }
        let root = write_lock_flag(&mut store, LOCKED)?;

        let mut allocator = ScanAllocator::new(options.reuse_policy);
        allocator.reserve(root.root_directory);

        info!(
            "Opened volume {} ({} blocks, root directory {})",
            location,
            store.block_count(),
            root.root_directory
        );

        Ok(Volume {
            state: Mutex::new(SessionState::Open(Session {
                store,
                allocator,
                root_directory: root.root_directory,
            })),
            options,
            location,
        })
    }

    /// Reset the persisted lock flag without mounting
    ///
    /// Returns whether the flag was set. Fails with [`BvfsError::Locked`]
    /// while a live session holds the advisory lock.
    pub fn force_unlock_store(mut backing: B) -> Result<bool> {
        let location = backing.describe();
        if !backing.try_lock_exclusive()? {
            return Err(BvfsError::Locked);
        }

        let mut store = BlockStore::new(backing)?;
        if !read_root(&mut store)?.is_locked() {
            return Ok(false);
        }

        write_lock_flag(&mut store, UNLOCKED)?;
        store.backing_mut().unlock()?;
        warn!("Cleared stale lock flag on {}", location);
        Ok(true)
    }

    /// Persist the unlocked flag and release the store
    pub fn close(&self) -> Result<()> {
        let state = std::mem::replace(&mut *self.state.lock(), SessionState::Closed);
        match state {
            SessionState::Open(session) => {
                session.shutdown()?;
                info!("Closed volume {}", self.location);
                Ok(())
            }
            SessionState::Closed => Err(BvfsError::NotOpen),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.state.lock(), SessionState::Open(_))
    }

    pub fn options(&self) -> &VolumeOptions {
        &self.options
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    fn with_session<T>(&self, f: impl FnOnce(&mut Session<B>) -> Result<T>) -> Result<T> {
        match &mut *self.state.lock() {
            SessionState::Open(session) => f(session),
            SessionState::Closed => Err(BvfsError::NotOpen),
        }
    }

    // Block level

    /// Hand out a free block index
    ///
    /// The index stays reserved for this session until it is written or
    /// released.
    pub fn allocate(&self) -> Result<u64> {
        self.with_session(|s| s.allocate())
    }

    /// Mark a block free by rewriting its tag byte
    pub fn deallocate(&self, index: u64) -> Result<()> {
        self.with_session(|s| s.release(index))
    }

    pub fn read_block(&self, index: u64) -> Result<Block> {
        self.with_session(|s| s.store.read_block(index))
    }

    pub fn write_block(&self, index: u64, block: &Block) -> Result<()> {
        self.with_session(|s| s.write(index, block))
    }

    pub fn block_count(&self) -> Result<u64> {
        self.with_session(|s| Ok(s.store.block_count()))
    }

    pub fn root_directory(&self) -> Result<u64> {
        self.with_session(|s| Ok(s.root_directory))
    }

    pub fn sync(&self) -> Result<()> {
        self.with_session(|s| s.store.sync())
    }

    // Nodes and directories

    /// Allocate and write a metadata block
    pub fn create_node(&self, kind: NodeKind, perms: u16, gid: u32, uid: u32) -> Result<u64> {
        self.with_session(|s| s.create_node(NodeMetadata::new(kind, perms, gid, uid)))
    }

    pub fn node_metadata(&self, index: u64) -> Result<NodeMetadata> {
        self.with_session(|s| s.metadata(index))
    }

    /// Overwrite an existing metadata block
    pub fn set_node_metadata(&self, index: u64, metadata: NodeMetadata) -> Result<()> {
        self.with_session(|s| {
            s.metadata(index)?;
            s.write(index, &Block::node_metadata(metadata))
        })
    }

    pub fn read_directory(&self, index: u64) -> Result<DirectoryBlock> {
        self.with_session(|s| s.directory(index))
    }

    /// Occupied entries of a directory in slot order
    pub fn list(&self, dir: u64) -> Result<Vec<DirEntry>> {
        self.with_session(|s| Ok(s.directory(dir)?.occupied().map(|(_, e)| *e).collect()))
    }

    pub fn lookup(&self, dir: u64, name: &str) -> Result<Option<DirEntry>> {
        self.with_session(|s| Ok(s.directory(dir)?.find(name).map(|(_, e)| *e)))
    }

    pub fn parent_of(&self, dir: u64) -> Result<u64> {
        self.with_session(|s| Ok(s.directory(dir)?.parent))
    }

    /// Add an entry to the first empty slot and return the slot number
    pub fn link(&self, dir: u64, name: &str, metadata: u64, content: u64) -> Result<usize> {
        self.with_session(|s| s.link(dir, name, metadata, content))
    }

    /// Clear the entry called `name` and return what it pointed at
    ///
    /// The referenced blocks are left allocated.
    pub fn unlink(&self, dir: u64, name: &str) -> Result<DirEntry> {
        self.with_session(|s| s.unlink(dir, name))
    }

    /// Create an empty subdirectory and return its directory block
    pub fn mkdir(&self, parent: u64, name: &str, perms: u16) -> Result<u64> {
        self.with_session(|s| s.mkdir(parent, name, perms))
    }

    /// Create an empty file
    pub fn create_file(&self, dir: u64, name: &str, perms: u16) -> Result<DirEntry> {
        self.with_session(|s| s.create_file(dir, name, perms))
    }

    /// Replace the content of a file
    pub fn write_file(&self, dir: u64, name: &str, content: &[u8]) -> Result<()> {
        self.with_session(|s| s.write_file(dir, name, content))
    }

    pub fn read_file(&self, dir: u64, name: &str) -> Result<Vec<u8>> {
        self.with_session(|s| s.read_file(dir, name))
    }

    /// Remove a file or an empty directory and release its blocks
    pub fn remove(&self, dir: u64, name: &str) -> Result<()> {
        self.with_session(|s| s.remove(dir, name))
    }

    // Maintenance

    /// Cut trailing free blocks off the store and return how many were removed
    pub fn trim(&self) -> Result<u64> {
        let removed = self.with_session(|s| s.trim())?;
        if removed > 0 {
            info!("Trimmed {} free blocks from {}", removed, self.location);
        }
        Ok(removed)
    }

    pub fn stats(&self) -> Result<VolumeStats> {
        self.with_session(|s| VolumeStats::collect(&mut s.store))
    }
}

impl<B: BackingStore> Drop for Volume<B> {
    fn drop(&mut self) {
        let state = std::mem::replace(self.state.get_mut(), SessionState::Closed);
        if let SessionState::Open(session) = state {
            if let Err(e) = session.shutdown() {
                warn!("Failed to close volume {} cleanly: {}", self.location, e);
            }
        }
    }
}

struct Session<B: BackingStore> {
    store: BlockStore<B>,
    allocator: ScanAllocator,
    root_directory: u64,
}

impl<B: BackingStore> Session<B> {
    fn shutdown(mut self) -> Result<()> {
        write_lock_flag(&mut self.store, UNLOCKED)?;
        self.store.backing_mut().unlock()
    }

    fn allocate(&mut self) -> Result<u64> {
        self.allocator.allocate(&mut self.store)
    }

    fn release(&mut self, index: u64) -> Result<()> {
        self.allocator.deallocate(&mut self.store, index)
    }

    fn write(&mut self, index: u64, block: &Block) -> Result<()> {
        self.store.write_block(index, block)?;
        self.allocator.mark_written(index);
        Ok(())
    }

    fn metadata(&mut self, index: u64) -> Result<NodeMetadata> {
        self.store.read_block(index)?.into_node_metadata(index)
    }

    fn directory(&mut self, index: u64) -> Result<DirectoryBlock> {
        self.store.read_block(index)?.into_directory(index)
    }

    fn superblock(&mut self, index: u64) -> Result<Superblock> {
        self.store.read_block(index)?.into_superblock(index)
    }

    fn create_node(&mut self, metadata: NodeMetadata) -> Result<u64> {
        let index = self.allocate()?;
        self.write(index, &Block::node_metadata(metadata))?;
        debug!("Created {:?} node at block {}", metadata.kind, index);
        Ok(index)
    }

    /// Check that `name` could be linked into `dir` before allocating
    fn check_linkable(&mut self, dir: u64, name: &str) -> Result<()> {
        EntryName::new(name)?;
        let block = self.directory(dir)?;
        if block.find(name).is_some() {
            return Err(BvfsError::EntryExists(name.to_string()));
        }
        if block.first_free_slot().is_none() {
            return Err(BvfsError::DirectoryFull(dir));
        }
        Ok(())
    }

    fn link(&mut self, dir: u64, name: &str, metadata: u64, content: u64) -> Result<usize> {
        let entry_name = EntryName::new(name)?;
        // a zero metadata pointer marks an empty slot
        if metadata == 0 {
            return Err(BvfsError::InvalidBlockIndex(metadata));
        }
        self.metadata(metadata)?;

        let mut block = self.directory(dir)?;
        if block.find(name).is_some() {
            return Err(BvfsError::EntryExists(name.to_string()));
        }
        let slot = block
            .first_free_slot()
            .ok_or(BvfsError::DirectoryFull(dir))?;

        block.entries[slot] = DirEntry::new(metadata, content, entry_name);
        self.write(dir, &Block::directory(block))?;
        debug!("Linked {:?} into directory {} slot {}", name, dir, slot);
        Ok(slot)
    }

    fn unlink(&mut self, dir: u64, name: &str) -> Result<DirEntry> {
        let mut block = self.directory(dir)?;
        let (slot, entry) = block
            .find(name)
            .map(|(slot, entry)| (slot, *entry))
            .ok_or_else(|| BvfsError::NotFound(name.to_string()))?;

        block.entries[slot] = DirEntry::empty();
        self.write(dir, &Block::directory(block))?;
        debug!("Unlinked {:?} from directory {}", name, dir);
        Ok(entry)
    }

    fn mkdir(&mut self, parent: u64, name: &str, perms: u16) -> Result<u64> {
        self.check_linkable(parent, name)?;

        let metadata = self.create_node(NodeMetadata::directory(perms))?;
        let dir = self.allocate()?;
        self.write(dir, &Block::directory(DirectoryBlock::new(parent)))?;
        self.link(parent, name, metadata, dir)?;
        Ok(dir)
    }

    fn create_file(&mut self, dir: u64, name: &str, perms: u16) -> Result<DirEntry> {
        self.check_linkable(dir, name)?;

        let metadata = self.create_node(NodeMetadata::file(perms))?;
        let head = self.allocate()?;
        self.write(head, &Block::superblock(Superblock::new(0, 0)))?;
        let slot = self.link(dir, name, metadata, head)?;
        Ok(self.directory(dir)?.entries[slot])
    }

    fn file_entry(&mut self, dir: u64, name: &str) -> Result<(DirEntry, NodeMetadata)> {
        let entry = self
            .directory(dir)?
            .find(name)
            .map(|(_, entry)| *entry)
            .ok_or_else(|| BvfsError::NotFound(name.to_string()))?;
        let metadata = self.metadata(entry.metadata)?;
        if !metadata.is_file() {
            return Err(BvfsError::NotAFile(name.to_string()));
        }
        Ok((entry, metadata))
    }

    /// Superblocks of a stream in chain order
    fn chain(&mut self, head: u64) -> Result<Vec<(u64, Superblock)>> {
        let mut chain = Vec::new();
        let mut seen = BTreeSet::new();
        let mut index = head;

        loop {
            if !seen.insert(index) {
                return Err(BvfsError::CorruptChain(index));
            }
            let sb = self.superblock(index)?;
            let next = sb.next;
            chain.push((index, sb));
            if next == 0 {
                return Ok(chain);
            }
            index = next;
        }
    }

    /// Every block a stream owns, data blocks first, then its superblocks
    ///
    /// Each block is checked to be a releasable block of the expected type,
    /// so a caller can release the whole list without failing halfway.
    fn stream_blocks(&mut self, head: u64) -> Result<Vec<u64>> {
        let mut data = Vec::new();
        let mut superblocks = Vec::new();

        for (index, sb) in self.chain(head)? {
            self.allocator.check_releasable(&self.store, index)?;
            for extent in sb.used_extents() {
                self.allocator.check_releasable(&self.store, extent)?;
                self.store.read_block(extent)?.into_data(extent)?;
                data.push(extent);
            }
            superblocks.push(index);
        }

        data.extend(superblocks);
        Ok(data)
    }

    fn write_file(&mut self, dir: u64, name: &str, content: &[u8]) -> Result<()> {
        let (entry, mut metadata) = self.file_entry(dir, name)?;
        let head = entry.content;
        for index in self.stream_blocks(head)? {
            if index != head {
                self.release(index)?;
            }
        }

        let mut index = head;
        let mut sb = Superblock::new(0, 0);
        let mut slot = 0;

        for chunk in content.chunks(DataBlock::CAPACITY) {
            if slot == SB_EXTENT_COUNT {
                let next = self.allocate()?;
                sb.next = next;
                self.write(index, &Block::superblock(sb))?;
                sb = Superblock::new(index, 0);
                index = next;
                slot = 0;
            }

            let data = self.allocate()?;
            self.write(data, &Block::data(DataBlock::from_slice(chunk)?))?;
            sb.extents[slot] = data;
            slot += 1;
        }
        self.write(index, &Block::superblock(sb))?;

        metadata.size = content.len() as u64;
        self.write(entry.metadata, &Block::node_metadata(metadata))?;
        debug!("Wrote {} bytes to {:?}", content.len(), name);
        Ok(())
    }

    fn read_file(&mut self, dir: u64, name: &str) -> Result<Vec<u8>> {
        let (entry, metadata) = self.file_entry(dir, name)?;

        let chain = self.chain(entry.content)?;

        // the recorded size is only a hint, never trusted beyond what the chain can hold
        let stored = chain
            .iter()
            .map(|(_, sb)| sb.extent_count())
            .sum::<usize>()
            .saturating_mul(DataBlock::CAPACITY);
        let hint = usize::try_from(metadata.size).unwrap_or(usize::MAX).min(stored);

        let mut content = Vec::with_capacity(hint);
        for (_, sb) in chain {
            for extent in sb.used_extents() {
                let data = self.store.read_block(extent)?.into_data(extent)?;
                content.extend_from_slice(data.content());
            }
        }
        Ok(content)
    }

    fn remove(&mut self, dir: u64, name: &str) -> Result<()> {
        let entry = self
            .directory(dir)?
            .find(name)
            .map(|(_, entry)| *entry)
            .ok_or_else(|| BvfsError::NotFound(name.to_string()))?;
        let metadata = self.metadata(entry.metadata)?;
        self.allocator.check_releasable(&self.store, entry.metadata)?;

        // nothing is unlinked until every owned block is known to be releasable
        let owned = match metadata.kind {
            NodeKind::Directory => {
                if !self.directory(entry.content)?.is_empty() {
                    return Err(BvfsError::DirectoryNotEmpty(name.to_string()));
                }
                self.allocator.check_releasable(&self.store, entry.content)?;
                vec![entry.content]
            }
            NodeKind::File => self.stream_blocks(entry.content)?,
        };

        self.unlink(dir, name)?;
        for index in owned {
            self.release(index)?;
        }
        self.release(entry.metadata)
    }

    fn trim(&mut self) -> Result<u64> {
        let count = self.store.block_count();
        let mut keep = count;

        while keep > MIN_BLOCKS {
            let last = keep - 1;
            if self.allocator.is_pending(last) || !is_free_tag(self.store.read_tag(last)?) {
                break;
            }
            keep = last;
        }

        if keep < count {
            self.store.truncate_blocks(keep)?;
            self.allocator.clamp(keep);
            self.store.sync()?;
        }
        Ok(count - keep)
    }
}

fn read_root<B: BackingStore>(store: &mut BlockStore<B>) -> Result<RootBlock> {
    let root = store
        .read_block(ROOT_BLOCK_INDEX)?
        .into_root(ROOT_BLOCK_INDEX)?;
    root.validate()?;
    Ok(root)
}

/// Rewrite the lock flag in place, keeping the reserved header bytes
fn write_lock_flag<B: BackingStore>(store: &mut BlockStore<B>, value: u8) -> Result<RootBlock> {
    let mut block = store.read_block(ROOT_BLOCK_INDEX)?;
    let mut root = block.clone().into_root(ROOT_BLOCK_INDEX)?;
    root.locked = value;
    block.content = BlockContent::Root(root);

    store.write_block(ROOT_BLOCK_INDEX, &block)?;
    store.sync()?;
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::allocator::ReusePolicy;
    use crate::core::header::{BLOCK_HEADER_SIZE, BLOCK_SIZE};
    use crate::core::io::MemoryBacking;

    /// Byte offset of the lock flag inside the store
    const LOCK_FLAG_OFFSET: usize = BLOCK_HEADER_SIZE + 14;

    fn formatted() -> MemoryBacking {
        let backing = MemoryBacking::new();
        Volume::format_store(backing.handle(), false).unwrap();
        backing
    }

    fn open(backing: &MemoryBacking) -> Volume<MemoryBacking> {
        Volume::open_store(backing.handle(), VolumeOptions::default()).unwrap()
    }

    fn open_with_policy(backing: &MemoryBacking, policy: ReusePolicy) -> Volume<MemoryBacking> {
        let options = VolumeOptions {
            reuse_policy: policy,
            ..Default::default()
        };
        Volume::open_store(backing.handle(), options).unwrap()
    }

    #[test]
    fn test_format_then_open() {
        let backing = formatted();
        assert_eq!(backing.snapshot().len(), 2048);

        let volume = open(&backing);
        assert_eq!(volume.root_directory().unwrap(), 1);
        assert_eq!(volume.block_count().unwrap(), 2);
        assert_eq!(volume.parent_of(1).unwrap(), 0);
        assert!(volume.list(1).unwrap().is_empty());
    }

    #[test]
    fn test_lock_flag_follows_session() {
        let backing = formatted();
        assert_eq!(backing.snapshot()[LOCK_FLAG_OFFSET], 0);

        let volume = open(&backing);
        assert_eq!(backing.snapshot()[LOCK_FLAG_OFFSET], LOCKED);

        volume.close().unwrap();
        assert_eq!(backing.snapshot()[LOCK_FLAG_OFFSET], 0);
    }

    #[test]
    fn test_second_open_is_locked() {
        let backing = formatted();
        let first = open(&backing);

        let second = Volume::open_store(backing.handle(), VolumeOptions::default());
        assert!(matches!(second, Err(BvfsError::Locked)));

        first.close().unwrap();
        let third = open(&backing);
        assert!(third.is_open());
    }

    #[test]
    fn test_persisted_flag_blocks_open() {
        let backing = formatted();
        let mut bytes = backing.snapshot();
        bytes[LOCK_FLAG_OFFSET] = 1;
        let stale = MemoryBacking::from_bytes(bytes);

        let result = Volume::open_store(stale.handle(), VolumeOptions::default());
        assert!(matches!(result, Err(BvfsError::Locked)));

        assert!(Volume::force_unlock_store(stale.handle()).unwrap());
        assert!(!Volume::force_unlock_store(stale.handle()).unwrap());
        assert!(Volume::open_store(stale.handle(), VolumeOptions::default()).is_ok());
    }

    #[test]
    fn test_force_unlock_refused_while_mounted() {
        let backing = formatted();
        let _volume = open(&backing);
        assert!(matches!(
            Volume::force_unlock_store(backing.handle()),
            Err(BvfsError::Locked)
        ));
    }

    #[test]
    fn test_operations_after_close() {
        let backing = formatted();
        let volume = open(&backing);
        volume.close().unwrap();

        assert!(!volume.is_open());
        assert!(matches!(volume.allocate(), Err(BvfsError::NotOpen)));
        assert!(matches!(volume.read_block(0), Err(BvfsError::NotOpen)));
        assert!(matches!(volume.block_count(), Err(BvfsError::NotOpen)));
        assert!(matches!(volume.close(), Err(BvfsError::NotOpen)));
    }

    #[test]
    fn test_drop_closes() {
        let backing = formatted();
        {
            let _volume = open(&backing);
            assert_eq!(backing.snapshot()[LOCK_FLAG_OFFSET], LOCKED);
        }
        assert_eq!(backing.snapshot()[LOCK_FLAG_OFFSET], 0);
        assert!(Volume::open_store(backing.handle(), VolumeOptions::default()).is_ok());
    }

    #[test]
    fn test_format_refuses_existing_data() {
        let backing = formatted();
        assert!(matches!(
            Volume::format_store(backing.handle(), false),
            Err(BvfsError::AlreadyExists(2048))
        ));
        Volume::format_store(backing.handle(), true).unwrap();
    }

    #[test]
    fn test_format_refused_while_mounted() {
        let backing = formatted();
        let _volume = open(&backing);
        assert!(matches!(
            Volume::format_store(backing.handle(), true),
            Err(BvfsError::Locked)
        ));
    }

    #[test]
    fn test_reserved_header_bytes_survive_open_close() {
        let backing = formatted();
        let mut bytes = backing.snapshot();
        bytes[1..BLOCK_HEADER_SIZE].fill(0xAB);
        let tagged = MemoryBacking::from_bytes(bytes);

        open(&tagged).close().unwrap();
        assert!(tagged.snapshot()[1..BLOCK_HEADER_SIZE].iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_allocation_reuse_rewind() {
        let backing = formatted();
        let volume = open_with_policy(&backing, ReusePolicy::Rewind);

        assert_eq!(volume.allocate().unwrap(), 2);
        assert_eq!(volume.allocate().unwrap(), 3);
        assert_eq!(volume.block_count().unwrap(), 4);

        volume.deallocate(2).unwrap();
        assert_eq!(volume.allocate().unwrap(), 2);
    }

    #[test]
    fn test_allocation_reuse_forward_only() {
        let backing = formatted();
        let volume = open_with_policy(&backing, ReusePolicy::ForwardOnly);

        assert_eq!(volume.allocate().unwrap(), 2);
        assert_eq!(volume.allocate().unwrap(), 3);
        volume.deallocate(2).unwrap();
        assert_eq!(volume.allocate().unwrap(), 4);
    }

    #[test]
    fn test_root_directory_is_reserved() {
        let backing = formatted();
        let volume = open(&backing);
        assert!(matches!(volume.deallocate(1), Err(BvfsError::ReservedBlock(1))));
        assert!(matches!(volume.deallocate(0), Err(BvfsError::ReservedBlock(0))));
        assert!(matches!(
            volume.deallocate(9),
            Err(BvfsError::InvalidBlockIndex(9))
        ));
    }

    #[test]
    fn test_mkdir_and_list() {
        let backing = formatted();
        let volume = open(&backing);

        let docs = volume.mkdir(1, "docs", 0o755).unwrap();
        let notes = volume.mkdir(docs, "notes", 0o700).unwrap();

        let root_entries = volume.list(1).unwrap();
        assert_eq!(root_entries.len(), 1);
        assert!(root_entries[0].name.matches("docs"));
        assert_eq!(root_entries[0].content, docs);

        assert_eq!(volume.parent_of(docs).unwrap(), 1);
        assert_eq!(volume.parent_of(notes).unwrap(), docs);

        let entry = volume.lookup(docs, "notes").unwrap().unwrap();
        let meta = volume.node_metadata(entry.metadata).unwrap();
        assert!(meta.is_directory());
        assert_eq!(meta.perms, 0o700);
        assert!(volume.lookup(docs, "missing").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_and_full_directory() {
        let backing = formatted();
        let volume = open(&backing);

        volume.mkdir(1, "a", 0o755).unwrap();
        assert!(matches!(
            volume.mkdir(1, "a", 0o755),
            Err(BvfsError::EntryExists(_))
        ));

        for i in 1..8 {
            volume.create_file(1, &format!("f{}", i), 0o644).unwrap();
        }
        let before = volume.block_count().unwrap();
        assert!(matches!(
            volume.create_file(1, "overflow", 0o644),
            Err(BvfsError::DirectoryFull(1))
        ));
        assert_eq!(volume.block_count().unwrap(), before);
    }

    #[test]
    fn test_link_and_unlink() {
        let backing = formatted();
        let volume = open(&backing);

        let node = volume.create_node(NodeKind::File, 0o600, 10, 20).unwrap();
        let slot = volume.link(1, "raw", node, 0).unwrap();
        assert_eq!(slot, 0);

        let entry = volume.unlink(1, "raw").unwrap();
        assert_eq!(entry.metadata, node);
        assert!(volume.list(1).unwrap().is_empty());
        assert!(matches!(volume.unlink(1, "raw"), Err(BvfsError::NotFound(_))));

        let meta = volume.node_metadata(node).unwrap();
        assert_eq!((meta.gid, meta.uid), (10, 20));
    }

    #[test]
    fn test_write_block_at_overflowing_index() {
        let backing = formatted();
        let volume = open(&backing);
        let block = Block::data(DataBlock::from_slice(b"far away").unwrap());

        assert!(matches!(
            volume.write_block(u64::MAX, &block),
            Err(BvfsError::InvalidBlockIndex(u64::MAX))
        ));
        assert_eq!(volume.block_count().unwrap(), 2);
        assert_eq!(backing.snapshot().len(), 2 * BLOCK_SIZE);
    }

    #[test]
    fn test_link_requires_metadata_block() {
        let backing = formatted();
        let volume = open(&backing);

        assert!(matches!(
            volume.link(1, "ghost", 0, 0),
            Err(BvfsError::InvalidBlockIndex(0))
        ));
        assert!(matches!(
            volume.link(1, "ghost", 1, 0),
            Err(BvfsError::UnexpectedBlockType { index: 1, .. })
        ));
        assert!(volume.list(1).unwrap().is_empty());
    }

    #[test]
    fn test_set_node_metadata_requires_metadata_block() {
        let backing = formatted();
        let volume = open(&backing);

        let node = volume.create_node(NodeKind::File, 0o600, 0, 0).unwrap();
        let mut meta = volume.node_metadata(node).unwrap();
        meta.perms = 0o640;
        volume.set_node_metadata(node, meta).unwrap();
        assert_eq!(volume.node_metadata(node).unwrap().perms, 0o640);

        assert!(matches!(
            volume.set_node_metadata(1, meta),
            Err(BvfsError::UnexpectedBlockType { index: 1, .. })
        ));
    }

    #[test]
    fn test_write_and_read_small_file() {
        let backing = formatted();
        let volume = open(&backing);

        volume.create_file(1, "hello.txt", 0o644).unwrap();
        assert!(volume.read_file(1, "hello.txt").unwrap().is_empty());

        volume.write_file(1, "hello.txt", b"hello world").unwrap();
        assert_eq!(volume.read_file(1, "hello.txt").unwrap(), b"hello world");

        let entry = volume.lookup(1, "hello.txt").unwrap().unwrap();
        assert_eq!(volume.node_metadata(entry.metadata).unwrap().size, 11);
    }

    #[test]
    fn test_file_spanning_two_superblocks() {
        let backing = formatted();
        let volume = open(&backing);

        let entry = volume.create_file(1, "big.bin", 0o644).unwrap();
        let content: Vec<u8> = (0..SB_EXTENT_COUNT * DataBlock::CAPACITY + 1)
            .map(|i| (i % 251) as u8)
            .collect();
        volume.write_file(1, "big.bin", &content).unwrap();

        assert_eq!(volume.read_file(1, "big.bin").unwrap(), content);

        let head = volume
            .read_block(entry.content)
            .unwrap()
            .into_superblock(entry.content)
            .unwrap();
        assert_eq!(head.extent_count(), SB_EXTENT_COUNT);
        assert_ne!(head.next, 0);

        let second = volume
            .read_block(head.next)
            .unwrap()
            .into_superblock(head.next)
            .unwrap();
        assert_eq!(second.prev, entry.content);
        assert_eq!(second.next, 0);
        assert_eq!(second.extent_count(), 1);
    }

    #[test]
    fn test_rewrite_releases_old_blocks() {
        let backing = formatted();
        let volume = open(&backing);

        volume.create_file(1, "f", 0o644).unwrap();
        volume.write_file(1, "f", &[b'a'; 2000]).unwrap();
        assert_eq!(volume.block_count().unwrap(), 7);

        volume.write_file(1, "f", b"b").unwrap();
        assert_eq!(volume.read_file(1, "f").unwrap(), b"b");

        let stats = volume.stats().unwrap();
        assert_eq!(stats.data_blocks, 1);
        assert_eq!(stats.free_blocks, 2);

        assert_eq!(volume.trim().unwrap(), 2);
        assert_eq!(volume.block_count().unwrap(), 5);
    }

    #[test]
    fn test_remove_file_and_directory() {
        let backing = formatted();
        let volume = open(&backing);

        let dir = volume.mkdir(1, "d", 0o755).unwrap();
        volume.create_file(dir, "f", 0o644).unwrap();
        volume.write_file(dir, "f", &[1u8; 3000]).unwrap();

        assert!(matches!(
            volume.remove(1, "d"),
            Err(BvfsError::DirectoryNotEmpty(_))
        ));

        volume.remove(dir, "f").unwrap();
        volume.remove(1, "d").unwrap();
        assert!(volume.list(1).unwrap().is_empty());

        let stats = volume.stats().unwrap();
        assert_eq!(stats.used_blocks, 2);
        assert_eq!(volume.trim().unwrap(), stats.free_blocks);
        assert_eq!(volume.block_count().unwrap(), 2);
    }

    #[test]
    fn test_file_operations_reject_directories() {
        let backing = formatted();
        let volume = open(&backing);
        volume.mkdir(1, "d", 0o755).unwrap();

        assert!(matches!(volume.read_file(1, "d"), Err(BvfsError::NotAFile(_))));
        assert!(matches!(
            volume.write_file(1, "d", b"x"),
            Err(BvfsError::NotAFile(_))
        ));
        assert!(matches!(volume.read_file(1, "nope"), Err(BvfsError::NotFound(_))));
    }

    #[test]
    fn test_chain_cycle_is_detected() {
        let backing = formatted();
        let volume = open(&backing);

        let entry = volume.create_file(1, "loop", 0o644).unwrap();
        let sb = Superblock::new(0, entry.content);
        volume.write_block(entry.content, &Block::superblock(sb)).unwrap();

        assert!(matches!(
            volume.read_file(1, "loop"),
            Err(BvfsError::CorruptChain(_))
        ));
    }

    #[test]
    fn test_trim_never_drops_reserved_blocks() {
        let backing = formatted();
        let volume = open(&backing);
        assert_eq!(volume.trim().unwrap(), 0);
        assert_eq!(volume.block_count().unwrap(), 2);
    }

    #[test]
    fn test_trim_keeps_pending_blocks() {
        let backing = formatted();
        let volume = open(&backing);
        let index = volume.allocate().unwrap();

        assert_eq!(volume.trim().unwrap(), 0);
        assert_eq!(volume.block_count().unwrap(), index + 1);
    }

    #[test]
    fn test_stats_counts() {
        let backing = formatted();
        let volume = open(&backing);
        volume.mkdir(1, "d", 0o755).unwrap();

        let stats = volume.stats().unwrap();
        assert_eq!(stats.total_blocks, 4);
        assert_eq!(stats.root_blocks, 1);
        assert_eq!(stats.directory_blocks, 2);
        assert_eq!(stats.node_metadata_blocks, 1);
        assert_eq!(stats.free_blocks, 0);
    }

    #[test]
    fn test_volume_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Volume<MemoryBacking>>();
        assert_send_sync::<Volume>();
    }
}
