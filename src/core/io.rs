//! Backing storage and block-indexed I/O

use crate::core::error::{BvfsError, Result};
use crate::core::header::BLOCK_SIZE;
use crate::core::lock;
use crate::core::page::Block;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Random-access byte container a volume lives in
///
/// Growth through [`BackingStore::set_len`] must zero-fill the new range.
pub trait BackingStore: Send {
    /// Current length in bytes
    fn len(&mut self) -> Result<u64>;

    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;

    fn write_all_at(&mut self, offset: u64, buf: &[u8]) -> Result<()>;

    fn set_len(&mut self, len: u64) -> Result<()>;

    /// Flush pending writes to stable storage
    fn sync(&mut self) -> Result<()>;

    /// Take an exclusive advisory lock without blocking
    ///
    /// Returns `false` when another holder already has it.
    fn try_lock_exclusive(&mut self) -> Result<bool> {
        Ok(true)
    }

    fn unlock(&mut self) -> Result<()> {
        Ok(())
    }

    /// Human-readable location for log messages
    fn describe(&self) -> String;
}

/// A host file used as backing storage
pub struct FileBacking {
    file: File,
    path: PathBuf,
    locked: bool,
}

impl FileBacking {
    /// Open an existing file for reading and writing
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        Ok(Self::from_file(file, path.as_ref()))
    }

    /// Open an existing file without write access
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(&path)?;
        Ok(Self::from_file(file, path.as_ref()))
    }

    /// Open a file for reading and writing, creating it when missing
    ///
    /// Existing content is left in place.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        Ok(Self::from_file(file, path.as_ref()))
    }

    fn from_file(file: File, path: &Path) -> Self {
        FileBacking {
            file,
            path: path.to_path_buf(),
            locked: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BackingStore for FileBacking {
    fn len(&mut self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_all_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    fn try_lock_exclusive(&mut self) -> Result<bool> {
        if self.locked {
            return Ok(true);
        }
        self.locked = lock::try_lock_exclusive(&self.file)?;
        Ok(self.locked)
    }

    fn unlock(&mut self) -> Result<()> {
        if self.locked {
            lock::unlock(&self.file)?;
            self.locked = false;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Shared in-memory backing storage
///
/// Handles created with [`MemoryBacking::handle`] refer to the same bytes and
/// the same lock, so two handles behave like two opens of one host file.
#[derive(Default)]
pub struct MemoryBacking {
    bytes: Arc<Mutex<Vec<u8>>>,
    lock: Arc<AtomicBool>,
    holds_lock: bool,
}

impl MemoryBacking {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        MemoryBacking {
            bytes: Arc::new(Mutex::new(bytes)),
            lock: Arc::new(AtomicBool::new(false)),
            holds_lock: false,
        }
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }

    /// A second handle to the same bytes that does not hold the lock
    pub fn handle(&self) -> Self {
        MemoryBacking {
            bytes: Arc::clone(&self.bytes),
            lock: Arc::clone(&self.lock),
            holds_lock: false,
        }
    }
}

impl BackingStore for MemoryBacking {
    fn len(&mut self) -> Result<u64> {
        Ok(self.bytes.lock().len() as u64)
    }

    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let bytes = self.bytes.lock();
        let (start, end) = memory_range(offset, buf.len())?;
        if end > bytes.len() {
            return Err(BvfsError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "read out of bounds: offset={} len={} store_len={}",
                    offset,
                    buf.len(),
                    bytes.len()
                ),
            )));
        }
        buf.copy_from_slice(&bytes[start..end]);
        Ok(())
    }

    fn write_all_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut bytes = self.bytes.lock();
        let (start, end) = memory_range(offset, buf.len())?;
        if end > bytes.len() {
            resize_zeroed(&mut bytes, end)?;
        }
        bytes[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        let (len, _) = memory_range(len, 0)?;
        resize_zeroed(&mut self.bytes.lock(), len)
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn try_lock_exclusive(&mut self) -> Result<bool> {
        if self.holds_lock {
            return Ok(true);
        }
        self.holds_lock = self
            .lock
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        Ok(self.holds_lock)
    }

    fn unlock(&mut self) -> Result<()> {
        if self.holds_lock {
            self.lock.store(false, Ordering::Release);
            self.holds_lock = false;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "<memory>".to_string()
    }
}

impl Drop for MemoryBacking {
    fn drop(&mut self) {
        if self.holds_lock {
            self.lock.store(false, Ordering::Release);
        }
    }
}

/// Byte range `offset..offset + len` as in-memory indices
fn memory_range(offset: u64, len: usize) -> Result<(usize, usize)> {
    usize::try_from(offset)
        .ok()
        .and_then(|start| start.checked_add(len).map(|end| (start, end)))
        .ok_or_else(|| {
            BvfsError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("offset {} + {} exceeds the address space", offset, len),
            ))
        })
}

/// Resize, reporting an allocation failure instead of aborting
fn resize_zeroed(bytes: &mut Vec<u8>, len: usize) -> Result<()> {
    if len > bytes.len() {
        bytes
            .try_reserve_exact(len - bytes.len())
            .map_err(|e| BvfsError::Io(std::io::Error::new(std::io::ErrorKind::OutOfMemory, e)))?;
    }
    bytes.resize(len, 0);
    Ok(())
}

/// Block-indexed view of a backing store
pub struct BlockStore<B: BackingStore> {
    backing: B,
    block_count: u64,
    sync_writes: bool,
}

impl<B: BackingStore> BlockStore<B> {
    /// Wrap a backing store
    ///
    /// Fails when the store length is not a whole number of blocks.
    pub fn new(mut backing: B) -> Result<Self> {
        let len = backing.len()?;
        if len % BLOCK_SIZE as u64 != 0 {
            return Err(BvfsError::MisalignedStore(len));
        }

        Ok(BlockStore {
            backing,
            block_count: len / BLOCK_SIZE as u64,
            sync_writes: false,
        })
    }

    /// Sync after every block write
    pub fn set_sync_writes(&mut self, sync_writes: bool) {
        self.sync_writes = sync_writes;
    }

    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    /// Read and decode one block
    pub fn read_block(&mut self, index: u64) -> Result<Block> {
        let buffer = self.read_raw(index)?;
        Block::from_bytes(&buffer)
    }

    /// Read one block image without decoding it
    pub fn read_raw(&mut self, index: u64) -> Result<[u8; BLOCK_SIZE]> {
        self.check_in_range(index)?;
        let mut buffer = [0u8; BLOCK_SIZE];
        self.backing.read_exact_at(offset_of(index)?, &mut buffer)?;
        Ok(buffer)
    }

    /// Encode and write one block, growing the store when needed
    ///
    /// The body is written before the tag byte, so an interrupted write to a
    /// freshly grown block leaves it tagged free.
    pub fn write_block(&mut self, index: u64, block: &Block) -> Result<()> {
        let end = index
            .checked_add(1)
            .filter(|&count| offset_of(count).is_ok())
            .ok_or(BvfsError::InvalidBlockIndex(index))?;
        self.ensure_len(end)?;

        let bytes = block.to_bytes();
        let offset = offset_of(index)?;
        self.backing.write_all_at(offset + 1, &bytes[1..])?;
        self.backing.write_all_at(offset, &bytes[..1])?;

        if self.sync_writes {
            self.backing.sync()?;
        }
        Ok(())
    }

    /// Read only the tag byte of a block
    pub fn read_tag(&mut self, index: u64) -> Result<u8> {
        self.check_in_range(index)?;
        let mut tag = [0u8; 1];
        self.backing.read_exact_at(offset_of(index)?, &mut tag)?;
        Ok(tag[0])
    }

    /// Overwrite only the tag byte of a block
    pub fn write_tag(&mut self, index: u64, tag: u8) -> Result<()> {
        self.check_in_range(index)?;
        self.backing.write_all_at(offset_of(index)?, &[tag])?;
        if self.sync_writes {
            self.backing.sync()?;
        }
        Ok(())
    }

    /// Append one zeroed block and return its index
    pub fn grow(&mut self) -> Result<u64> {
        let index = self.block_count;
        let count = index
            .checked_add(1)
            .ok_or(BvfsError::InvalidBlockIndex(index))?;
        self.ensure_len(count)?;
        Ok(index)
    }

    /// Shrink the store to `count` blocks
    pub fn truncate_blocks(&mut self, count: u64) -> Result<()> {
        if count < self.block_count {
            self.backing.set_len(offset_of(count)?)?;
            self.block_count = count;
        }
        Ok(())
    }

    /// Drop every block (used when formatting over existing data)
    pub fn clear(&mut self) -> Result<()> {
        self.backing.set_len(0)?;
        self.block_count = 0;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.backing.sync()
    }

    pub fn backing(&self) -> &B {
        &self.backing
    }

    pub fn backing_mut(&mut self) -> &mut B {
        &mut self.backing
    }

    pub fn into_backing(self) -> B {
        self.backing
    }

    fn ensure_len(&mut self, count: u64) -> Result<()> {
        if count > self.block_count {
            self.backing.set_len(offset_of(count)?)?;
            self.block_count = count;
        }
        Ok(())
    }

    fn check_in_range(&self, index: u64) -> Result<()> {
        if index >= self.block_count {
            return Err(BvfsError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "block {} is beyond the end of the store ({} blocks)",
                    index, self.block_count
                ),
            )));
        }
        Ok(())
    }
}

/// Byte offset of block `index`
fn offset_of(index: u64) -> Result<u64> {
    index
        .checked_mul(BLOCK_SIZE as u64)
        .ok_or(BvfsError::InvalidBlockIndex(index))
}
