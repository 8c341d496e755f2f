//! # BvFs - Block Virtual Filesystem
//!
//! `bvfs` stores a small filesystem inside a single host file (or any other
//! random-access byte container). It is meant for embedding in applications
//! that need a private, portable mini-filesystem:
//!
//! - **Fixed 1024-byte blocks** with a one-byte type tag
//! - **Portable layout**: every integer is big-endian on disk
//! - **Tag-scanning allocator**: a block is free exactly when its tag is 0
//! - **Exclusive mounts** guarded by an OS advisory lock and a persisted flag
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bvfs::{Result, Volume};
//!
//! # fn main() -> Result<()> {
//! // Format a new volume and mount it
//! let volume = Volume::create("data.bvfs")?;
//! let root = volume.root_directory()?;
//!
//! // Directories and files are addressed by their directory block
//! let docs = volume.mkdir(root, "docs", 0o755)?;
//! volume.create_file(docs, "report.txt", 0o644)?;
//! volume.write_file(docs, "report.txt", b"Hello, World!")?;
//!
//! let content = volume.read_file(docs, "report.txt")?;
//! assert_eq!(content, b"Hello, World!");
//!
//! // Clears the persisted lock flag (also happens on drop)
//! volume.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Advanced Usage
//!
//! ```rust,no_run
//! use bvfs::{ReusePolicy, Result, VolumeBuilder};
//!
//! # fn main() -> Result<()> {
//! let volume = VolumeBuilder::new()
//!     .path("/data/archive.bvfs")
//!     .format()
//!     .reuse_policy(ReusePolicy::ForwardOnly)
//!     .sync_writes(true)
//!     .build()?;
//!
//! let block = volume.allocate()?;
//! println!("allocated block {}", block);
//! # Ok(())
//! # }
//! ```

pub mod core;

pub use crate::core::{
    allocator::{ReusePolicy, ScanAllocator},
    catalog::{
        DataBlock, DirEntry, DirectoryBlock, EntryName, NodeKind, NodeMetadata, Superblock,
        DIR_ENTRY_COUNT, DIR_ENTRY_SIZE, NAME_SIZE, SB_EXTENT_COUNT,
    },
    config::VolumeOptions,
    error::{BvfsError, ErrorKind, Result},
    header::{
        RootBlock, BLOCK_HEADER_SIZE, BLOCK_SIZE, FORMAT_VERSION, MAGIC, PAYLOAD_SIZE,
        ROOT_BLOCK_INDEX, ROOT_DIRECTORY_INDEX,
    },
    io::{BackingStore, BlockStore, FileBacking, MemoryBacking},
    page::{Block, BlockContent, BlockType},
    volume::{Volume, VolumeStats},
};

use std::path::PathBuf;
use tracing::info;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Builder for opening or creating a file-backed [`Volume`]
///
/// # Examples
///
/// ```rust,no_run
/// use bvfs::VolumeBuilder;
///
/// # fn main() -> bvfs::Result<()> {
/// let volume = VolumeBuilder::new()
///     .path("/data/archive.bvfs")
///     .format()           // Optional: write a fresh volume first
///     .overwrite(true)    // Optional: replace existing content
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct VolumeBuilder {
    path: Option<PathBuf>,
    options: VolumeOptions,
    format: bool,
}

impl VolumeBuilder {
    /// Create a new VolumeBuilder with default options
    pub fn new() -> Self {
        VolumeBuilder {
            path: None,
            options: VolumeOptions::default(),
            format: false,
        }
    }

    /// Set the backing file path
    pub fn path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Replace all options at once (e.g. loaded from TOML)
    pub fn options(mut self, options: VolumeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn reuse_policy(mut self, policy: ReusePolicy) -> Self {
        self.options.reuse_policy = policy;
        self
    }

    /// Allow formatting over a file that already holds data
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.options.overwrite = overwrite;
        self
    }

    pub fn sync_writes(mut self, sync_writes: bool) -> Self {
        self.options.sync_writes = sync_writes;
        self
    }

    /// Format the target before opening it
    pub fn format(mut self) -> Self {
        self.format = true;
        self
    }

    /// Build the Volume instance
    pub fn build(self) -> Result<Volume> {
        let path = self
            .path
            .ok_or_else(|| BvfsError::Config("path must be set".to_string()))?;

        info!(
            "Building volume at {} (format: {}, policy: {:?})",
            path.display(),
            self.format,
            self.options.reuse_policy
        );

        if self.format {
            Volume::create_with(&path, self.options)
        } else {
            Volume::open_with(&path, self.options)
        }
    }
}

impl Default for VolumeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
