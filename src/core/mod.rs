//! BvFs core storage layer
//!
//! - [`error`] - Error type and its coarse [`error::ErrorKind`] classification
//! - [`header`] - Layout constants and the root block (block 0)
//! - [`page`] - Block codec: tag byte, reserved bytes, typed payload
//! - [`catalog`] - Directory, metadata, superblock and data payloads
//! - [`io`] - Backing stores and block-indexed I/O
//! - [`lock`] - OS advisory lock on backing files
//! - [`allocator`] - Tag-scanning block allocator
//! - [`volume`] - Mount sessions and directory/content operations
//! - [`dump`] - Human-readable block dump
//! - [`config`] - Volume options
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ Block (1024 bytes)                          │
//! │  - Tag (1): 0 free, 1 data, 2 superblock,   │
//! │    3 metadata, 4 directory, 5 root          │
//! │  - Reserved (23)                            │
//! │  - Payload (1000), big-endian integers      │
//! ├─────────────────────────────────────────────┤
//! │ Block 0: Root                               │
//! │  - Magic "BvFs", version, root dir, lock    │
//! ├─────────────────────────────────────────────┤
//! │ Block 1: Root directory                     │
//! │  - Parent pointer, 8 entries of 124 bytes   │
//! ├─────────────────────────────────────────────┤
//! │ Blocks 2+: allocated on demand              │
//! │  - Metadata → superblock chain → data       │
//! │  - Metadata → directory block               │
//! └─────────────────────────────────────────────┘
//! ```

pub mod allocator;
pub mod catalog;
pub mod config;
pub mod dump;
pub mod error;
pub mod header;
pub mod io;
pub mod lock;
pub mod page;
pub mod volume;

pub use allocator::{ReusePolicy, ScanAllocator};
pub use catalog::{
    DataBlock, DirEntry, DirectoryBlock, EntryName, NodeKind, NodeMetadata, Superblock,
    DIR_ENTRY_COUNT, DIR_ENTRY_SIZE, NAME_SIZE, SB_EXTENT_COUNT,
};
pub use config::VolumeOptions;
pub use error::{BvfsError, ErrorKind, Result};
pub use header::{RootBlock, BLOCK_SIZE, FORMAT_VERSION, MAGIC, PAYLOAD_SIZE};
pub use io::{BackingStore, BlockStore, FileBacking, MemoryBacking};
pub use page::{Block, BlockContent, BlockType};
pub use volume::{Volume, VolumeStats};
