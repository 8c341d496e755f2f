//! Filesystem entities stored in typed blocks
//!
//! - [`DirectoryBlock`] / [`DirEntry`] - eight named slots per block
//! - [`NodeMetadata`] - permissions, ownership, size and node type
//! - [`Superblock`] / [`DataBlock`] - extent chain and content of a file stream

pub mod directory;
pub mod metadata;
pub mod stream;

pub use directory::{DirEntry, DirectoryBlock, EntryName, DIR_ENTRY_COUNT, DIR_ENTRY_SIZE, NAME_SIZE};
pub use metadata::{NodeKind, NodeMetadata};
pub use stream::{DataBlock, Superblock, SB_EXTENT_COUNT};
