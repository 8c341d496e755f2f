//! Block codec
//!
//! Every block is `[tag (1)][reserved (23)][payload (1000)]`. The payload is
//! interpreted according to the tag. Integers inside a payload are stored
//! big-endian; names, reserved bytes and data bytes are copied verbatim.

use crate::core::catalog::{DataBlock, DirectoryBlock, NodeMetadata, Superblock};
use crate::core::error::{BvfsError, Result};
use crate::core::header::{
    RootBlock, BLOCK_HEADER_SIZE, BLOCK_SIZE, PAYLOAD_SIZE, RESERVED_SIZE,
};
use serde::Serialize;

/// Block types in a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[repr(u8)]
pub enum BlockType {
    /// Free or uninitialized block
    Unknown = 0,
    /// File content
    Data = 1,
    /// Extent list of one file stream
    Superblock = 2,
    /// Permissions, ownership, size and type of one entry
    NodeMetadata = 3,
    /// Eight directory entries
    Directory = 4,
    /// Volume anchor (always block 0)
    Root = 5,
}

impl BlockType {
    /// Parse a tag byte
    ///
    /// Unrecognized values map to `Unknown`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => BlockType::Data,
            2 => BlockType::Superblock,
            3 => BlockType::NodeMetadata,
            4 => BlockType::Directory,
            5 => BlockType::Root,
            _ => BlockType::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BlockType::Unknown => "Unknown",
            BlockType::Data => "Data",
            BlockType::Superblock => "Superblock",
            BlockType::NodeMetadata => "NodeMetadata",
            BlockType::Directory => "Directory",
            BlockType::Root => "Root",
        }
    }
}

/// Whether a raw tag byte marks a free block
///
/// Only tag 0 is free. Tags this version does not recognize still count as
/// occupied.
pub fn is_free_tag(tag: u8) -> bool {
    tag == BlockType::Unknown as u8
}

/// Typed payload of a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockContent {
    /// Free block or unrecognized tag, payload kept opaque
    Unknown { tag: u8, raw: [u8; PAYLOAD_SIZE] },
    Data(DataBlock),
    Superblock(Superblock),
    NodeMetadata(NodeMetadata),
    Directory(DirectoryBlock),
    Root(RootBlock),
}

impl BlockContent {
    pub fn tag(&self) -> u8 {
        match self {
            BlockContent::Unknown { tag, .. } => *tag,
            BlockContent::Data(_) => BlockType::Data as u8,
            BlockContent::Superblock(_) => BlockType::Superblock as u8,
            BlockContent::NodeMetadata(_) => BlockType::NodeMetadata as u8,
            BlockContent::Directory(_) => BlockType::Directory as u8,
            BlockContent::Root(_) => BlockType::Root as u8,
        }
    }
}

/// A decoded 1024-byte block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Reserved header bytes, preserved on round-trip
    pub reserved: [u8; RESERVED_SIZE],

    pub content: BlockContent,
}

impl Block {
    pub fn new(content: BlockContent) -> Self {
        Block {
            reserved: [0; RESERVED_SIZE],
            content,
        }
    }

    /// A zeroed free block
    pub fn free() -> Self {
        Self::new(BlockContent::Unknown {
            tag: 0,
            raw: [0; PAYLOAD_SIZE],
        })
    }

    pub fn root(root: RootBlock) -> Self {
        Self::new(BlockContent::Root(root))
    }

    pub fn directory(dir: DirectoryBlock) -> Self {
        Self::new(BlockContent::Directory(dir))
    }

    pub fn node_metadata(meta: NodeMetadata) -> Self {
        Self::new(BlockContent::NodeMetadata(meta))
    }

    pub fn superblock(sb: Superblock) -> Self {
        Self::new(BlockContent::Superblock(sb))
    }

    pub fn data(data: DataBlock) -> Self {
        Self::new(BlockContent::Data(data))
    }

    /// Raw tag byte written to disk
    pub fn tag(&self) -> u8 {
        self.content.tag()
    }

    pub fn block_type(&self) -> BlockType {
        BlockType::from_u8(self.tag())
    }

    pub fn is_free(&self) -> bool {
        is_free_tag(self.tag())
    }

    /// Serialize to the exact on-disk image
    pub fn to_bytes(&self) -> [u8; BLOCK_SIZE] {
        let mut bytes = [0u8; BLOCK_SIZE];
        bytes[0] = self.tag();
        bytes[1..BLOCK_HEADER_SIZE].copy_from_slice(&self.reserved);

        let mut out = PayloadWriter::new(&mut bytes[BLOCK_HEADER_SIZE..]);
        match &self.content {
            BlockContent::Unknown { raw, .. } => out.put_bytes(raw),
            BlockContent::Data(data) => data.encode_payload(&mut out),
            BlockContent::Superblock(sb) => sb.encode_payload(&mut out),
            BlockContent::NodeMetadata(meta) => meta.encode_payload(&mut out),
            BlockContent::Directory(dir) => dir.encode_payload(&mut out),
            BlockContent::Root(root) => root.encode_payload(&mut out),
        }

        bytes
    }

    /// Deserialize from an on-disk image
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < BLOCK_SIZE {
            return Err(BvfsError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "Block bytes too short: {} (expected {})",
                    bytes.len(),
                    BLOCK_SIZE
                ),
            )));
        }

        let tag = bytes[0];
        let mut reserved = [0u8; RESERVED_SIZE];
        reserved.copy_from_slice(&bytes[1..BLOCK_HEADER_SIZE]);

        let payload = &bytes[BLOCK_HEADER_SIZE..BLOCK_SIZE];
        let mut input = PayloadReader::new(payload);

        let content = match BlockType::from_u8(tag) {
            BlockType::Data => BlockContent::Data(DataBlock::decode_payload(&mut input)?),
            BlockType::Superblock => {
                BlockContent::Superblock(Superblock::decode_payload(&mut input))
            }
            BlockType::NodeMetadata => {
                BlockContent::NodeMetadata(NodeMetadata::decode_payload(&mut input)?)
            }
            BlockType::Directory => {
                BlockContent::Directory(DirectoryBlock::decode_payload(&mut input))
            }
            BlockType::Root => BlockContent::Root(RootBlock::decode_payload(&mut input)),
            BlockType::Unknown => BlockContent::Unknown {
                tag,
                raw: input.array(),
            },
        };

        Ok(Block { reserved, content })
    }

    pub fn into_root(self, index: u64) -> Result<RootBlock> {
        match self.content {
            BlockContent::Root(root) => Ok(root),
            other => Err(unexpected(index, BlockType::Root, &other)),
        }
    }

    pub fn into_directory(self, index: u64) -> Result<DirectoryBlock> {
        match self.content {
            BlockContent::Directory(dir) => Ok(dir),
            other => Err(unexpected(index, BlockType::Directory, &other)),
        }
    }

    pub fn into_node_metadata(self, index: u64) -> Result<NodeMetadata> {
        match self.content {
            BlockContent::NodeMetadata(meta) => Ok(meta),
            other => Err(unexpected(index, BlockType::NodeMetadata, &other)),
        }
    }

    pub fn into_superblock(self, index: u64) -> Result<Superblock> {
        match self.content {
            BlockContent::Superblock(sb) => Ok(sb),
            other => Err(unexpected(index, BlockType::Superblock, &other)),
        }
    }

    pub fn into_data(self, index: u64) -> Result<DataBlock> {
        match self.content {
            BlockContent::Data(data) => Ok(data),
            other => Err(unexpected(index, BlockType::Data, &other)),
        }
    }
}

fn unexpected(index: u64, expected: BlockType, found: &BlockContent) -> BvfsError {
    BvfsError::UnexpectedBlockType {
        index,
        expected,
        found: found.tag(),
    }
}

/// Sequential big-endian reader over a payload
pub(crate) struct PayloadReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> PayloadReader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        PayloadReader { bytes, offset: 0 }
    }

    pub(crate) fn array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.offset..self.offset + N]);
        self.offset += N;
        out
    }

    pub(crate) fn u8(&mut self) -> u8 {
        let [b] = self.array::<1>();
        b
    }

    pub(crate) fn u16(&mut self) -> u16 {
        u16::from_be_bytes(self.array())
    }

    pub(crate) fn u32(&mut self) -> u32 {
        u32::from_be_bytes(self.array())
    }

    pub(crate) fn u64(&mut self) -> u64 {
        u64::from_be_bytes(self.array())
    }
}

/// Sequential big-endian writer over a payload
pub(crate) struct PayloadWriter<'a> {
    bytes: &'a mut [u8],
    offset: usize,
}

impl<'a> PayloadWriter<'a> {
    pub(crate) fn new(bytes: &'a mut [u8]) -> Self {
        PayloadWriter { bytes, offset: 0 }
    }

    pub(crate) fn put_bytes(&mut self, data: &[u8]) {
        self.bytes[self.offset..self.offset + data.len()].copy_from_slice(data);
        self.offset += data.len();
    }

    pub(crate) fn put_u8(&mut self, value: u8) {
        self.put_bytes(&[value]);
    }

    pub(crate) fn put_u16(&mut self, value: u16) {
        self.put_bytes(&value.to_be_bytes());
    }

    pub(crate) fn put_u32(&mut self, value: u32) {
        self.put_bytes(&value.to_be_bytes());
    }

    pub(crate) fn put_u64(&mut self, value: u64) {
        self.put_bytes(&value.to_be_bytes());
    }
}
