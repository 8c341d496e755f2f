//! Node metadata blocks

use crate::core::error::{BvfsError, Result};
use crate::core::page::{PayloadReader, PayloadWriter};
use serde::Serialize;

/// Node type stored in the metadata block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum NodeKind {
    /// Regular file, content is a superblock chain
    File = 1,
    /// Directory, content is a directory block
    Directory = 2,
}

impl NodeKind {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(NodeKind::File),
            2 => Ok(NodeKind::Directory),
            _ => Err(BvfsError::InvalidNodeType(value)),
        }
    }
}

/// Metadata of one filesystem entry
///
/// Exactly one directory entry points at each metadata block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NodeMetadata {
    /// Unix-style permission bits (owner/group/other rwx)
    pub perms: u16,

    pub gid: u32,

    pub uid: u32,

    /// Size in bytes (0 for directories)
    pub size: u64,

    pub kind: NodeKind,
}

impl NodeMetadata {
    pub fn new(kind: NodeKind, perms: u16, gid: u32, uid: u32) -> Self {
        NodeMetadata {
            perms,
            gid,
            uid,
            size: 0,
            kind,
        }
    }

    pub fn file(perms: u16) -> Self {
        Self::new(NodeKind::File, perms, 0, 0)
    }

    pub fn directory(perms: u16) -> Self {
        Self::new(NodeKind::Directory, perms, 0, 0)
    }

    pub fn is_directory(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    /// `rwxr-x---` style rendering of the low nine permission bits
    pub fn mode_string(&self) -> String {
        let mut out = String::with_capacity(9);
        for shift in [6u16, 3, 0] {
            let bits = (self.perms >> shift) & 0b111;
            out.push(if bits & 0b100 != 0 { 'r' } else { '-' });
            out.push(if bits & 0b010 != 0 { 'w' } else { '-' });
            out.push(if bits & 0b001 != 0 { 'x' } else { '-' });
        }
        out
    }

    pub(crate) fn encode_payload(&self, out: &mut PayloadWriter<'_>) {
        out.put_u16(self.perms);
        out.put_u32(self.gid);
        out.put_u32(self.uid);
        out.put_u64(self.size);
        out.put_u8(self.kind as u8);
    }

    pub(crate) fn decode_payload(input: &mut PayloadReader<'_>) -> Result<Self> {
        Ok(NodeMetadata {
            perms: input.u16(),
            gid: input.u32(),
            uid: input.u32(),
            size: input.u64(),
            kind: NodeKind::from_u8(input.u8())?,
        })
    }
}
