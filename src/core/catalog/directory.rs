//! Directory blocks and their entries

use crate::core::error::{BvfsError, Result};
use crate::core::page::{PayloadReader, PayloadWriter};
use std::fmt;

/// Entries per directory block
pub const DIR_ENTRY_COUNT: usize = 8;
/// Encoded size of one entry
pub const DIR_ENTRY_SIZE: usize = 124;
/// Bytes available for an entry name
pub const NAME_SIZE: usize = 100;
const ENTRY_RESERVED_SIZE: usize = DIR_ENTRY_SIZE - NAME_SIZE - 8 - 8;

/// Fixed 100-byte entry name
///
/// Names are UTF-8, padded with NUL bytes. A name that uses all 100 bytes
/// carries no terminator. The logical name is everything before the first
/// NUL. The raw field is kept as read so that any trailing bytes round-trip.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EntryName([u8; NAME_SIZE]);

impl EntryName {
    /// Build a name, rejecting empty names, names over 100 bytes and names
    /// containing NUL or '/'
    pub fn new(name: &str) -> Result<Self> {
        let bytes = name.as_bytes();
        if bytes.len() > NAME_SIZE {
            return Err(BvfsError::NameTooLong(bytes.len()));
        }
        if bytes.is_empty() || bytes.contains(&0) || bytes.contains(&b'/') {
            return Err(BvfsError::InvalidName(name.to_string()));
        }

        let mut raw = [0u8; NAME_SIZE];
        raw[..bytes.len()].copy_from_slice(bytes);
        Ok(EntryName(raw))
    }

    pub fn from_raw(raw: [u8; NAME_SIZE]) -> Self {
        EntryName(raw)
    }

    pub fn empty() -> Self {
        EntryName([0; NAME_SIZE])
    }

    /// Name bytes up to the first NUL
    pub fn as_bytes(&self) -> &[u8] {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(NAME_SIZE);
        &self.0[..end]
    }

    pub fn raw(&self) -> &[u8; NAME_SIZE] {
        &self.0
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(self.as_bytes()).into_owned()
    }

    pub fn matches(&self, name: &str) -> bool {
        self.as_bytes() == name.as_bytes()
    }
}

impl fmt::Debug for EntryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryName({:?})", self.to_string_lossy())
    }
}

impl fmt::Display for EntryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

/// One named slot of a directory block
///
/// `metadata == 0` marks an empty slot. Block 0 is always the root block, so
/// it can never be a real metadata pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    /// NodeMetadata block of the entry
    pub metadata: u64,

    /// Superblock chain head (file) or directory block (subdirectory)
    pub content: u64,

    pub name: EntryName,

    pub reserved: [u8; ENTRY_RESERVED_SIZE],
}

impl DirEntry {
    pub fn new(metadata: u64, content: u64, name: EntryName) -> Self {
        DirEntry {
            metadata,
            content,
            name,
            reserved: [0; ENTRY_RESERVED_SIZE],
        }
    }

    pub fn empty() -> Self {
        Self::new(0, 0, EntryName::empty())
    }

    pub fn is_empty(&self) -> bool {
        self.metadata == 0
    }

    fn encode(&self, out: &mut PayloadWriter<'_>) {
        out.put_u64(self.metadata);
        out.put_u64(self.content);
        out.put_bytes(self.name.raw());
        out.put_bytes(&self.reserved);
    }

    fn decode(input: &mut PayloadReader<'_>) -> Self {
        DirEntry {
            metadata: input.u64(),
            content: input.u64(),
            name: EntryName::from_raw(input.array()),
            reserved: input.array(),
        }
    }
}

impl Default for DirEntry {
    fn default() -> Self {
        Self::empty()
    }
}

/// Directory block payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryBlock {
    /// Parent directory block, 0 for the root directory
    pub parent: u64,

    pub entries: [DirEntry; DIR_ENTRY_COUNT],
}

impl DirectoryBlock {
    /// An empty directory under `parent`
    pub fn new(parent: u64) -> Self {
        DirectoryBlock {
            parent,
            entries: [DirEntry::empty(); DIR_ENTRY_COUNT],
        }
    }

    /// Occupied slots in slot order
    pub fn occupied(&self) -> impl Iterator<Item = (usize, &DirEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| !entry.is_empty())
    }

    pub fn find(&self, name: &str) -> Option<(usize, &DirEntry)> {
        self.occupied().find(|(_, entry)| entry.name.matches(name))
    }

    pub fn first_free_slot(&self) -> Option<usize> {
        self.entries.iter().position(DirEntry::is_empty)
    }

    pub fn is_empty(&self) -> bool {
        self.occupied().next().is_none()
    }

    pub(crate) fn encode_payload(&self, out: &mut PayloadWriter<'_>) {
        out.put_u64(self.parent);
        for entry in &self.entries {
            entry.encode(out);
        }
    }

    pub(crate) fn decode_payload(input: &mut PayloadReader<'_>) -> Self {
        let parent = input.u64();
        let mut entries = [DirEntry::empty(); DIR_ENTRY_COUNT];
        for entry in entries.iter_mut() {
            *entry = DirEntry::decode(input);
        }
        DirectoryBlock { parent, entries }
    }
}

impl Default for DirectoryBlock {
    fn default() -> Self {
        Self::new(0)
    }
}
