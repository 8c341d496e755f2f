//! Volume layout constants and the root block (block 0)

use crate::core::error::{BvfsError, Result};
use crate::core::page::{PayloadReader, PayloadWriter};

pub const MAGIC: [u8; 4] = *b"BvFs";
pub const FORMAT_VERSION: u16 = 1;

/// Size of every block on disk
pub const BLOCK_SIZE: usize = 1024;
/// Tag byte plus reserved padding
pub const BLOCK_HEADER_SIZE: usize = 24;
pub const RESERVED_SIZE: usize = BLOCK_HEADER_SIZE - 1;
pub const PAYLOAD_SIZE: usize = BLOCK_SIZE - BLOCK_HEADER_SIZE;

pub const ROOT_BLOCK_INDEX: u64 = 0;
/// Root directory location written by format
pub const ROOT_DIRECTORY_INDEX: u64 = 1;

/// Value stored in the lock flag while a session is mounted
pub const LOCKED: u8 = 0xFF;
pub const UNLOCKED: u8 = 0;

/// Root block payload (block 0)
///
/// Holds the format identity, the format version, the pointer to the root
/// directory block and the mount lock flag. There is exactly one root block
/// per volume and it never moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootBlock {
    /// Magic literal: "BvFs"
    pub magic: [u8; 4],

    /// Format version the volume was written with
    pub version: u16,

    /// Block index of the root directory
    pub root_directory: u64,

    /// Nonzero while a session holds the volume open
    pub locked: u8,
}

impl RootBlock {
    /// Encoded payload length (magic + version + rootdir + locked)
    pub const ENCODED_SIZE: usize = 4 + 2 + 8 + 1;

    pub fn new(root_directory: u64) -> Self {
        RootBlock {
            magic: MAGIC,
            version: FORMAT_VERSION,
            root_directory,
            locked: UNLOCKED,
        }
    }

    /// Validate identity and version
    ///
    /// Versions older than [`FORMAT_VERSION`] are accepted, newer ones are not.
    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(BvfsError::InvalidMagic(self.magic));
        }

        if self.version > FORMAT_VERSION {
            return Err(BvfsError::UnsupportedVersion {
                found: self.version,
                supported: FORMAT_VERSION,
            });
        }

        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        self.locked != UNLOCKED
    }

    pub(crate) fn encode_payload(&self, out: &mut PayloadWriter<'_>) {
        out.put_bytes(&self.magic);
        out.put_u16(self.version);
        out.put_u64(self.root_directory);
        out.put_u8(self.locked);
    }

    pub(crate) fn decode_payload(input: &mut PayloadReader<'_>) -> Self {
        RootBlock {
            magic: input.array(),
            version: input.u16(),
            root_directory: input.u64(),
            locked: input.u8(),
        }
    }
}

impl Default for RootBlock {
    fn default() -> Self {
        Self::new(ROOT_DIRECTORY_INDEX)
    }
}
