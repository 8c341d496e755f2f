//! File streams: superblock extent chains and data blocks

use crate::core::error::{BvfsError, Result};
use crate::core::page::{PayloadReader, PayloadWriter};

/// Extent pointers per superblock
pub const SB_EXTENT_COUNT: usize = 123;

/// Superblock payload
///
/// A doubly linked chain node listing the data blocks of one file stream.
/// An extent pointer of 0 marks an unused slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    /// Previous superblock in the chain, 0 if none
    pub prev: u64,

    /// Next superblock in the chain, 0 if none
    pub next: u64,

    pub extents: [u64; SB_EXTENT_COUNT],
}

impl Superblock {
    pub fn new(prev: u64, next: u64) -> Self {
        Superblock {
            prev,
            next,
            extents: [0; SB_EXTENT_COUNT],
        }
    }

    /// Data block pointers in use, in order
    pub fn used_extents(&self) -> impl Iterator<Item = u64> + '_ {
        self.extents.iter().copied().filter(|&ptr| ptr != 0)
    }

    pub fn extent_count(&self) -> usize {
        self.used_extents().count()
    }

    pub(crate) fn encode_payload(&self, out: &mut PayloadWriter<'_>) {
        out.put_u64(self.prev);
        out.put_u64(self.next);
        for &extent in &self.extents {
            out.put_u64(extent);
        }
    }

    pub(crate) fn decode_payload(input: &mut PayloadReader<'_>) -> Self {
        let prev = input.u64();
        let next = input.u64();
        let mut extents = [0u64; SB_EXTENT_COUNT];
        for extent in extents.iter_mut() {
            *extent = input.u64();
        }
        Superblock {
            prev,
            next,
            extents,
        }
    }
}

impl Default for Superblock {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

/// Data block payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBlock {
    len: u16,
    bytes: [u8; DataBlock::CAPACITY],
}

impl DataBlock {
    /// Payload bytes available per data block
    pub const CAPACITY: usize = 998;

    pub fn from_slice(content: &[u8]) -> Result<Self> {
        if content.len() > Self::CAPACITY {
            return Err(BvfsError::InvalidDataLength(
                u16::try_from(content.len()).unwrap_or(u16::MAX),
            ));
        }

        let mut bytes = [0u8; Self::CAPACITY];
        bytes[..content.len()].copy_from_slice(content);
        Ok(DataBlock {
            len: content.len() as u16,
            bytes,
        })
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Used bytes only
    pub fn content(&self) -> &[u8] {
        &self.bytes[..self.len()]
    }

    /// Whole payload region including unused tail bytes
    pub fn raw(&self) -> &[u8; Self::CAPACITY] {
        &self.bytes
    }

    pub(crate) fn encode_payload(&self, out: &mut PayloadWriter<'_>) {
        out.put_u16(self.len);
        out.put_bytes(&self.bytes);
    }

    pub(crate) fn decode_payload(input: &mut PayloadReader<'_>) -> Result<Self> {
        let len = input.u16();
        if len as usize > Self::CAPACITY {
            return Err(BvfsError::InvalidDataLength(len));
        }
        Ok(DataBlock {
            len,
            bytes: input.array(),
        })
    }
}

impl Default for DataBlock {
    fn default() -> Self {
        DataBlock {
            len: 0,
            bytes: [0; Self::CAPACITY],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::header::PAYLOAD_SIZE;

    #[test]
    fn test_payload_sizes() {
        assert_eq!(16 + SB_EXTENT_COUNT * 8, 1000);
        assert_eq!(2 + DataBlock::CAPACITY, PAYLOAD_SIZE);
    }

    #[test]
    fn test_used_extents_skip_holes() {
        let mut sb = Superblock::new(0, 0);
        sb.extents[0] = 10;
        sb.extents[1] = 11;
        sb.extents[5] = 12;
        assert_eq!(sb.used_extents().collect::<Vec<_>>(), vec![10, 11, 12]);
        assert_eq!(sb.extent_count(), 3);
    }

    #[test]
    fn test_data_block_capacity() {
        let data = DataBlock::from_slice(&[7u8; DataBlock::CAPACITY]).unwrap();
        assert_eq!(data.len(), DataBlock::CAPACITY);

        let result = DataBlock::from_slice(&[7u8; DataBlock::CAPACITY + 1]);
        assert!(matches!(result, Err(BvfsError::InvalidDataLength(999))));
    }

    #[test]
    fn test_data_block_content() {
        let data = DataBlock::from_slice(b"hello").unwrap();
        assert_eq!(data.content(), b"hello");
        assert!(data.raw()[5..].iter().all(|&b| b == 0));
        assert!(!data.is_empty());
        assert!(DataBlock::default().is_empty());
    }

    #[test]
    fn test_data_layout() {
        let mut bytes = [0u8; PAYLOAD_SIZE];
        DataBlock::from_slice(b"ab")
            .unwrap()
            .encode_payload(&mut PayloadWriter::new(&mut bytes));
        assert_eq!(&bytes[..4], &[0, 2, b'a', b'b']);
    }
}
