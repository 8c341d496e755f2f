use crate::core::page::BlockType;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BvfsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid magic in root block: {0:?}")]
    InvalidMagic([u8; 4]),

    #[error("Unsupported format version: {found} (supported up to {supported})")]
    UnsupportedVersion { found: u16, supported: u16 },

    #[error("Unexpected block type at block {index}: expected {expected:?}, found tag {found}")]
    UnexpectedBlockType {
        index: u64,
        expected: BlockType,
        found: u8,
    },

    #[error("Invalid node type: {0}")]
    InvalidNodeType(u8),

    #[error("Invalid data block length: {0} (max 998)")]
    InvalidDataLength(u16),

    #[error("Store length {0} is not a multiple of the block size")]
    MisalignedStore(u64),

    #[error("Superblock chain revisits block {0}")]
    CorruptChain(u64),

    #[error("Volume is locked by another session")]
    Locked,

    #[error("Volume is not open")]
    NotOpen,

    #[error("Target already contains {0} bytes of data")]
    AlreadyExists(u64),

    #[error("Invalid block index: {0}")]
    InvalidBlockIndex(u64),

    #[error("Reserved block cannot be released: {0}")]
    ReservedBlock(u64),

    #[error("Invalid entry name: {0:?}")]
    InvalidName(String),

    #[error("Entry name too long: {0} bytes (max 100)")]
    NameTooLong(usize),

    #[error("Directory block {0} has no free entry slot")]
    DirectoryFull(u64),

    #[error("Directory is not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Entry already exists: {0}")]
    EntryExists(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Not a file: {0}")]
    NotAFile(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Coarse classification of [`BvfsError`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Underlying store read/write/seek failure
    Io,
    /// Bad magic, unexpected tag, unsupported version or malformed record
    Format,
    /// Open attempted on a volume mounted elsewhere
    Locked,
    /// Operation attempted outside the open state
    NotOpen,
    /// Format attempted over live data without overwrite intent
    AlreadyExists,
    /// Caller error: bad index, bad name, missing entry, full directory
    Usage,
}

impl BvfsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BvfsError::Io(_) => ErrorKind::Io,
            BvfsError::InvalidMagic(_)
            | BvfsError::UnsupportedVersion { .. }
            | BvfsError::UnexpectedBlockType { .. }
            | BvfsError::InvalidNodeType(_)
            | BvfsError::InvalidDataLength(_)
            | BvfsError::MisalignedStore(_)
            | BvfsError::CorruptChain(_) => ErrorKind::Format,
            BvfsError::Locked => ErrorKind::Locked,
            BvfsError::NotOpen => ErrorKind::NotOpen,
            BvfsError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            BvfsError::InvalidBlockIndex(_)
            | BvfsError::ReservedBlock(_)
            | BvfsError::InvalidName(_)
            | BvfsError::NameTooLong(_)
            | BvfsError::DirectoryFull(_)
            | BvfsError::DirectoryNotEmpty(_)
            | BvfsError::NotFound(_)
            | BvfsError::EntryExists(_)
            | BvfsError::NotADirectory(_)
            | BvfsError::NotAFile(_)
            | BvfsError::Config(_) => ErrorKind::Usage,
        }
    }
}

impl From<toml::de::Error> for BvfsError {
    fn from(err: toml::de::Error) -> Self {
        BvfsError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BvfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let io = BvfsError::from(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert_eq!(io.kind(), ErrorKind::Io);
        assert_eq!(BvfsError::InvalidMagic(*b"NOPE").kind(), ErrorKind::Format);
        assert_eq!(BvfsError::MisalignedStore(1025).kind(), ErrorKind::Format);
        assert_eq!(BvfsError::Locked.kind(), ErrorKind::Locked);
        assert_eq!(BvfsError::NotOpen.kind(), ErrorKind::NotOpen);
        assert_eq!(BvfsError::AlreadyExists(2048).kind(), ErrorKind::AlreadyExists);
        assert_eq!(BvfsError::DirectoryFull(1).kind(), ErrorKind::Usage);
    }

    #[test]
    fn test_error_messages() {
        let err = BvfsError::UnsupportedVersion {
            found: 7,
            supported: 1,
        };
        assert_eq!(
            err.to_string(),
            "Unsupported format version: 7 (supported up to 1)"
        );
        assert_eq!(
            BvfsError::NameTooLong(101).to_string(),
            "Entry name too long: 101 bytes (max 100)"
        );
    }
}
