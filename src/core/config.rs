//! Volume options
//!
//! Options can be built in code or loaded from a TOML file:
//!
//! ```toml
//! reuse_policy = "forward-only"
//! overwrite = false
//! sync_writes = true
//! ```

use crate::core::allocator::ReusePolicy;
use crate::core::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeOptions {
    /// Cursor behaviour after a block is released
    pub reuse_policy: ReusePolicy,

    /// Let `format` truncate a target that already holds data
    pub overwrite: bool,

    /// Sync the backing store after every block write
    pub sync_writes: bool,
}

impl VolumeOptions {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}
