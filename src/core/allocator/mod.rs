//! Block allocation for bvfs volumes
//!
//! There is no persistent free list or bitmap: a block is free exactly when
//! its tag byte is `Unknown`. The allocator scans tag bytes forward from a
//! cursor and grows the store by one block when it runs off the end.

pub mod scan;

use serde::{Deserialize, Serialize};

pub use scan::ScanAllocator;

/// What happens to the cursor when a block is released
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReusePolicy {
    /// Move the cursor back to the released index, so freed blocks are
    /// handed out again lowest-first within the same session
    #[default]
    Rewind,

    /// Never move the cursor back; blocks freed behind it are only found by
    /// a later session
    ForwardOnly,
}

impl ReusePolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "rewind" => Some(ReusePolicy::Rewind),
            "forward-only" | "forward_only" | "forwardonly" => Some(ReusePolicy::ForwardOnly),
            _ => None,
        }
    }
}
