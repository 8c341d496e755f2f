//! Human-readable block dump
//!
//! Reads blocks straight from a [`BlockStore`] without mounting, so it also
//! works on volumes left locked by a crashed session.

use crate::core::catalog::NodeMetadata;
use crate::core::error::Result;
use crate::core::header::BLOCK_SIZE;
use crate::core::io::{BackingStore, BlockStore};
use crate::core::page::{Block, BlockContent, BlockType};

/// Render a short view (one line per block) followed by a detailed view
pub fn render<B: BackingStore>(store: &mut BlockStore<B>) -> Result<String> {
    let mut lines = vec!["Short View:".to_string()];
    for index in 0..store.block_count() {
        let tag = store.read_tag(index)?;
        lines.push(summary_line(index, tag));
    }

    lines.push("Detailed View:".to_string());
    for index in 0..store.block_count() {
        let raw = store.read_raw(index)?;
        lines.push(summary_line(index, raw[0]));
        detail_lines(&raw, &mut lines);
    }

    let mut out = lines.join("\n");
    out.push('\n');
    Ok(out)
}

fn summary_line(index: u64, tag: u8) -> String {
    let name = match BlockType::from_u8(tag) {
        BlockType::Unknown if tag != 0 => format!("Unknown (tag {})", tag),
        other => other.name().to_string(),
    };
    format!("{} {:#x}: {}", index, index * BLOCK_SIZE as u64, name)
}

fn detail_lines(raw: &[u8; BLOCK_SIZE], lines: &mut Vec<String>) {
    let block = match Block::from_bytes(raw) {
        Ok(block) => block,
        Err(e) => {
            lines.push(format!("\tUndecodable: {}", e));
            return;
        }
    };

    match block.content {
        BlockContent::Unknown { .. } => {
            let sum: u64 = raw.iter().map(|&b| b as u64).sum();
            if sum == 0 {
                lines.push("\tEmpty Block".to_string());
            } else {
                lines.push(format!("\tData in Block: {}", sum));
            }
        }
        BlockContent::Data(data) => {
            lines.push(format!("\tContent Size: {}", data.len()));
        }
        BlockContent::Superblock(sb) => {
            lines.push(format!("\tPrevious Superblock: {}", sb.prev));
            lines.push(format!("\tNext Superblock: {}", sb.next));
            lines.push(format!("\tExtents in use: {}", sb.extent_count()));
            for extent in sb.used_extents() {
                lines.push(format!("\t\t- {}", extent));
            }
        }
        BlockContent::NodeMetadata(meta) => {
            lines.push("\tPermissions:".to_string());
            let mode = meta.mode_string();
            lines.push(format!("\t\tOwner: {}", &mode[0..3]));
            lines.push(format!("\t\tGroup: {}", &mode[3..6]));
            lines.push(format!("\t\tEveryone: {}", &mode[6..9]));
            lines.push(format!("\tOwner uid/gid: {}/{}", meta.uid, meta.gid));
            lines.push(format!("\tNode Size: {} bytes", meta.size));
            lines.push(format!("\tNode Type: {}", node_type(&meta)));
        }
        BlockContent::Directory(dir) => {
            lines.push(format!("\tParent Directory: {}", dir.parent));
            lines.push("\tEntries:".to_string());
            for (_, entry) in dir.occupied() {
                lines.push(format!("\t\tNode Name: {:?}", entry.name.to_string_lossy()));
                lines.push(format!("\t\t\t- NodeMetadata Pointer: {}", entry.metadata));
                lines.push(format!("\t\t\t- Superblock/Dir Pointer: {}", entry.content));
            }
        }
        BlockContent::Root(root) => {
            lines.push(format!(
                "\tConstant Identifier: {:?}",
                String::from_utf8_lossy(&root.magic)
            ));
            lines.push(format!("\tVersion: {}", root.version));
            lines.push(format!("\tRoot Directory: {}", root.root_directory));
            lines.push(format!("\tLocked: {}", root.is_locked()));
        }
    }
}

fn node_type(meta: &NodeMetadata) -> &'static str {
    if meta.is_directory() {
        "directory"
    } else {
        "file"
    }
}
