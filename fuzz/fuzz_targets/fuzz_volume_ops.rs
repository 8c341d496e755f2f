#![no_main]
use arbitrary::Arbitrary;
use bvfs::{MemoryBacking, Volume, VolumeOptions};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
enum Op {
    Mkdir { name: String },
    Create { name: String },
    Write { name: String, len: u16, byte: u8 },
    Read { name: String },
    SetMetadata { name: String, size: u64, perms: u16, gid: u32, uid: u32 },
    Remove { name: String },
    Trim,
}

// Random directory/file operations must never panic and must keep
// every written file readable with the content last written.
fuzz_target!(|ops: Vec<Op>| {
    let backing = MemoryBacking::new();
    Volume::format_store(backing.handle(), false).unwrap();
    let volume = Volume::open_store(backing.handle(), VolumeOptions::default()).unwrap();

    for op in ops.into_iter().take(64) {
        match op {
            Op::Mkdir { name } => {
                let _ = volume.mkdir(1, &name, 0o755);
            }
            Op::Create { name } => {
                let _ = volume.create_file(1, &name, 0o644);
            }
            Op::Write { name, len, byte } => {
                let content = vec![byte; len as usize];
                if volume.write_file(1, &name, &content).is_ok() {
                    assert_eq!(volume.read_file(1, &name).unwrap(), content);
                }
            }
            Op::Read { name } => {
                let _ = volume.read_file(1, &name);
            }
            Op::SetMetadata { name, size, perms, gid, uid } => {
                if let Ok(Some(entry)) = volume.lookup(1, &name) {
                    if let Ok(mut meta) = volume.node_metadata(entry.metadata) {
                        meta.size = size;
                        meta.perms = perms;
                        meta.gid = gid;
                        meta.uid = uid;
                        volume.set_node_metadata(entry.metadata, meta).unwrap();
                        let _ = volume.read_file(1, &name);
                    }
                }
            }
            Op::Remove { name } => {
                let _ = volume.remove(1, &name);
            }
            Op::Trim => {
                volume.trim().unwrap();
            }
        }
    }

    volume.close().unwrap();
});
