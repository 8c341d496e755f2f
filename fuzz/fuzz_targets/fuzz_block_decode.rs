#![no_main]
use bvfs::{Block, BLOCK_SIZE};
use libfuzzer_sys::fuzz_target;

// Any 1024-byte image either fails to decode or re-encodes to itself,
// except for unused tail bytes that the typed payloads do not carry.
fuzz_target!(|data: &[u8]| {
    if data.len() < BLOCK_SIZE {
        assert!(Block::from_bytes(data).is_err());
        return;
    }

    let Ok(block) = Block::from_bytes(&data[..BLOCK_SIZE]) else {
        return;
    };

    let encoded = block.to_bytes();
    let again = Block::from_bytes(&encoded).expect("re-encoded block must decode");
    assert_eq!(again, block);
    assert_eq!(encoded[..24], data[..24]);
});
