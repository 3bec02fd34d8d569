#![no_main]

use libfuzzer_sys::fuzz_target;
use lastwill_core::packing::{pack, unpack, unpack_chunks};

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes as a packed segment buffer: Ok or Err, never a panic.
    if let Ok(segments) = unpack(data) {
        // Whatever unpacks must pack back to the same buffer
        let repacked = pack(&segments).expect("unpacked segments are packable");
        assert_eq!(repacked, data);
    }

    // Split into two chunks at the first byte's position
    if let Some((&at, rest)) = data.split_first() {
        let at = (at as usize).min(rest.len());
        let _ = unpack_chunks(&[&rest[..at], &rest[at..]]);
    }
});
