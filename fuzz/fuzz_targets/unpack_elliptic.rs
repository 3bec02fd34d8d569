#![no_main]

use libfuzzer_sys::fuzz_target;
use lastwill_core::AsymmetricCiphertext;

fuzz_target!(|data: &[u8]| {
    // AsymmetricCiphertext::from_bytes must never panic.
    if let Ok(ct) = AsymmetricCiphertext::from_bytes(data) {
        // Re-serialize and parse again, which should also never panic
        if let Ok(bytes) = ct.to_bytes() {
            let _ = AsymmetricCiphertext::from_bytes(&bytes);
        }
    }
});
