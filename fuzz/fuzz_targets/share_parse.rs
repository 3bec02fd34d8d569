#![no_main]

use libfuzzer_sys::fuzz_target;
use lastwill_shamir::{parse_share, Share};

fuzz_target!(|data: &[u8]| {
    // Binary form
    let _ = Share::from_bytes(data);

    // Text forms: transport hex and the human-readable display form.
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = parse_share(s);
        let _ = Share::from_transport(s);

        // With the transport prefix to reach the header checks
        let prefixed = format!("0e{}", s);
        let _ = parse_share(&prefixed);
    }
});
