#![no_main]

use datagram_session::core::frame::parse_data;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Fuzz frame parsing - test for panics, crashes, out-of-bounds slices
    if let Some((_serial, payload)) = parse_data(data) {
        // an accepted frame must expose a payload inside the datagram
        assert!(payload.len() <= data.len());
    }
});
