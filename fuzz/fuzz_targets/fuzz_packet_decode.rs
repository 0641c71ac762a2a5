//! Fuzz target: `crtp::codec::decode`
//!
//! Any frame up to the MTU must decode, and re-encoding it must give the
//! input back with the reserved header bits cleared. Longer frames must be
//! rejected, never truncated.
//!
//! cargo fuzz run fuzz_packet_decode

#![no_main]

use crazylink::crtp::codec::{MAX_FRAME, decode, encode};
use libfuzzer_sys::fuzz_target;

const RESERVED_BITS: u8 = 0x0C;

fuzz_target!(|data: &[u8]| {
    match decode(data) {
        Ok(packet) => {
            assert!(data.len() <= MAX_FRAME);
            let frame = encode(&packet);
            assert_eq!(frame[0], data[0] & !RESERVED_BITS);
            assert_eq!(&frame[1..], &data[1..]);
        }
        Err(_) => assert!(data.is_empty() || data.len() > MAX_FRAME),
    }
});
