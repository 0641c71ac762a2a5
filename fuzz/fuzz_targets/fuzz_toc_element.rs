//! Fuzz target: `TocElement::decode`
//!
//! Element replies come straight off the radio. Decoding must never panic,
//! and whatever decodes must carry the ident from the first byte.
//!
//! cargo fuzz run fuzz_toc_element

#![no_main]

use crazylink::toc::{TocElement, TocKind};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    for kind in [TocKind::Param, TocKind::Log] {
        if let Ok(element) = TocElement::decode(kind, data) {
            assert_eq!(element.ident, data[0]);
            assert!(!element.complete_name().is_empty());
        }
    }
});
