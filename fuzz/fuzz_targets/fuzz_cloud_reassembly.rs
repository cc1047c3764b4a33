//! Fuzz target: `CloudAssembler::on_fragment`
//!
//! Interprets the input as a stream of deliveries (first/continuation,
//! declared length, fragment bytes) and asserts that completed documents
//! never exceed their declared length or the configured limit, and that
//! nothing panics on contradictory length headers.
//!
//! cargo fuzz run fuzz_cloud_reassembly

#![no_main]

use aquatest::cloud::reassembly::{Assembly, CloudAssembler};
use aquatest::cloud::topics::TopicSet;
use libfuzzer_sys::fuzz_target;

const LIMIT: usize = 4096;
const TOPICS: [&str; 3] = [
    "$aws/things/dev/shadow/update/delta",
    "$aws/things/dev/shadow/get/accepted",
    "dev/unknown",
];

fuzz_target!(|data: &[u8]| {
    let mut assembler = CloudAssembler::new(TopicSet::new("dev", None), LIMIT);
    let mut rest = data;

    // Each record: [kind][declared hi][declared lo][len] + len bytes.
    while rest.len() >= 4 {
        let kind = rest[0];
        let declared = usize::from(u16::from_be_bytes([rest[1], rest[2]]));
        let len = usize::from(rest[3]).min(rest.len() - 4);
        let bytes = &rest[4..4 + len];
        rest = &rest[4 + len..];

        let topic = match kind % 4 {
            3 => None,
            i => Some(TOPICS[usize::from(i)]),
        };
        if let Ok(Assembly::Complete(doc)) = assembler.on_fragment(topic, declared, bytes) {
            assert!(doc.payload.len() <= declared, "document longer than declared");
            assert!(doc.payload.len() <= LIMIT, "document over the limit");
        }
    }

    assembler.reset();
    assert!(!assembler.is_pending());
});
