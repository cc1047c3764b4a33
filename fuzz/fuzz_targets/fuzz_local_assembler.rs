//! Fuzz target: `LocalAssembler::on_fragment`
//!
//! Drives arbitrary channel switches and fragment sizes into the BLE
//! provisioning assembler and asserts every buffer stays within its
//! channel capacity.
//!
//! cargo fuzz run fuzz_local_assembler

#![no_main]

use aquatest::provisioning::{LocalAssembler, ProvisionChannel};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut assembler = LocalAssembler::new();
    let mut rest = data;

    // Each record: [channel][len] + len bytes.
    while rest.len() >= 2 {
        let channel = ProvisionChannel::ALL[usize::from(rest[0]) % ProvisionChannel::ALL.len()];
        let len = usize::from(rest[1]).min(rest.len() - 2);
        let _ = assembler.on_fragment(channel, &rest[2..2 + len]);
        rest = &rest[2 + len..];

        for ch in ProvisionChannel::ALL {
            assert!(assembler.len(ch) <= ch.capacity(), "{ch:?} over capacity");
        }
    }

    let drained = assembler.take_all();
    assert!(drained.iter().all(|(ch, bytes)| bytes.len() <= ch.capacity()));
    assert!(assembler.in_progress().is_none());
});
