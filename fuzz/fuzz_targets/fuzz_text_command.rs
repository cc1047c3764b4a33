//! Fuzz target: `AppCommand::parse_text`
//!
//! Arbitrary UTF-8 from the command topic must either parse or be
//! rejected; never panic.
//!
//! cargo fuzz run fuzz_text_command

#![no_main]

use aquatest::app::commands::AppCommand;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = core::str::from_utf8(data) {
        let _ = AppCommand::parse_text(text);
    }
});
