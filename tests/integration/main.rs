//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! against mock adapters.  All tests run on the host (x86_64) with no
//! real hardware required.

mod cloud_sync_tests;
mod event_tests;
mod feeding_tests;
mod mock_hw;
mod provisioning_flow_tests;
mod publish_cycle_tests;
mod schedule_flow_tests;
