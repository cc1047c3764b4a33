//! Application core: shared state, commands and the port boundary.
//!
//! Business rules live in the services (`events`, `fsm`, `cloud`,
//! `measurement`, `provisioning`); this module holds what they share.
//! All interaction with hardware happens through **port traits** defined
//! in [`ports`], keeping the services testable without real peripherals.

pub mod commands;
pub mod context;
pub mod events;
pub mod ports;
pub mod state;
