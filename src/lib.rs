//! Aquatest aquarium controller firmware library.
//!
//! Exposes the domain services and adapters for integration testing. All
//! ESP-IDF-specific code is guarded by `#[cfg(target_os = "espidf")]`
//! within each module, with a simulation twin for the host.

#![deny(unused_must_use)]

pub mod app;
pub mod cloud;
pub mod config;
pub mod display;
pub mod error;
pub mod events;
pub mod firmware;
pub mod fsm;
pub mod measurement;
pub mod provisioning;
pub mod scheduler;

pub mod adapters;
pub mod drivers;
pub mod pins;
pub mod sensors;
