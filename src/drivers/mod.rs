//! Actuator and input drivers, hardware initialisation.

pub mod beam;
pub mod button;
pub mod hw_init;
pub mod onewire;
pub mod stepper;
