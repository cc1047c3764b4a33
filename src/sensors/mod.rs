//! Water-quality probes: DS18B20 temperature and analog pH.
//!
//! Both implement the probe ports in [`crate::app::ports`]; averaging,
//! range filtering and scheduling live in [`crate::measurement`].

pub mod ph;
pub mod temperature;
