//! Analog pH probe (gravity-style front-end, 0–3 V output).
//!
//! The front-end output is read by ADC1 and converted linearly:
//!
//! ```text
//! sensor V = ADC mV / 1000 × divider
//! pH       = scale × sensor V + offset        (scale 3.5, offset 0.0)
//! ```
//!
//! A full-scale ADC reading means the front-end is saturated (probe dry or
//! unpowered) and yields `NaN`; the measurement service drops it.
//!
//! ## Dual-target design
//!
//! On ESP-IDF: [`Adc1Channel`] reads the oneshot unit set up by `hw_init`.
//! On host/test: [`SimAdc`] reads from a static `AtomicU16` for injection.

use embedded_hal::digital::OutputPin;
use log::debug;

use crate::app::ports::PhProbe;
use crate::error::{ActuatorError, SensorError};

const ADC_MAX: u16 = 4095;
const V_REF_MV: u32 = 3300;

/// Raw 12-bit ADC access.
pub trait AdcReader {
    fn read_raw(&mut self) -> Result<u16, SensorError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhCalibration {
    pub scale: f32,
    pub offset: f32,
    pub divider_ratio: f32,
}

impl Default for PhCalibration {
    fn default() -> Self {
        Self {
            scale: 3.5,
            offset: 0.0,
            divider_ratio: crate::pins::PH_DIVIDER_RATIO,
        }
    }
}

/// Uncalibrated raw → mV (linear over the 12 dB range).
pub fn raw_to_millivolts(raw: u16) -> u32 {
    u32::from(raw.min(ADC_MAX)) * V_REF_MV / u32::from(ADC_MAX)
}

pub fn millivolts_to_ph(millivolts: u32, cal: &PhCalibration) -> f32 {
    let sensor_volts = millivolts as f32 / 1000.0 * cal.divider_ratio;
    cal.scale * sensor_volts + cal.offset
}

pub struct AnalogPhProbe<A, P> {
    adc: A,
    power: P,
    cal: PhCalibration,
}

impl<A: AdcReader, P: OutputPin> AnalogPhProbe<A, P> {
    pub fn new(adc: A, mut power: P, cal: PhCalibration) -> Self {
        // Probe starts unpowered; a failure shows up on the first `power`.
        let _ = power.set_low();
        Self { adc, power, cal }
    }
}

impl<A: AdcReader, P: OutputPin> PhProbe for AnalogPhProbe<A, P> {
    fn power(&mut self, on: bool) -> Result<(), ActuatorError> {
        let res = if on {
            self.power.set_high()
        } else {
            self.power.set_low()
        };
        res.map_err(|_| ActuatorError::GpioWriteFailed)
    }

    fn read_ph(&mut self) -> Result<f32, SensorError> {
        let raw = self.adc.read_raw()?;
        if raw >= ADC_MAX {
            debug!("pH: ADC saturated");
            return Ok(f32::NAN);
        }
        let mv = raw_to_millivolts(raw);
        let ph = millivolts_to_ph(mv, &self.cal);
        debug!("pH: ADC {raw}/4095, {mv} mV, pH {ph:.2}");
        Ok(ph)
    }
}

// ───────────────────────────────────────────────────────────────
// ADC sources
// ───────────────────────────────────────────────────────────────

/// One ADC1 channel configured by `hw_init`.
#[cfg(target_os = "espidf")]
pub struct Adc1Channel {
    channel: u32,
}

#[cfg(target_os = "espidf")]
impl Adc1Channel {
    pub fn new(channel: u32) -> Self {
        Self { channel }
    }
}

#[cfg(target_os = "espidf")]
impl AdcReader for Adc1Channel {
    fn read_raw(&mut self) -> Result<u16, SensorError> {
        crate::drivers::hw_init::adc1_read(self.channel)
    }
}

#[cfg(not(target_os = "espidf"))]
static SIM_PH_ADC: core::sync::atomic::AtomicU16 = core::sync::atomic::AtomicU16::new(2640);

#[cfg(not(target_os = "espidf"))]
pub fn sim_set_ph_adc(raw: u16) {
    SIM_PH_ADC.store(raw, core::sync::atomic::Ordering::Relaxed);
}

#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Default)]
pub struct SimAdc;

#[cfg(not(target_os = "espidf"))]
impl AdcReader for SimAdc {
    fn read_raw(&mut self) -> Result<u16, SensorError> {
        Ok(SIM_PH_ADC.load(core::sync::atomic::Ordering::Relaxed))
    }
}
