//! DS18B20 water temperature probe on a single-drop 1-Wire bus.
//!
//! One conversion = reset, SKIP ROM, CONVERT T, 750 ms wait (12-bit),
//! reset, SKIP ROM, READ SCRATCHPAD (9 bytes, last is the Dallas CRC).
//! The scratchpad CRC is checked; a mismatch is reported rather than
//! returning a half-read value.

use embedded_hal::delay::DelayNs;
use log::debug;

use crate::app::ports::TemperatureProbe;
use crate::drivers::onewire::OneWireTransport;
use crate::error::SensorError;

const CMD_SKIP_ROM: u8 = 0xCC;
const CMD_CONVERT_T: u8 = 0x44;
const CMD_READ_SCRATCHPAD: u8 = 0xBE;

/// Worst-case 12-bit conversion time.
const CONVERSION_MS: u32 = 750;

/// °C per LSB at 12-bit resolution.
const LSB_CELSIUS: f32 = 0.0625;

/// Dallas/Maxim CRC-8 (reflected polynomial 0x8C).
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &b in data {
        let mut byte = b;
        for _ in 0..8 {
            let mix = (crc ^ byte) & 1;
            crc >>= 1;
            if mix != 0 {
                crc ^= 0x8C;
            }
            byte >>= 1;
        }
    }
    crc
}

/// Decode a 9-byte scratchpad into °C.
pub fn scratchpad_to_celsius(scratchpad: &[u8; 9]) -> Result<f32, SensorError> {
    if crc8(&scratchpad[..8]) != scratchpad[8] {
        return Err(SensorError::CrcMismatch);
    }
    let raw = i16::from_le_bytes([scratchpad[0], scratchpad[1]]);
    Ok(f32::from(raw) * LSB_CELSIUS)
}

pub struct Ds18b20<T, D> {
    bus: T,
    delay: D,
}

impl<T: OneWireTransport, D: DelayNs> Ds18b20<T, D> {
    pub fn new(bus: T, delay: D) -> Self {
        Self { bus, delay }
    }

    fn select(&mut self) -> Result<(), SensorError> {
        if !self.bus.reset()? {
            return Err(SensorError::NoPresence);
        }
        self.bus.write_byte(CMD_SKIP_ROM)
    }
}

impl<T: OneWireTransport, D: DelayNs> TemperatureProbe for Ds18b20<T, D> {
    fn read_celsius(&mut self) -> Result<f32, SensorError> {
        self.select()?;
        self.bus.write_byte(CMD_CONVERT_T)?;
        self.delay.delay_ms(CONVERSION_MS);

        self.select()?;
        self.bus.write_byte(CMD_READ_SCRATCHPAD)?;
        let mut scratchpad = [0u8; 9];
        for b in &mut scratchpad {
            *b = self.bus.read_byte()?;
        }
        let celsius = scratchpad_to_celsius(&scratchpad)?;
        debug!("DS18B20: {celsius:.4}C");
        Ok(celsius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    const SCRATCH_25C: [u8; 9] = [0x91, 0x01, 0x4B, 0x46, 0x7F, 0xFF, 0x0F, 0x10, 0x25];

    struct FakeProbe {
        present: bool,
        written: Vec<u8>,
        reply: VecDeque<u8>,
    }

    impl OneWireTransport for FakeProbe {
        fn reset(&mut self) -> Result<bool, SensorError> {
            Ok(self.present)
        }
        fn write_byte(&mut self, byte: u8) -> Result<(), SensorError> {
            self.written.push(byte);
            Ok(())
        }
        fn read_byte(&mut self) -> Result<u8, SensorError> {
            self.reply.pop_front().ok_or(SensorError::BusFault)
        }
    }

    struct NoDelay;
    impl DelayNs for NoDelay {
        fn delay_ns(&mut self, _ns: u32) {}
    }

    fn probe(present: bool, scratchpad: &[u8]) -> Ds18b20<FakeProbe, NoDelay> {
        Ds18b20::new(
            FakeProbe {
                present,
                written: Vec::new(),
                reply: scratchpad.iter().copied().collect(),
            },
            NoDelay,
        )
    }

    #[test]
    fn crc_matches_datasheet_example() {
        assert_eq!(crc8(&SCRATCH_25C[..8]), 0x25);
    }

    #[test]
    fn decodes_positive_and_negative() {
        assert!((scratchpad_to_celsius(&SCRATCH_25C).unwrap() - 25.0625).abs() < 1e-4);
        let cold = [0x5E, 0xFF, 0x4B, 0x46, 0x7F, 0xFF, 0x02, 0x10, 0xB6];
        assert!((scratchpad_to_celsius(&cold).unwrap() + 10.125).abs() < 1e-4);
    }

    #[test]
    fn corrupted_scratchpad_is_rejected() {
        let mut bad = SCRATCH_25C;
        bad[0] ^= 0x01;
        assert_eq!(scratchpad_to_celsius(&bad), Err(SensorError::CrcMismatch));
    }

    #[test]
    fn full_conversion_sequence() {
        let mut p = probe(true, &SCRATCH_25C);
        let c = p.read_celsius().unwrap();
        assert!((c - 25.0625).abs() < 1e-4);
        assert_eq!(p.bus.written, vec![0xCC, 0x44, 0xCC, 0xBE]);
    }

    #[test]
    fn missing_probe_reports_no_presence() {
        let mut p = probe(false, &[]);
        assert_eq!(p.read_celsius(), Err(SensorError::NoPresence));
    }
}
