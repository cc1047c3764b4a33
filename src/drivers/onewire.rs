//! Bit-banged 1-Wire master.
//!
//! The data line is an open-drain pin with a pull-up: `set_low` drives the
//! bus, `set_high` releases it.  Standard-speed slot timing:
//!
//! | Slot    | Drive low | Release / sample          | Recovery |
//! |---------|-----------|---------------------------|----------|
//! | reset   | 480 µs    | sample presence at +70 µs | 410 µs   |
//! | write 1 | 6 µs      | -                         | 64 µs    |
//! | write 0 | 60 µs     | -                         | 10 µs    |
//! | read    | 6 µs      | sample at +9 µs           | 55 µs    |
//!
//! Bytes go LSB first.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};

use crate::error::SensorError;

/// Byte-level access to a 1-Wire bus.  Implemented by [`OneWireBus`];
/// device drivers depend only on this.
pub trait OneWireTransport {
    /// Reset pulse.  `Ok(true)` when at least one device answered.
    fn reset(&mut self) -> Result<bool, SensorError>;

    fn write_byte(&mut self, byte: u8) -> Result<(), SensorError>;

    fn read_byte(&mut self) -> Result<u8, SensorError>;
}

pub struct OneWireBus<P, D> {
    pin: P,
    delay: D,
}

impl<P, D> OneWireBus<P, D>
where
    P: InputPin + OutputPin,
    D: DelayNs,
{
    pub fn new(mut pin: P, delay: D) -> Result<Self, SensorError> {
        pin.set_high().map_err(|_| SensorError::BusFault)?;
        Ok(Self { pin, delay })
    }

    fn drive_low(&mut self) -> Result<(), SensorError> {
        self.pin.set_low().map_err(|_| SensorError::BusFault)
    }

    fn release(&mut self) -> Result<(), SensorError> {
        self.pin.set_high().map_err(|_| SensorError::BusFault)
    }

    fn sample(&mut self) -> Result<bool, SensorError> {
        self.pin.is_high().map_err(|_| SensorError::BusFault)
    }

    fn write_bit(&mut self, bit: bool) -> Result<(), SensorError> {
        self.drive_low()?;
        if bit {
            self.delay.delay_us(6);
            self.release()?;
            self.delay.delay_us(64);
        } else {
            self.delay.delay_us(60);
            self.release()?;
            self.delay.delay_us(10);
        }
        Ok(())
    }

    fn read_bit(&mut self) -> Result<bool, SensorError> {
        self.drive_low()?;
        self.delay.delay_us(6);
        self.release()?;
        self.delay.delay_us(9);
        let bit = self.sample()?;
        self.delay.delay_us(55);
        Ok(bit)
    }
}

impl<P, D> OneWireTransport for OneWireBus<P, D>
where
    P: InputPin + OutputPin,
    D: DelayNs,
{
    fn reset(&mut self) -> Result<bool, SensorError> {
        self.drive_low()?;
        self.delay.delay_us(480);
        self.release()?;
        self.delay.delay_us(70);
        // Presence = a device holding the line low.
        let present = !self.sample()?;
        self.delay.delay_us(410);
        Ok(present)
    }

    fn write_byte(&mut self, byte: u8) -> Result<(), SensorError> {
        for i in 0..8 {
            self.write_bit((byte >> i) & 1 == 1)?;
        }
        Ok(())
    }

    fn read_byte(&mut self) -> Result<u8, SensorError> {
        let mut byte = 0u8;
        for i in 0..8 {
            if self.read_bit()? {
                byte |= 1 << i;
            }
        }
        Ok(byte)
    }
}
