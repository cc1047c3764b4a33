//! Feeder stepper (28BYJ-48 through a ULN2003 darlington array).
//!
//! Half-step drive over four coil outputs:
//!
//! ```text
//! step  0    1    2    3    4    5    6    7
//! IN1   █    █    ·    ·    ·    ·    ·    █
//! IN2   ·    █    █    █    ·    ·    ·    ·
//! IN3   ·    ·    ·    █    █    █    ·    ·
//! IN4   ·    ·    ·    ·    ·    █    █    █
//! ```
//!
//! Generic over `embedded-hal` pins and delay so the sequence is testable
//! with recording pins on the host.  Coils are always released after a
//! move; the gearbox holds the auger.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use log::debug;

use crate::app::ports::{FeedDirection, FeederPort};
use crate::error::ActuatorError;

/// Coil patterns, bit 3 = IN1 ... bit 0 = IN4.
pub const HALF_STEP_SEQUENCE: [u8; 8] = [
    0b1000, 0b1100, 0b0100, 0b0110, 0b0010, 0b0011, 0b0001, 0b1001,
];

pub struct StepperFeeder<P, D> {
    coils: [P; 4],
    delay: D,
    step_delay_us: u32,
    /// Index into [`HALF_STEP_SEQUENCE`] of the last energised pattern.
    phase: usize,
}

impl<P: OutputPin, D: DelayNs> StepperFeeder<P, D> {
    pub fn new(coils: [P; 4], delay: D, step_delay_us: u32) -> Self {
        let mut feeder = Self {
            coils,
            delay,
            step_delay_us,
            phase: 0,
        };
        feeder.release();
        feeder
    }

    fn energise(&mut self, pattern: u8) -> Result<(), ActuatorError> {
        for (i, coil) in self.coils.iter_mut().enumerate() {
            let on = pattern & (0b1000 >> i) != 0;
            let res = if on { coil.set_high() } else { coil.set_low() };
            res.map_err(|_| ActuatorError::GpioWriteFailed)?;
        }
        Ok(())
    }
}

impl<P: OutputPin, D: DelayNs> FeederPort for StepperFeeder<P, D> {
    fn dispense(&mut self, direction: FeedDirection, steps: u32) -> Result<(), ActuatorError> {
        debug!("Stepper: {steps} half-steps {direction:?}");
        let len = HALF_STEP_SEQUENCE.len();
        let mut result = Ok(());
        for _ in 0..steps {
            self.phase = match direction {
                FeedDirection::Forward => (self.phase + 1) % len,
                FeedDirection::Reverse => (self.phase + len - 1) % len,
            };
            if let Err(e) = self.energise(HALF_STEP_SEQUENCE[self.phase]) {
                result = Err(e);
                break;
            }
            self.delay.delay_us(self.step_delay_us);
        }
        self.release();
        result
    }

    fn release(&mut self) {
        for coil in &mut self.coils {
            // Best effort; a stuck coil is reported by the next move.
            let _ = coil.set_low();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Trace = Rc<RefCell<Vec<u8>>>;

    /// Pin that records its level into a shared 4-bit pattern.
    struct BitPin {
        bit: u8,
        state: Rc<RefCell<u8>>,
    }

    impl embedded_hal::digital::ErrorType for BitPin {
        type Error = Infallible;
    }

    impl OutputPin for BitPin {
        fn set_low(&mut self) -> Result<(), Infallible> {
            *self.state.borrow_mut() &= !self.bit;
            Ok(())
        }
        fn set_high(&mut self) -> Result<(), Infallible> {
            *self.state.borrow_mut() |= self.bit;
            Ok(())
        }
    }

    /// Delay that snapshots the coil pattern on every step.
    struct SnapshotDelay {
        state: Rc<RefCell<u8>>,
        trace: Trace,
    }

    impl DelayNs for SnapshotDelay {
        fn delay_ns(&mut self, _ns: u32) {
            self.trace.borrow_mut().push(*self.state.borrow());
        }
    }

    fn feeder() -> (StepperFeeder<BitPin, SnapshotDelay>, Rc<RefCell<u8>>, Trace) {
        let state = Rc::new(RefCell::new(0u8));
        let trace: Trace = Rc::new(RefCell::new(Vec::new()));
        let coils = [0b1000, 0b0100, 0b0010, 0b0001].map(|bit| BitPin {
            bit,
            state: Rc::clone(&state),
        });
        let delay = SnapshotDelay {
            state: Rc::clone(&state),
            trace: Rc::clone(&trace),
        };
        (StepperFeeder::new(coils, delay, 2000), state, trace)
    }

    #[test]
    fn forward_walks_the_half_step_table() {
        let (mut f, state, trace) = feeder();
        f.dispense(FeedDirection::Forward, 8).unwrap();
        let t = trace.borrow();
        assert_eq!(t.len(), 8);
        assert_eq!(&t[..3], &[0b1100, 0b0100, 0b0110]);
        assert_eq!(t[7], 0b1000);
        assert_eq!(*state.borrow(), 0, "coils released after move");
    }

    #[test]
    fn reverse_walks_backwards() {
        let (mut f, _, trace) = feeder();
        f.dispense(FeedDirection::Reverse, 3).unwrap();
        assert_eq!(*trace.borrow(), vec![0b1001, 0b0001, 0b0011]);
    }

    #[test]
    fn zero_steps_is_a_no_op() {
        let (mut f, _, trace) = feeder();
        f.dispense(FeedDirection::Forward, 0).unwrap();
        assert!(trace.borrow().is_empty());
    }
}
