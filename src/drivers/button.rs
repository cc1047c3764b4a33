//! ISR-debounced front-panel buttons with short, long, and double press
//! detection.
//!
//! ## Hardware
//!
//! Five active-low momentary switches with pull-ups. Each GPIO fires on
//! falling edge; the ISR records the raw timestamp into that button's
//! atomic slot, and [`ButtonPanel::poll`] (called every 10 ms from the
//! input task) runs the debounce + gesture state machine per button.
//!
//! ## Gesture detection
//!
//! | Gesture      | Condition                                  |
//! |--------------|--------------------------------------------|
//! | Short press  | Released before 3 s, no second press < 300 ms |
//! | Long press   | Held >= 3 s                                |
//! | Double press | Two presses within a 300 ms gap            |
//!
//! ## Mapping
//!
//! | Button  | Short             | Long             | Double          |
//! |---------|-------------------|------------------|-----------------|
//! | config  | `CONFIG_BUTTON`   | `WIFI_CLEARED`   | -               |
//! | feed    | `FEED_SCHEDULED`  | -                | -               |
//! | prev    | `DISPLAY_PREV`    | -                | `DISPLAY_PREV`  |
//! | next    | `DISPLAY_NEXT`    | -                | `DISPLAY_NEXT`  |
//! | confirm | `DISPLAY_CONFIRM` | `FEED_SCHEDULED` | -               |

use core::sync::atomic::{AtomicU32, Ordering};

use crate::events::EventFlags;
use crate::pins;

const DEBOUNCE_MS: u32 = 50;
const LONG_PRESS_MS: u32 = 3000;
const DOUBLE_PRESS_WINDOW_MS: u32 = 300;

/// Poll period of the input task.
pub const POLL_INTERVAL_MS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Config,
    Feed,
    Prev,
    Next,
    Confirm,
}

impl Button {
    pub const ALL: [Button; 5] = [
        Button::Config,
        Button::Feed,
        Button::Prev,
        Button::Next,
        Button::Confirm,
    ];

    pub const fn gpio(self) -> i32 {
        match self {
            Self::Config => pins::CONFIG_BUTTON_GPIO,
            Self::Feed => pins::FEED_BUTTON_GPIO,
            Self::Prev => pins::PREV_BUTTON_GPIO,
            Self::Next => pins::NEXT_BUTTON_GPIO,
            Self::Confirm => pins::CONFIRM_BUTTON_GPIO,
        }
    }

    const fn index(self) -> usize {
        self as usize
    }

    /// Coordinator flags raised for `event` on this button.
    pub fn flags_for(self, event: ButtonEvent) -> EventFlags {
        match (self, event) {
            (Self::Config, ButtonEvent::ShortPress) => EventFlags::CONFIG_BUTTON,
            (Self::Config, ButtonEvent::LongPress) => EventFlags::WIFI_CLEARED,
            (Self::Feed, ButtonEvent::ShortPress) => EventFlags::FEED_SCHEDULED,
            (Self::Prev, ButtonEvent::ShortPress | ButtonEvent::DoublePress) => {
                EventFlags::DISPLAY_PREV
            }
            (Self::Next, ButtonEvent::ShortPress | ButtonEvent::DoublePress) => {
                EventFlags::DISPLAY_NEXT
            }
            (Self::Confirm, ButtonEvent::ShortPress) => EventFlags::DISPLAY_CONFIRM,
            (Self::Confirm, ButtonEvent::LongPress) => EventFlags::FEED_SCHEDULED,
            _ => EventFlags::NONE,
        }
    }
}

/// Raw ISR timestamps (milliseconds since boot, truncated to u32), one
/// slot per [`Button`].  Written by the ISR, read by the input task.
static BUTTON_ISR_TIMESTAMPS: [AtomicU32; 5] = [
    AtomicU32::new(0),
    AtomicU32::new(0),
    AtomicU32::new(0),
    AtomicU32::new(0),
    AtomicU32::new(0),
];

/// Button events emitted after gesture classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    ShortPress,
    LongPress,
    DoublePress,
}

/// Internal state machine for gesture detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GestureState {
    Idle,
    DebounceWait { since_ms: u32 },
    Pressed { since_ms: u32 },
    /// Long press already reported; wait for the release.
    Held,
    WaitSecondPress { first_release_ms: u32 },
}

pub struct ButtonDriver {
    button: Button,
    source: &'static AtomicU32,
    state: GestureState,
    last_isr_ms: u32,
}

impl ButtonDriver {
    pub fn new(button: Button) -> Self {
        Self::with_source(button, &BUTTON_ISR_TIMESTAMPS[button.index()])
    }

    /// Driver fed from a caller-owned timestamp slot.
    pub fn with_source(button: Button, source: &'static AtomicU32) -> Self {
        Self {
            button,
            source,
            state: GestureState::Idle,
            last_isr_ms: 0,
        }
    }

    pub fn button(&self) -> Button {
        self.button
    }

    /// Call at each poll tick.  `now_ms` is the current monotonic time in
    /// milliseconds, `pressed` the current (active-low decoded) level.
    pub fn tick(&mut self, now_ms: u32, pressed: bool) -> Option<ButtonEvent> {
        let isr_ms = self.source.load(Ordering::Acquire);
        let new_press = isr_ms != self.last_isr_ms && isr_ms != 0;

        match self.state {
            GestureState::Idle => {
                if new_press {
                    self.last_isr_ms = isr_ms;
                    self.state = GestureState::DebounceWait { since_ms: now_ms };
                }
                None
            }

            GestureState::DebounceWait { since_ms } => {
                if now_ms.wrapping_sub(since_ms) >= DEBOUNCE_MS {
                    // A bounce that has already let go is noise.
                    self.state = if pressed {
                        GestureState::Pressed { since_ms }
                    } else {
                        GestureState::Idle
                    };
                }
                None
            }

            GestureState::Pressed { since_ms } => {
                let held_ms = now_ms.wrapping_sub(since_ms);

                if pressed && held_ms >= LONG_PRESS_MS {
                    self.state = GestureState::Held;
                    return Some(ButtonEvent::LongPress);
                }

                if !pressed {
                    self.last_isr_ms = isr_ms;
                    self.state = GestureState::WaitSecondPress {
                        first_release_ms: now_ms,
                    };
                }

                None
            }

            GestureState::Held => {
                if !pressed {
                    self.last_isr_ms = isr_ms;
                    self.state = GestureState::Idle;
                }
                None
            }

            GestureState::WaitSecondPress { first_release_ms } => {
                let gap = now_ms.wrapping_sub(first_release_ms);

                if new_press {
                    self.last_isr_ms = isr_ms;
                    if gap <= DOUBLE_PRESS_WINDOW_MS {
                        self.state = GestureState::Idle;
                        return Some(ButtonEvent::DoublePress);
                    }
                }

                if gap > DOUBLE_PRESS_WINDOW_MS {
                    self.state = GestureState::Idle;
                    return Some(ButtonEvent::ShortPress);
                }

                None
            }
        }
    }
}

/// ISR handler: register this on each button GPIO falling edge.
/// Safe to call from interrupt context (lock-free atomic store).
pub fn button_isr_handler(button: Button, now_ms: u32) {
    // 0 marks "never pressed".
    BUTTON_ISR_TIMESTAMPS[button.index()].store(now_ms.max(1), Ordering::Release);
}

// ───────────────────────────────────────────────────────────────
// Panel
// ───────────────────────────────────────────────────────────────

/// All front-panel buttons, polled together.
pub struct ButtonPanel {
    drivers: [ButtonDriver; 5],
}

impl Default for ButtonPanel {
    fn default() -> Self {
        Self::new()
    }
}

impl ButtonPanel {
    pub fn new() -> Self {
        Self {
            drivers: Button::ALL.map(ButtonDriver::new),
        }
    }

    pub fn from_drivers(drivers: [ButtonDriver; 5]) -> Self {
        Self { drivers }
    }

    /// Run every gesture machine once.  `is_pressed` reports the current
    /// level of a button.  Returns the union of the mapped flags.
    pub fn poll(&mut self, now_ms: u32, is_pressed: impl Fn(Button) -> bool) -> EventFlags {
        let mut raised = EventFlags::NONE;
        for driver in &mut self.drivers {
            let button = driver.button();
            if let Some(event) = driver.tick(now_ms, is_pressed(button)) {
                log::debug!("Button: {button:?} {event:?}");
                raised |= button.flags_for(event);
            }
        }
        raised
    }
}

/// Current level of `button` (`true` = held down).
#[cfg(target_os = "espidf")]
pub fn is_pressed_hw(button: Button) -> bool {
    !crate::drivers::hw_init::gpio_read(button.gpio())
}

#[cfg(not(target_os = "espidf"))]
pub fn is_pressed_hw(_button: Button) -> bool {
    false
}
