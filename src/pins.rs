//! GPIO / peripheral pin assignments for the aquarium controller board
//! (ESP32-WROOM-32).
//!
//! Single source of truth: every driver references this module rather than
//! hard-coding pin numbers.
//!
//! The feeder motor coils moved off GPIO 15 so the feed button keeps its
//! pin; GPIO 34–39 are input-only and unused here.

// ---------------------------------------------------------------------------
// Buttons (active-low, internal pull-up)
// ---------------------------------------------------------------------------

/// Short press toggles the BLE provisioning window; a long press forgets
/// the stored WiFi credentials.
pub const CONFIG_BUTTON_GPIO: i32 = 13;
/// Feed now.
pub const FEED_BUTTON_GPIO: i32 = 15;
/// Display navigation.
pub const PREV_BUTTON_GPIO: i32 = 25;
pub const NEXT_BUTTON_GPIO: i32 = 26;
/// Confirms the selected screen; a long press feeds.
pub const CONFIRM_BUTTON_GPIO: i32 = 14;

// ---------------------------------------------------------------------------
// Feeder (28BYJ-48 stepper via ULN2003)
// ---------------------------------------------------------------------------

pub const MOTOR_IN1_GPIO: i32 = 16;
pub const MOTOR_IN2_GPIO: i32 = 17;
pub const MOTOR_IN3_GPIO: i32 = 18;
pub const MOTOR_IN4_GPIO: i32 = 19;

/// IR break-beam receiver below the chute.  LOW = beam broken.
pub const BEAM_GPIO: i32 = 5;

// ---------------------------------------------------------------------------
// Sensors
// ---------------------------------------------------------------------------

/// DS18B20 data line (external 4.7 kΩ pull-up).
pub const ONEWIRE_GPIO: i32 = 4;

/// pH front-end analog output.  ADC1 channel 4 on the classic ESP32.
pub const PH_ADC_GPIO: i32 = 32;
pub const PH_ADC_CHANNEL: u32 = 4;
/// High-side switch for the pH front-end supply (active HIGH).
pub const PH_POWER_GPIO: i32 = 33;

/// Resistor divider between the pH board output and the ADC pin
/// (sensor volts = ADC volts × ratio).  1.0 = wired straight through.
pub const PH_DIVIDER_RATIO: f32 = 1.0;

// ---------------------------------------------------------------------------
// I²C bus (SSD1306 OLED)
// ---------------------------------------------------------------------------

pub const I2C_SDA_GPIO: i32 = 21;
pub const I2C_SCL_GPIO: i32 = 22;
pub const OLED_I2C_ADDR: u8 = 0x3C;
