//! One-shot hardware peripheral initialization.
//!
//! Configures the ADC1 oneshot unit (pH front-end), the button and beam
//! input GPIOs, and the GPIO ISR service using raw ESP-IDF sys calls.
//! Called once from `main()` before the tasks start.  Output pins (feeder
//! coils, pH supply, 1-Wire line) are owned by `esp-idf-hal` pin drivers
//! built in `main`.

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

use crate::error::{self, SensorError};

// ── Error type ────────────────────────────────────────────────

/// Boot-time peripheral setup failures.  Each carries the ESP-IDF return
/// code; GPIO variants also name the pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwInitError {
    Adc { rc: i32 },
    InputPin { gpio: i32, rc: i32 },
    IsrService { rc: i32 },
    IsrHandler { gpio: i32, rc: i32 },
}

impl core::fmt::Display for HwInitError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match *self {
            Self::Adc { rc } => write!(f, "pH ADC setup failed (rc={rc})"),
            Self::InputPin { gpio, rc } => write!(f, "input GPIO{gpio} setup failed (rc={rc})"),
            Self::IsrService { rc } => write!(f, "GPIO ISR service unavailable (rc={rc})"),
            Self::IsrHandler { gpio, rc } => {
                write!(f, "GPIO{gpio} interrupt hook failed (rc={rc})")
            }
        }
    }
}

#[cfg(target_os = "espidf")]
use log::info;

#[cfg(target_os = "espidf")]
use crate::pins;

/// Bring up the pH ADC and the button/beam inputs.
#[cfg(target_os = "espidf")]
pub fn init_peripherals() -> error::Result<()> {
    // SAFETY: main() calls this once, before the tasks exist.
    unsafe { init_adc()? };
    init_inputs()?;
    info!("HwInit: pH ADC and {} inputs ready", Button::ALL.len() + 1);
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn init_peripherals() -> error::Result<()> {
    log::info!("HwInit(sim): no peripherals to configure");
    Ok(())
}

// ── ADC (oneshot) ─────────────────────────────────────────────

#[cfg(target_os = "espidf")]
static mut ADC1_HANDLE: adc_oneshot_unit_handle_t = core::ptr::null_mut();

/// SAFETY: `ADC1_HANDLE` is written once by `init_adc()` before any task
/// starts; afterwards it is only read.  Only the measurement task samples
/// the ADC.
#[cfg(target_os = "espidf")]
unsafe fn adc1_handle() -> adc_oneshot_unit_handle_t {
    unsafe { ADC1_HANDLE }
}

#[cfg(target_os = "espidf")]
fn esp_check(rc: i32, err: impl FnOnce(i32) -> HwInitError) -> Result<(), HwInitError> {
    if rc == ESP_OK as i32 { Ok(()) } else { Err(err(rc)) }
}

/// The pH divider output sits below 3.1 V, so 12 dB attenuation covers it.
#[cfg(target_os = "espidf")]
unsafe fn init_adc() -> Result<(), HwInitError> {
    let unit = adc_oneshot_unit_init_cfg_t {
        unit_id: adc_unit_t_ADC_UNIT_1,
        ulp_mode: adc_ulp_mode_t_ADC_ULP_MODE_DISABLE,
        ..Default::default()
    };
    // SAFETY: ADC1_HANDLE is only written here, once at boot.
    let rc = unsafe { adc_oneshot_new_unit(&unit, &raw mut ADC1_HANDLE) };
    esp_check(rc, |rc| HwInitError::Adc { rc })?;

    let ph_channel = adc_oneshot_chan_cfg_t {
        atten: adc_atten_t_ADC_ATTEN_DB_12,
        bitwidth: adc_bitwidth_t_ADC_BITWIDTH_12,
    };
    let rc = unsafe { adc_oneshot_config_channel(adc1_handle(), pins::PH_ADC_CHANNEL, &ph_channel) };
    esp_check(rc, |rc| HwInitError::Adc { rc })?;

    info!("HwInit: pH on ADC1 CH{}", pins::PH_ADC_CHANNEL);
    Ok(())
}

#[cfg(target_os = "espidf")]
pub fn adc1_read(channel: u32) -> Result<u16, SensorError> {
    let mut raw: i32 = 0;
    // SAFETY: adc1_handle() contract; single reader task.
    let ret = unsafe { adc_oneshot_read(adc1_handle(), channel, &mut raw) };
    if ret != ESP_OK as i32 {
        return Err(SensorError::AdcReadFailed);
    }
    Ok(raw.max(0) as u16)
}

#[cfg(not(target_os = "espidf"))]
pub fn adc1_read(_channel: u32) -> Result<u16, SensorError> {
    Err(SensorError::AdcReadFailed)
}

// ── GPIO Inputs ───────────────────────────────────────────────

/// Buttons pull the line low and interrupt on the falling edge; the beam
/// receiver drives its output and interrupts on both edges.
#[cfg(target_os = "espidf")]
fn configure_input(gpio: i32, pull_up: bool, edge: gpio_int_type_t) -> Result<(), HwInitError> {
    let cfg = gpio_config_t {
        pin_bit_mask: 1u64 << gpio,
        mode: gpio_mode_t_GPIO_MODE_INPUT,
        pull_up_en: if pull_up {
            gpio_pullup_t_GPIO_PULLUP_ENABLE
        } else {
            gpio_pullup_t_GPIO_PULLUP_DISABLE
        },
        pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
        intr_type: edge,
    };
    // SAFETY: plain register configuration of a pin no driver owns.
    let rc = unsafe { gpio_config(&cfg) };
    esp_check(rc, |rc| HwInitError::InputPin { gpio, rc })
}

#[cfg(target_os = "espidf")]
fn init_inputs() -> Result<(), HwInitError> {
    for button in Button::ALL {
        configure_input(button.gpio(), true, gpio_int_type_t_GPIO_INTR_NEGEDGE)?;
    }
    configure_input(pins::BEAM_GPIO, false, gpio_int_type_t_GPIO_INTR_ANYEDGE)
}

#[cfg(target_os = "espidf")]
pub fn gpio_read(pin: i32) -> bool {
    // SAFETY: gpio_get_level is a read-only register access on an
    // already-configured input pin.
    (unsafe { gpio_get_level(pin) }) != 0
}

#[cfg(not(target_os = "espidf"))]
pub fn gpio_read(_pin: i32) -> bool {
    true
}

// ── GPIO ISR Service ──────────────────────────────────────────

#[cfg(target_os = "espidf")]
use crate::drivers::beam::beam_isr_handler;
#[cfg(target_os = "espidf")]
use crate::drivers::button::{Button, button_isr_handler};

#[cfg(target_os = "espidf")]
unsafe extern "C" fn button_gpio_isr(arg: *mut core::ffi::c_void) {
    // The registration below passes the button index as the argument.
    let Some(&button) = Button::ALL.get(arg as usize) else {
        return;
    };
    // SAFETY: esp_timer_get_time is a RTC counter read; safe in ISR context.
    let now_ms = (unsafe { esp_timer_get_time() } / 1_000) as u32;
    button_isr_handler(button, now_ms);
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn beam_gpio_isr(_arg: *mut core::ffi::c_void) {
    // SAFETY: gpio_get_level is a register read; safe in ISR context.
    let level = unsafe { gpio_get_level(pins::BEAM_GPIO) } != 0;
    beam_isr_handler(level);
}

#[cfg(target_os = "espidf")]
fn hook(
    gpio: i32,
    handler: unsafe extern "C" fn(*mut core::ffi::c_void),
    arg: *mut core::ffi::c_void,
) -> Result<(), HwInitError> {
    // SAFETY: the handlers only touch lock-free atomics.
    let rc = unsafe { gpio_isr_handler_add(gpio, Some(handler), arg) };
    esp_check(rc, |rc| HwInitError::IsrHandler { gpio, rc })?;
    unsafe { gpio_intr_enable(gpio) };
    Ok(())
}

/// Install the per-pin ISR service and hook the button and beam pins.
/// Call after [`init_peripherals`] and before the tasks start.
#[cfg(target_os = "espidf")]
pub fn init_isr_service() -> error::Result<()> {
    // ESP_ERR_INVALID_STATE: already installed by another component.
    let rc = unsafe { gpio_install_isr_service(0) };
    if rc != ESP_OK && rc != ESP_ERR_INVALID_STATE {
        return Err(HwInitError::IsrService { rc }.into());
    }

    for (index, button) in Button::ALL.iter().enumerate() {
        hook(button.gpio(), button_gpio_isr, index as *mut core::ffi::c_void)?;
    }
    hook(pins::BEAM_GPIO, beam_gpio_isr, core::ptr::null_mut())?;

    info!("HwInit: interrupts armed (buttons×{}, beam)", Button::ALL.len());
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn init_isr_service() -> error::Result<()> {
    log::info!("HwInit(sim): no interrupts to arm");
    Ok(())
}
