//! Aquatest firmware entry point.
//!
//! Hexagonal architecture with one thread per cooperating task.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  Ds18b20/AnalogPh  StepperFeeder  BeamSensor   NvsAdapter      │
//! │  (probes)          (FeederPort)   (BeamPort)   (StoragePort)   │
//! │  WifiAdapter       MqttAdapter    BleAdapter   SystemClock     │
//! │  (NetworkPort)     (BrokerPort)   (GATT)       (ClockPort)     │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │        EventCoordinator + AquariumStore (AppContext)   │    │
//! │  │  measurement · feeding · publish · schedule · display  │    │
//! │  │  buttons · config · cloud inbound                      │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use esp_idf_hal::delay::Delay;
use esp_idf_hal::gpio::{AnyIOPin, AnyOutputPin, PinDriver};
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::sntp::EspSntp;
use log::{error, info, warn};

use aquatest::adapters::ble::{self, BleAdapter, GattRouter};
use aquatest::adapters::cert_store::CredentialStore;
use aquatest::adapters::device_id;
use aquatest::adapters::display::LogDisplay;
use aquatest::adapters::log_sink::{FanoutSink, LogEventSink};
use aquatest::adapters::mqtt::MqttAdapter;
use aquatest::adapters::nvs::NvsAdapter;
use aquatest::adapters::time::SystemClock;
use aquatest::adapters::wifi::WifiAdapter;
use aquatest::app::context::AppContext;
use aquatest::app::events::AppEvent;
use aquatest::app::ports::{ClockPort, ConfigPort, EventSink, StoragePort};
use aquatest::cloud::channels;
use aquatest::cloud::log_buffer::CloudLogBuffer;
use aquatest::cloud::shadow::ShadowReconciler;
use aquatest::cloud::topics::TopicSet;
use aquatest::config::DeviceConfig;
use aquatest::display::DisplayTask;
use aquatest::error::Error;
use aquatest::drivers::beam::BeamSensor;
use aquatest::drivers::button::{self, ButtonPanel};
use aquatest::drivers::onewire::OneWireBus;
use aquatest::drivers::stepper::StepperFeeder;
use aquatest::drivers::hw_init;
use aquatest::events::EventFlags;
use aquatest::firmware;
use aquatest::fsm::feeding::FeedingController;
use aquatest::fsm::publish::PublishCoordinator;
use aquatest::measurement::MeasurementService;
use aquatest::pins;
use aquatest::provisioning::ProvisioningService;
use aquatest::scheduler::{FlagDelegate, ScheduleTask};
use aquatest::sensors::ph::{Adc1Channel, AnalogPhProbe, PhCalibration};
use aquatest::sensors::temperature::Ds18b20;

const BUTTON_POLL: Duration = Duration::from_millis(button::POLL_INTERVAL_MS as u64);

fn spawn(name: &str, stack: usize, f: impl FnOnce() + Send + 'static) {
    if let Err(e) = std::thread::Builder::new()
        .name(name.into())
        .stack_size(stack)
        .spawn(f)
    {
        error!("Main: task '{name}' failed to start: {e}");
    }
}

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  Aquatest v{}                      ║", firmware::RUNNING_VERSION);
    info!("╚══════════════════════════════════════╝");

    // ── 2. Peripherals ────────────────────────────────────────
    if let Err(e) = hw_init::init_peripherals() {
        error!("Main: {e} (sensors and buttons unavailable)");
    }
    if let Err(e) = hw_init::init_isr_service() {
        error!("Main: {e} (interrupts unavailable), continuing");
    }
    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    // ── 3. Storage, config, firmware confirmation ─────────────
    let nvs = Arc::new(NvsAdapter::new().map_err(Error::from)?);
    let config = match nvs.load().map_err(Error::from) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("Main: {e}, using defaults");
            DeviceConfig::default()
        }
    };
    let storage: Arc<dyn StoragePort> = nvs;
    if let Err(e) = firmware::confirm_boot(storage.as_ref(), firmware::RUNNING_VERSION) {
        warn!("Main: firmware bookkeeping failed ({e})");
    }

    // ── 4. Shared context ─────────────────────────────────────
    let mac = device_id::read_mac();
    let dev_id = device_id::device_id(&mac);
    info!("Device ID: {}", dev_id);

    let clock: Arc<dyn ClockPort> = Arc::new(SystemClock::new());
    let logs = Arc::new(CloudLogBuffer::new(Arc::clone(&clock)));
    let base_sink: Arc<dyn EventSink> = Arc::new(
        FanoutSink::new()
            .with(Arc::new(LogEventSink::new()))
            .with(logs.clone()),
    );
    let ctx = AppContext::new(Arc::clone(&storage), clock, Arc::clone(&base_sink), config);

    // ── 5. Local wireless ─────────────────────────────────────
    let provisioning = Arc::new(ProvisioningService::new(
        CredentialStore::new(Arc::clone(&storage)),
        Arc::clone(&ctx.events),
        Arc::clone(&base_sink),
    ));
    let router = Arc::new(GattRouter::new(
        provisioning,
        ctx.executor(),
        Arc::clone(&ctx.store),
        firmware::RUNNING_VERSION,
    ));
    let ble = Arc::new(BleAdapter::new(
        router,
        Arc::clone(&ctx.events),
        device_id::ble_name(&mac),
    ));
    // BLE mirrors readings into its telemetry characteristics.
    let ctx = AppContext {
        sink: Arc::new(FanoutSink::new().with(base_sink).with(ble.clone())),
        ..ctx
    };
    ctx.sink.emit(&AppEvent::Started {
        version: firmware::RUNNING_VERSION,
    });

    // ── 6. Cloud link ─────────────────────────────────────────
    let wifi = WifiAdapter::new(
        peripherals.modem,
        sysloop,
        nvs_partition,
        Arc::clone(&ctx.events),
    )
    .map_err(|e| anyhow::anyhow!("WiFi init: {e}"))?;
    let _sntp = EspSntp::new_default()?;
    let broker = Arc::new(MqttAdapter::new(
        Arc::clone(&ctx.events),
        Arc::clone(&ctx.sink),
        TopicSet::new(&dev_id, None),
        ctx.config.cloud.max_document_len as usize,
    ));

    // ── 7. Drivers ────────────────────────────────────────────
    // SAFETY: the pin numbers come from the board map and each is claimed once.
    let coil = |gpio| unsafe { AnyOutputPin::new(gpio) };
    let coils = [
        PinDriver::output(coil(pins::MOTOR_IN1))?,
        PinDriver::output(coil(pins::MOTOR_IN2))?,
        PinDriver::output(coil(pins::MOTOR_IN3))?,
        PinDriver::output(coil(pins::MOTOR_IN4))?,
    ];
    let feeder = StepperFeeder::new(coils, Delay::new_default(), ctx.config.feed.step_delay_us);
    let beam = Arc::new(BeamSensor::new(Duration::from_millis(u64::from(
        ctx.config.feed.watcher_poll_ms,
    ))));

    // SAFETY: as above.
    let onewire_pin = PinDriver::input_output_od(unsafe { AnyIOPin::new(pins::ONEWIRE_GPIO) })?;
    let bus = OneWireBus::new(onewire_pin, Delay::new_default())
        .map_err(|e| anyhow::anyhow!("1-Wire init: {e}"))?;
    let temp_probe = Ds18b20::new(bus, Delay::new_default());
    let ph_power = PinDriver::output(coil(pins::PH_POWER_GPIO))?;
    let ph_probe = AnalogPhProbe::new(
        Adc1Channel::new(pins::PH_ADC_CHANNEL),
        ph_power,
        PhCalibration::default(),
    );

    // ── 8. Tasks ──────────────────────────────────────────────
    let measurement = MeasurementService::new(temp_probe, ph_probe, ctx.clone());
    spawn("measurement", 8 * 1024, move || measurement.run());

    let feeding = FeedingController::new(feeder, beam, ctx.clone());
    spawn("feeding", 8 * 1024, move || feeding.run());

    let publish = PublishCoordinator::new(wifi, Arc::clone(&broker), logs, &dev_id, ctx.clone());
    spawn("publish", 12 * 1024, move || publish.run());

    let schedule = ScheduleTask::new(
        FlagDelegate::new(Arc::clone(&ctx.events)),
        Arc::clone(&ctx.store),
        Arc::clone(&ctx.events),
        Arc::clone(&ctx.clock),
    );
    spawn("schedule", 4 * 1024, move || schedule.run());

    match DisplayTask::new(
        LogDisplay::new(),
        Arc::clone(&ctx.store),
        Arc::clone(&ctx.events),
        ctx.executor(),
        Arc::clone(&ctx.clock),
        Some(&ble::PASSKEY),
    ) {
        Ok(display) => spawn("display", 6 * 1024, move || display.run()),
        Err(e) => error!("Display: not started ({e})"),
    }

    {
        let events = Arc::clone(&ctx.events);
        let clock = Arc::clone(&ctx.clock);
        spawn("buttons", 4 * 1024, move || {
            let mut panel = ButtonPanel::new();
            loop {
                let raised = panel.poll(clock.uptime_ms() as u32, button::is_pressed_hw);
                if !raised.is_empty() {
                    events.set(raised);
                }
                std::thread::sleep(BUTTON_POLL);
            }
        });
    }

    {
        let reconciler = ShadowReconciler::new(
            ctx.executor(),
            Arc::clone(&broker),
            TopicSet::new(&dev_id, None),
            Arc::clone(&ctx.events),
        );
        let sink = Arc::clone(&ctx.sink);
        spawn("cloud-inbound", 12 * 1024, move || loop {
            let doc = channels::next_document();
            match reconciler.handle(&doc) {
                Ok(true) => sink.emit(&AppEvent::SettingsChanged { source: "cloud" }),
                Ok(false) => {}
                Err(e) => warn!("Cloud: document on '{}' rejected ({e})", doc.topic),
            }
        });
    }

    // ── 9. Configuration-button loop (main thread) ────────────
    info!("System ready.");
    let credentials = CredentialStore::new(Arc::clone(&storage));
    loop {
        let observed = ctx.events.wait(
            EventFlags::CONFIG_BUTTON | EventFlags::WIFI_CLEARED,
            true,
            false,
            None,
        );
        if observed.contains(EventFlags::CONFIG_BUTTON) {
            ble.toggle();
        }
        if observed.contains(EventFlags::WIFI_CLEARED) {
            match credentials.clear_wifi() {
                Ok(()) => {
                    info!("WiFi: credentials cleared");
                    ctx.events.set(EventFlags::PROVISION_TRIGGER);
                }
                Err(e) => warn!("WiFi: clearing credentials failed ({e})"),
            }
        }
    }
}
