//! Display task: menu state machine and screen composition.
//!
//! ```text
//!            next                next            next
//!  Overview ─────▶ Temperature ─────▶ Ph ─────▶ Feed ──┐
//!     ▲                                                 │
//!     └─────────────────────── next ────────────────────┘
//!
//!  PH_SCHEDULED, unconfirmed ──▶ ConfirmPh ──confirm──▶ Overview (+ ConfirmPh cmd)
//! ```
//!
//! Confirm on a detail screen forces the matching action (temperature
//! reading, pH measurement, feed).  The task re-renders on every
//! coordinator notification and at least once per second; the panel
//! sleeps after `sleep_after_min` minutes without input and the first
//! input afterwards only wakes it.

use core::fmt::Write as _;
use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::app::commands::{AppCommand, CommandExecutor};
use crate::app::ports::{ClockPort, DisplayPort};
use crate::app::state::{AquariumState, AquariumStore};
use crate::events::{EventCoordinator, EventError, EventFlags, TaskNotifier};

/// Characters per line at the smallest font.
pub const LINE_CHARS: usize = 21;
pub const MAX_LINES: usize = 6;

pub type Line = heapless::String<24>;

const TASK_NAME: &str = "display";
const REFRESH: Duration = Duration::from_secs(1);

const NAV_MASK: EventFlags = EventFlags::DISPLAY_NEXT
    .union(EventFlags::DISPLAY_PREV)
    .union(EventFlags::DISPLAY_CONFIRM);

/// Bits that trigger an immediate redraw.
pub const DISPLAY_MASK: EventFlags = NAV_MASK
    .union(EventFlags::TEMP_UPDATED)
    .union(EventFlags::PH_UPDATED)
    .union(EventFlags::FEED_UPDATED)
    .union(EventFlags::PH_SCHEDULED)
    .union(EventFlags::PASSKEY_DISPLAY);

// ───────────────────────────────────────────────────────────────
// Menu state machine
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Overview,
    Temperature,
    Ph,
    Feed,
    ConfirmPh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavInput {
    Next,
    Prev,
    Confirm,
}

impl Screen {
    const CYCLE: [Screen; 4] = [Screen::Overview, Screen::Temperature, Screen::Ph, Screen::Feed];

    /// Pure transition: new screen plus the command a confirm requests.
    pub fn next(self, input: NavInput) -> (Screen, Option<AppCommand>) {
        if self == Screen::ConfirmPh {
            return match input {
                NavInput::Confirm => (Screen::Overview, Some(AppCommand::ConfirmPh)),
                NavInput::Next | NavInput::Prev => (self, None),
            };
        }
        let pos = Self::CYCLE.iter().position(|s| *s == self).unwrap_or(0);
        let len = Self::CYCLE.len();
        match input {
            NavInput::Next => (Self::CYCLE[(pos + 1) % len], None),
            NavInput::Prev => (Self::CYCLE[(pos + len - 1) % len], None),
            NavInput::Confirm => {
                let cmd = match self {
                    Screen::Temperature => Some(AppCommand::ForceTemp),
                    Screen::Ph => Some(AppCommand::ForcePh),
                    Screen::Feed => Some(AppCommand::ForceFeed),
                    Screen::Overview | Screen::ConfirmPh => None,
                };
                (self, cmd)
            }
        }
    }
}

/// Navigation inputs in a flag set, in processing order.
fn nav_inputs(bits: EventFlags) -> impl Iterator<Item = NavInput> {
    [
        (EventFlags::DISPLAY_PREV, NavInput::Prev),
        (EventFlags::DISPLAY_NEXT, NavInput::Next),
        (EventFlags::DISPLAY_CONFIRM, NavInput::Confirm),
    ]
    .into_iter()
    .filter(move |(flag, _)| bits.contains(*flag))
    .map(|(_, input)| input)
}

// ───────────────────────────────────────────────────────────────
// Screen composition
// ───────────────────────────────────────────────────────────────

/// What the panel should show.  Rendering to pixels is the adapter's job.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenView {
    pub screen: Screen,
    pub lines: heapless::Vec<Line, MAX_LINES>,
    pub contrast: u8,
    /// BLE pairing passkey, shown instead of the menu while set.
    pub passkey: Option<u32>,
}

fn push_line(lines: &mut heapless::Vec<Line, MAX_LINES>, args: core::fmt::Arguments<'_>) {
    let mut line = Line::new();
    // Overlong lines are clipped by the capacity.
    let _ = line.write_fmt(args);
    let _ = lines.push(line);
}

struct Reading(f32, usize);

impl core::fmt::Display for Reading {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.0.is_nan() {
            f.write_str("--")
        } else {
            write!(f, "{:.*}", self.1, self.0)
        }
    }
}

struct ClockTime(u64);

impl core::fmt::Display for ClockTime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.0 == 0 {
            f.write_str("--:--")
        } else {
            let day = self.0 % 86_400;
            write!(f, "{:02}:{:02}", day / 3600, day % 3600 / 60)
        }
    }
}

pub fn compose(screen: Screen, state: &AquariumState, passkey: Option<u32>) -> ScreenView {
    let mut lines = heapless::Vec::new();
    let prefs = &state.display;
    let outcome = if state.last_feed_success { "OK" } else { "FAIL" };

    if let Some(code) = passkey {
        push_line(&mut lines, format_args!("Pairing code"));
        push_line(&mut lines, format_args!("{code:06}"));
    } else {
        match screen {
            Screen::Overview => {
                if prefs.show_temperature {
                    push_line(&mut lines, format_args!("Temp {}C", Reading(state.temperature, 1)));
                }
                if prefs.show_ph {
                    push_line(&mut lines, format_args!("pH   {}", Reading(state.ph, 2)));
                }
                if prefs.show_last_feed {
                    push_line(
                        &mut lines,
                        format_args!("Fed  {} {}", ClockTime(state.last_feed_time), outcome),
                    );
                }
                if prefs.show_next_feed {
                    push_line(&mut lines, format_args!("Next {}", ClockTime(state.next_feed_time)));
                }
            }
            Screen::Temperature => {
                push_line(&mut lines, format_args!("Temperature"));
                push_line(&mut lines, format_args!("{} C", Reading(state.temperature, 2)));
                push_line(
                    &mut lines,
                    format_args!("Range {:.1}-{:.1}", state.temp_lower, state.temp_upper),
                );
                push_line(&mut lines, format_args!("OK: measure now"));
            }
            Screen::Ph => {
                push_line(&mut lines, format_args!("pH"));
                push_line(&mut lines, format_args!("{}", Reading(state.ph, 2)));
                push_line(
                    &mut lines,
                    format_args!("Range {:.1}-{:.1}", state.ph_lower, state.ph_upper),
                );
                push_line(&mut lines, format_args!("OK: measure now"));
            }
            Screen::Feed => {
                push_line(&mut lines, format_args!("Feeding"));
                push_line(
                    &mut lines,
                    format_args!("Last {} {}", ClockTime(state.last_feed_time), outcome),
                );
                push_line(&mut lines, format_args!("Next {}", ClockTime(state.next_feed_time)));
                push_line(&mut lines, format_args!("OK: feed now"));
            }
            Screen::ConfirmPh => {
                push_line(&mut lines, format_args!("pH measurement"));
                push_line(&mut lines, format_args!("Insert probe,"));
                push_line(&mut lines, format_args!("OK to start"));
            }
        }
    }

    ScreenView {
        screen,
        lines,
        contrast: prefs.contrast,
        passkey,
    }
}

// ───────────────────────────────────────────────────────────────
// Task
// ───────────────────────────────────────────────────────────────

pub struct DisplayTask<D: DisplayPort> {
    display: D,
    store: Arc<AquariumStore>,
    events: Arc<EventCoordinator>,
    executor: CommandExecutor,
    clock: Arc<dyn ClockPort>,
    notifier: Arc<TaskNotifier>,
    /// Pairing passkey published by the BLE security callback.
    passkey_source: Option<&'static AtomicU32>,
    screen: Screen,
    last_input_ms: u64,
    asleep: bool,
    contrast: Option<u8>,
}

impl<D: DisplayPort> DisplayTask<D> {
    pub fn new(
        display: D,
        store: Arc<AquariumStore>,
        events: Arc<EventCoordinator>,
        executor: CommandExecutor,
        clock: Arc<dyn ClockPort>,
        passkey_source: Option<&'static AtomicU32>,
    ) -> Result<Self, EventError> {
        let notifier = events.subscribe(TASK_NAME, DISPLAY_MASK)?;
        let last_input_ms = clock.uptime_ms();
        Ok(Self {
            display,
            store,
            events,
            executor,
            clock,
            notifier,
            passkey_source,
            screen: Screen::Overview,
            last_input_ms,
            asleep: false,
            contrast: None,
        })
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn is_asleep(&self) -> bool {
        self.asleep
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    fn wake(&mut self, now_ms: u64) {
        self.last_input_ms = now_ms;
        if self.asleep {
            self.asleep = false;
            self.display.set_power(true);
            info!("Display: awake");
        }
    }

    /// One pass: consume navigation, follow the pH prompt, manage sleep,
    /// render.
    pub fn step(&mut self, now_ms: u64) {
        let nav = self.events.wait(NAV_MASK, true, false, Some(Duration::ZERO));
        if !nav.is_empty() {
            let was_asleep = self.asleep;
            self.wake(now_ms);
            if !was_asleep {
                for input in nav_inputs(nav) {
                    let (screen, cmd) = self.screen.next(input);
                    self.screen = screen;
                    if let Some(cmd) = cmd {
                        if let Err(e) = self.executor.execute(cmd, "display") {
                            warn!("Display: {cmd:?} failed ({e})");
                        }
                    }
                }
            }
        }

        let bits = self.events.get();
        let awaiting_confirm =
            bits.contains(EventFlags::PH_SCHEDULED) && !bits.contains(EventFlags::PH_CONFIRMED);
        if awaiting_confirm {
            if self.screen != Screen::ConfirmPh {
                self.screen = Screen::ConfirmPh;
                self.wake(now_ms);
            }
        } else if self.screen == Screen::ConfirmPh {
            self.screen = Screen::Overview;
        }

        let passkey = if bits.contains(EventFlags::PASSKEY_DISPLAY) {
            self.wake(now_ms);
            self.passkey_source.map(|p| p.load(Ordering::Acquire))
        } else {
            None
        };

        let state = self.store.snapshot();
        let sleep_after_ms = u64::from(state.display.sleep_after_min) * 60_000;
        if !self.asleep
            && sleep_after_ms > 0
            && now_ms.saturating_sub(self.last_input_ms) >= sleep_after_ms
        {
            self.asleep = true;
            self.display.set_power(false);
            info!("Display: sleeping after {} min idle", state.display.sleep_after_min);
        }
        if self.asleep {
            return;
        }

        if self.contrast != Some(state.display.contrast) {
            self.contrast = Some(state.display.contrast);
            self.display.set_contrast(state.display.contrast);
        }
        let view = compose(self.screen, &state, passkey);
        self.display.render(&view);
    }

    /// Task body; never returns.
    pub fn run(mut self) -> ! {
        info!("Display: task started");
        loop {
            self.notifier.wait(REFRESH);
            let now = self.clock.uptime_ms();
            self.step(now);
        }
    }
}
