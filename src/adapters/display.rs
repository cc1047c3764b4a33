//! Serial-log display adapter.
//!
//! Implements [`DisplayPort`] by logging each distinct frame.  Used in the
//! simulation build and on boards without a panel; unchanged frames are
//! not repeated, so the once-per-second refresh does not flood the log.

use log::info;

use crate::app::ports::DisplayPort;
use crate::display::ScreenView;

#[derive(Debug, Default)]
pub struct LogDisplay {
    last: Option<ScreenView>,
    powered: bool,
    contrast: u8,
    frames: u32,
}

impl LogDisplay {
    pub fn new() -> Self {
        Self {
            powered: true,
            ..Self::default()
        }
    }

    pub fn last_frame(&self) -> Option<&ScreenView> {
        self.last.as_ref()
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    pub fn contrast(&self) -> u8 {
        self.contrast
    }

    /// Distinct frames logged so far.
    pub fn frames(&self) -> u32 {
        self.frames
    }
}

impl DisplayPort for LogDisplay {
    fn render(&mut self, view: &ScreenView) {
        if self.last.as_ref() == Some(view) {
            return;
        }
        self.frames = self.frames.wrapping_add(1);
        let mut text = String::new();
        for (i, line) in view.lines.iter().enumerate() {
            if i > 0 {
                text.push_str(" | ");
            }
            text.push_str(line);
        }
        info!("Display: [{:?}] {}", view.screen, text);
        self.last = Some(view.clone());
    }

    fn set_power(&mut self, on: bool) {
        self.powered = on;
        if !on {
            // Force a redraw after wake.
            self.last = None;
        }
        info!("Display: panel {}", if on { "on" } else { "off" });
    }

    fn set_contrast(&mut self, contrast: u8) {
        self.contrast = contrast;
        info!("Display: contrast {contrast}");
    }
}
