/*
 *  display/drivers/mock.rs
 *
 *  inkd - pictures over pub/sub
 *
 *  Mock panel driver for testing and for running without hardware
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::debug;

use crate::display::error::DisplayError;
use crate::display::palette::Frame;
use crate::display::traits::{DisplayDriver, PanelSpec, validate_saturation};

/// Mock panel driver.
///
/// Simulates a panel without requiring hardware. Useful for unit and
/// integration tests, CI pipelines, and running the agent on machines
/// without the panel attached. Validates frame dimensions exactly like
/// the real driver, records all operations, and optionally persists the
/// last frame to a PPM file for visual inspection.
pub struct MockDriver {
    spec: PanelSpec,
    saturation: f32,
    sink: Option<PathBuf>,
    state: Arc<Mutex<MockState>>,
}

/// Internal state of the mock driver (shared for inspection in tests).
#[derive(Debug, Default)]
pub struct MockState {
    /// Number of times show() was called (including failed attempts).
    pub show_count: usize,

    /// Number of times clear() was called (including failed attempts).
    pub clear_count: usize,

    /// The last frame that was shown; None after a clear.
    pub last_frame: Option<Frame>,

    /// Simulate transient bus failures (for retry testing).
    pub simulate_show_failure: bool,
    pub simulate_clear_failure: bool,
}

impl MockDriver {
    pub fn new(width: u32, height: u32, sink: Option<PathBuf>) -> Self {
        Self {
            spec: PanelSpec {
                width,
                height,
                model: "mock",
            },
            saturation: 0.5,
            sink,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Handle to the shared state for inspection in tests.
    pub fn state(&self) -> Arc<Mutex<MockState>> {
        Arc::clone(&self.state)
    }

    fn check_dimensions(&self, frame: &Frame) -> Result<(), DisplayError> {
        if frame.dimensions() != (self.spec.width, self.spec.height) {
            return Err(DisplayError::FrameSize {
                expected_w: self.spec.width,
                expected_h: self.spec.height,
                actual_w: frame.width(),
                actual_h: frame.height(),
            });
        }
        Ok(())
    }

    fn write_ppm(path: &Path, frame: &Frame) -> std::io::Result<()> {
        let mut file = File::create(path)?;
        writeln!(file, "P3")?;
        writeln!(file, "{} {}", frame.width(), frame.height())?;
        writeln!(file, "255")?;
        for y in 0..frame.height() {
            for x in 0..frame.width() {
                let [r, g, b] = frame.rgb_at(x, y).unwrap();
                write!(file, "{r} {g} {b} ")?;
            }
            writeln!(file)?;
        }
        Ok(())
    }
}

impl DisplayDriver for MockDriver {
    fn spec(&self) -> &PanelSpec {
        &self.spec
    }

    fn show(&mut self, frame: &Frame) -> Result<(), DisplayError> {
        self.check_dimensions(frame)?;

        let mut state = self.state.lock().unwrap();
        state.show_count += 1;
        if state.simulate_show_failure {
            return Err(DisplayError::Io("simulated bus failure".to_string()));
        }
        state.last_frame = Some(frame.clone());
        drop(state);

        if let Some(path) = &self.sink {
            Self::write_ppm(path, frame)
                .map_err(|e| DisplayError::Io(format!("mock sink write failed: {e}")))?;
        }
        debug!(
            "mock panel: stored frame {}x{}",
            frame.width(),
            frame.height()
        );
        Ok(())
    }

    fn clear(&mut self) -> Result<(), DisplayError> {
        let mut state = self.state.lock().unwrap();
        state.clear_count += 1;
        if state.simulate_clear_failure {
            return Err(DisplayError::Io("simulated bus failure".to_string()));
        }
        state.last_frame = None;
        debug!("mock panel: cleared");
        Ok(())
    }

    fn set_saturation(&mut self, value: f32) -> Result<(), DisplayError> {
        validate_saturation(value)?;
        self.saturation = value;
        Ok(())
    }

    fn saturation(&self) -> f32 {
        self.saturation
    }
}
