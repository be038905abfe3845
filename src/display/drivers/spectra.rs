/*
 *  display/drivers/spectra.rs
 *
 *  inkd - pictures over pub/sub
 *
 *  Spectra 6 e-ink panel driver (SPI + GPIO via rppal)
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

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info};
use rppal::gpio::{Gpio, InputPin, OutputPin};
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};

use crate::config::DisplayConfig;
use crate::display::error::DisplayError;
use crate::display::palette::{Frame, HARDWARE_CODES, WHITE};
use crate::display::traits::{DisplayDriver, PanelSpec, validate_saturation};

// UC8159-family command set (subset used here).
const CMD_PSR: u8 = 0x00; // panel setting
const CMD_PWR: u8 = 0x01; // power setting
const CMD_POF: u8 = 0x02; // power off
const CMD_PON: u8 = 0x04; // power on
const CMD_BTST: u8 = 0x06; // booster soft start
const CMD_DTM: u8 = 0x10; // data transmission
const CMD_DRF: u8 = 0x12; // display refresh
const CMD_CDI: u8 = 0x50; // vcom and data interval
const CMD_TRES: u8 = 0x61; // resolution setting

const SPI_CLOCK_HZ: u32 = 3_000_000;
// The kernel rejects single SPI transfers above its buffer size.
const SPI_CHUNK: usize = 4096;

// A full-panel refresh takes ~20-25s; anything past this is a wedged bus.
const REFRESH_TIMEOUT: Duration = Duration::from_secs(40);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Driver for Spectra 6 color e-ink panels (Inky Impression class).
///
/// The refresh is a blocking operation in the tens of seconds; callers
/// serialize access and keep it off the async runtime's core threads.
pub struct SpectraDriver {
    spec: PanelSpec,
    saturation: f32,
    spi: Spi,
    dc: OutputPin,
    reset: OutputPin,
    busy: InputPin,
}

impl SpectraDriver {
    /// Open the SPI bus and GPIO pins and run the panel init sequence.
    ///
    /// Fails with `DisplayError::Init` (never `Io`) so the agent can
    /// abort startup instead of retrying a panel that was never there.
    pub fn new(config: &DisplayConfig) -> Result<Self, DisplayError> {
        let bus = match config.spi_bus {
            0 => Bus::Spi0,
            1 => Bus::Spi1,
            n => return Err(DisplayError::Init(format!("unsupported SPI bus {n}"))),
        };

        let spi = Spi::new(bus, SlaveSelect::Ss0, SPI_CLOCK_HZ, Mode::Mode0).map_err(|e| {
            DisplayError::Init(format!(
                "cannot open SPI bus {}: {e}; enable SPI (raspi-config) and \
                 make sure the user is in the 'spi' group",
                config.spi_bus
            ))
        })?;

        let gpio = Gpio::new().map_err(|e| {
            DisplayError::Init(format!(
                "cannot access GPIO: {e}; make sure the user is in the 'gpio' group"
            ))
        })?;
        let pin_err = |name: &str, pin: u8, e: rppal::gpio::Error| {
            DisplayError::Init(format!("cannot claim {name} pin GPIO{pin}: {e}"))
        };
        let dc = gpio
            .get(config.dc_pin)
            .map_err(|e| pin_err("data/command", config.dc_pin, e))?
            .into_output();
        let reset = gpio
            .get(config.reset_pin)
            .map_err(|e| pin_err("reset", config.reset_pin, e))?
            .into_output();
        let busy = gpio
            .get(config.busy_pin)
            .map_err(|e| pin_err("busy", config.busy_pin, e))?
            .into_input_pullup();

        let mut driver = Self {
            spec: PanelSpec {
                width: 1600,
                height: 1200,
                model: "spectra6-13.3",
            },
            saturation: config.saturation,
            spi,
            dc,
            reset,
            busy,
        };

        driver.hardware_reset();
        driver
            .init_sequence()
            .map_err(|e| DisplayError::Init(format!("panel not responding: {e}")))?;

        info!(
            "Spectra 6 panel initialized: {}x{}",
            driver.spec.width, driver.spec.height
        );
        Ok(driver)
    }

    fn hardware_reset(&mut self) {
        self.reset.set_high();
        thread::sleep(Duration::from_millis(20));
        self.reset.set_low();
        thread::sleep(Duration::from_millis(2));
        self.reset.set_high();
        thread::sleep(Duration::from_millis(20));
    }

    fn init_sequence(&mut self) -> Result<(), DisplayError> {
        self.busy_wait(COMMAND_TIMEOUT)?;
        self.command(CMD_PSR, &[0xEF, 0x08])?;
        self.command(CMD_PWR, &[0x37, 0x00, 0x23, 0x23])?;
        self.command(CMD_BTST, &[0xC7, 0xC7, 0x1D])?;
        self.command(CMD_CDI, &[0x37])?;
        let w = self.spec.width as u16;
        let h = self.spec.height as u16;
        self.command(
            CMD_TRES,
            &[(w >> 8) as u8, w as u8, (h >> 8) as u8, h as u8],
        )?;
        Ok(())
    }

    fn command(&mut self, cmd: u8, data: &[u8]) -> Result<(), DisplayError> {
        self.dc.set_low();
        self.spi_write(&[cmd])?;
        if !data.is_empty() {
            self.dc.set_high();
            self.spi_write(data)?;
        }
        Ok(())
    }

    fn spi_write(&mut self, data: &[u8]) -> Result<(), DisplayError> {
        for chunk in data.chunks(SPI_CHUNK) {
            self.spi
                .write(chunk)
                .map_err(|e| DisplayError::Io(format!("SPI write failed: {e}")))?;
        }
        Ok(())
    }

    /// Poll the busy line until the controller releases it. Low means
    /// busy on this controller family.
    fn busy_wait(&mut self, timeout: Duration) -> Result<(), DisplayError> {
        let deadline = Instant::now() + timeout;
        while self.busy.is_low() {
            if Instant::now() >= deadline {
                return Err(DisplayError::Io(format!(
                    "panel busy timeout after {timeout:?}; device busy or not responding \
                     (check the ribbon cable and the busy pin wiring)"
                )));
            }
            thread::sleep(Duration::from_millis(10));
        }
        Ok(())
    }

    /// Two 4-bit ink codes per byte, first pixel in the high nibble.
    fn pack(frame: &Frame) -> Vec<u8> {
        let indices = frame.indices();
        let mut packed = Vec::with_capacity(indices.len().div_ceil(2));
        for pair in indices.chunks(2) {
            let hi = HARDWARE_CODES[pair[0] as usize];
            let lo = pair.get(1).map_or(0, |&p| HARDWARE_CODES[p as usize]);
            packed.push((hi << 4) | lo);
        }
        packed
    }

    fn refresh(&mut self, frame: &Frame) -> Result<(), DisplayError> {
        let packed = Self::pack(frame);
        debug!("writing {} bytes to panel RAM", packed.len());
        self.command(CMD_DTM, &packed)?;

        self.command(CMD_PON, &[])?;
        self.busy_wait(COMMAND_TIMEOUT)?;

        info!("refreshing panel (this takes ~20-25 seconds)");
        self.command(CMD_DRF, &[0x00])?;
        self.busy_wait(REFRESH_TIMEOUT)?;

        self.command(CMD_POF, &[])?;
        self.busy_wait(COMMAND_TIMEOUT)?;
        info!("panel refresh complete");
        Ok(())
    }
}

impl DisplayDriver for SpectraDriver {
    fn spec(&self) -> &PanelSpec {
        &self.spec
    }

    fn show(&mut self, frame: &Frame) -> Result<(), DisplayError> {
        if frame.dimensions() != (self.spec.width, self.spec.height) {
            return Err(DisplayError::FrameSize {
                expected_w: self.spec.width,
                expected_h: self.spec.height,
                actual_w: frame.width(),
                actual_h: frame.height(),
            });
        }
        self.refresh(frame)
    }

    fn clear(&mut self) -> Result<(), DisplayError> {
        let blank = Frame::filled(self.spec.width, self.spec.height, WHITE);
        self.refresh(&blank)
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
