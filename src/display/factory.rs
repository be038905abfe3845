/*
 *  display/factory.rs
 *
 *  inkd - pictures over pub/sub
 *
 *  Driver selection from configuration
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

use log::info;

use crate::config::DisplayConfig;
use crate::display::drivers::MockDriver;
use crate::display::error::DisplayError;
use crate::display::traits::DisplayDriver;

/// Type alias for boxed panel driver trait objects.
pub type BoxedDriver = Box<dyn DisplayDriver>;

/// Create the panel driver selected by the configuration.
///
/// `display.mock: true` yields the mock driver and can never fail.
/// Otherwise the real Spectra 6 driver is constructed, which requires
/// the `hardware` cargo feature and a reachable panel; construction
/// failures surface as `DisplayError::Init` and are fatal at startup.
pub fn create_driver(config: &DisplayConfig) -> Result<BoxedDriver, DisplayError> {
    if config.mock {
        info!(
            "creating mock panel ({}x{})",
            config.mock_width, config.mock_height
        );
        let mut driver = MockDriver::new(
            config.mock_width,
            config.mock_height,
            config.mock_sink.clone(),
        );
        driver.set_saturation(config.saturation)?;
        return Ok(Box::new(driver));
    }

    #[cfg(feature = "hardware")]
    {
        info!("creating Spectra 6 panel driver on SPI{}", config.spi_bus);
        let driver = crate::display::drivers::SpectraDriver::new(config)?;
        Ok(Box::new(driver))
    }

    #[cfg(not(feature = "hardware"))]
    Err(DisplayError::Init(
        "built without the 'hardware' feature; rebuild with --features hardware \
         or set display.mock: true"
            .to_string(),
    ))
}
