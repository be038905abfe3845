/*
 *  display/traits.rs
 *
 *  inkd - pictures over pub/sub
 *
 *  Core trait definitions for panel driver abstraction
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

use crate::display::error::DisplayError;
use crate::display::palette::Frame;

/// Panel capabilities and metadata.
///
/// Width and height are the native resolution as the hardware reports it
/// (or as configured for the mock). The transform pipeline queries this
/// before producing a frame; nothing in the agent assumes a size.
#[derive(Debug, Clone)]
pub struct PanelSpec {
    /// Native width in pixels.
    pub width: u32,

    /// Native height in pixels.
    pub height: u32,

    /// Panel model identifier, for logs and status replies.
    pub model: &'static str,
}

impl PanelSpec {
    /// Whether the panel's native resolution is landscape. Square panels
    /// count as landscape so exactly one orientation is ever "native".
    pub fn is_landscape(&self) -> bool {
        self.width >= self.height
    }
}

/// Minimal hardware abstraction - every panel driver implements this.
///
/// The refresh of a color e-ink panel is a blocking operation in the
/// tens of seconds; callers are expected to wrap `show`/`clear` so the
/// async runtime is not starved. Drivers themselves stay synchronous.
pub trait DisplayDriver: Send {
    /// Returns the panel's native resolution and metadata.
    fn spec(&self) -> &PanelSpec;

    /// Write a frame to the panel and refresh it.
    ///
    /// The frame must match the native resolution exactly; drivers verify
    /// this and fail with `DisplayError::FrameSize` rather than clipping.
    fn show(&mut self, frame: &Frame) -> Result<(), DisplayError>;

    /// Reset the panel to a blank/white state.
    fn clear(&mut self) -> Result<(), DisplayError>;

    /// Update the saturation used for subsequent renders (not
    /// retroactive). Rejects values outside 0.0..=1.0.
    fn set_saturation(&mut self, value: f32) -> Result<(), DisplayError>;

    /// The saturation currently in effect.
    fn saturation(&self) -> f32;
}

/// Range check shared by every driver's `set_saturation`.
pub fn validate_saturation(value: f32) -> Result<(), DisplayError> {
    if !(0.0..=1.0).contains(&value) || value.is_nan() {
        return Err(DisplayError::InvalidSaturation(value));
    }
    Ok(())
}
