/*
 *  display/mod.rs
 *
 *  inkd - pictures over pub/sub
 *
 *  Display subsystem - panel drivers, palette, and the image transform
 *  pipeline
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

// Core trait definitions
pub mod error;
pub mod traits;

// Palette model and the pure transform pipeline
pub mod palette;
pub mod pipeline;

// Panel drivers
pub mod drivers;
pub mod factory;

// Re-exports for convenience
pub use drivers::{MockDriver, MockState};
pub use error::DisplayError;
pub use factory::{BoxedDriver, create_driver};
pub use palette::{Frame, PALETTE};
pub use traits::{DisplayDriver, PanelSpec};
