/*
 *  display/error.rs
 *
 *  inkd - pictures over pub/sub
 *
 *  Unified error types for the display subsystem
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

use thiserror::Error;

/// Unified error type for all display operations.
///
/// Retry decisions are made by variant, never by inspecting message text:
/// only `Io` is transient. `Init` is raised exclusively during driver
/// construction so the agent can tell "the panel was never there" apart
/// from "the panel stopped responding mid-flight".
#[derive(Debug, Error)]
pub enum DisplayError {
    /// Panel hardware unavailable at startup (bus not enabled, permission
    /// denied, device absent). Fatal; carries actionable guidance.
    #[error("display initialization failed: {0}")]
    Init(String),

    /// Transient bus failure during an otherwise valid operation
    /// (write error, NACK, busy timeout). Recovered via bounded retry.
    #[error("panel bus error: {0}")]
    Io(String),

    /// Saturation outside the accepted range.
    #[error("saturation {0} out of range (must be 0.0..=1.0)")]
    InvalidSaturation(f32),

    /// Frame dimensions do not match the panel's native resolution.
    #[error("frame size mismatch: panel is {expected_w}x{expected_h}, frame is {actual_w}x{actual_h}")]
    FrameSize {
        expected_w: u32,
        expected_h: u32,
        actual_w: u32,
        actual_h: u32,
    },

    /// Source image bytes could not be decoded. Terminal for the
    /// command; a new message is required.
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

impl DisplayError {
    /// Whether a bounded retry may succeed. Only bus-level faults are
    /// transient; everything else needs new input or a restart.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DisplayError::Io(_))
    }
}
