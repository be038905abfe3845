/*
 *  display/palette.rs
 *
 *  inkd - pictures over pub/sub
 *
 *  Spectra 6 ink palette, frame buffer, and the saturation-weighted
 *  nearest-ink metric
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

/// The six inks a Spectra 6 panel can physically render, in palette
/// order. Frame pixels are indices into this table.
pub const PALETTE: [[u8; 3]; 6] = [
    [0, 0, 0],       // black
    [255, 255, 255], // white
    [255, 255, 0],   // yellow
    [255, 0, 0],     // red
    [0, 0, 255],     // blue
    [0, 255, 0],     // green
];

/// 4-bit pixel codes the panel controller expects, indexed like
/// [`PALETTE`]. 0x4 is reserved by the controller family.
pub const HARDWARE_CODES: [u8; 6] = [0x0, 0x1, 0x2, 0x3, 0x5, 0x6];

/// A pixel buffer already matched to the panel's resolution and palette,
/// ready to write. Pixels are indices into [`PALETTE`], row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Frame {
    /// Build a frame from palette indices. Panics if the buffer does not
    /// match the dimensions or contains an out-of-palette index; both are
    /// programming errors inside the pipeline, never inputs.
    pub fn from_indices(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        assert_eq!(pixels.len(), (width * height) as usize);
        assert!(pixels.iter().all(|&p| (p as usize) < PALETTE.len()));
        Self {
            width,
            height,
            pixels,
        }
    }

    /// A frame filled with a single ink (used for `clear`).
    pub fn filled(width: u32, height: u32, index: u8) -> Self {
        assert!((index as usize) < PALETTE.len());
        Self {
            width,
            height,
            pixels: vec![index; (width * height) as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Palette indices, row-major.
    pub fn indices(&self) -> &[u8] {
        &self.pixels
    }

    /// RGB value of the pixel at (x, y), for inspection in tests and for
    /// the mock driver's file sink.
    pub fn rgb_at(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = self.pixels[(y * self.width + x) as usize];
        Some(PALETTE[idx as usize])
    }
}

/// Index of the white ink in [`PALETTE`].
pub const WHITE: u8 = 1;

/// Nearest palette entry to an (error-diffused, so possibly out-of-gamut)
/// RGB color under the saturation-weighted metric.
///
/// Colors are split into a Rec.601 luma axis and the residual chroma
/// vector; distance² = Δluma² + w(s)·‖Δchroma‖² with w(s) = 0.5 + 2.0·s.
/// At s=0 chroma mismatch is discounted and the gray inks win; at s=1 it
/// dominates and the chromatic inks win. Deterministic: ties resolve to
/// the lowest palette index.
pub fn nearest(color: [f32; 3], saturation: f32) -> usize {
    let w = chroma_weight(saturation);
    let mut best = 0usize;
    let mut best_dist = f32::INFINITY;
    for (i, entry) in PALETTE.iter().enumerate() {
        let e = [entry[0] as f32, entry[1] as f32, entry[2] as f32];
        let d = weighted_distance_sq(color, e, w);
        if d < best_dist {
            best_dist = d;
            best = i;
        }
    }
    best
}

fn chroma_weight(saturation: f32) -> f32 {
    0.5 + 2.0 * saturation.clamp(0.0, 1.0)
}

fn luma(c: [f32; 3]) -> f32 {
    0.299 * c[0] + 0.587 * c[1] + 0.114 * c[2]
}

fn weighted_distance_sq(a: [f32; 3], b: [f32; 3], chroma_w: f32) -> f32 {
    let la = luma(a);
    let lb = luma(b);
    let dl = la - lb;
    // Residual chroma: per-channel distance after removing the luma axis.
    let mut dc = 0.0f32;
    for ch in 0..3 {
        let ca = a[ch] - la;
        let cb = b[ch] - lb;
        dc += (ca - cb) * (ca - cb);
    }
    dl * dl + chroma_w * dc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_palette_entries_map_to_themselves() {
        for (i, entry) in PALETTE.iter().enumerate() {
            let c = [entry[0] as f32, entry[1] as f32, entry[2] as f32];
            assert_eq!(nearest(c, 0.5), i, "palette entry {i} not a fixed point");
        }
    }

    #[test]
    fn test_high_saturation_prefers_chromatic_inks() {
        // A dulled red: not the pure ink, but clearly red-hued.
        let dulled_red = [200.0, 60.0, 60.0];
        let at_full = nearest(dulled_red, 1.0);
        assert_eq!(PALETTE[at_full], [255, 0, 0]);
    }

    #[test]
    fn test_low_saturation_prefers_gray_inks() {
        let muted_red = [150.0, 90.0, 90.0];
        let at_zero = nearest(muted_red, 0.0);
        // Black or white, never a chromatic ink.
        assert!(at_zero <= 1, "expected a gray ink, got {:?}", PALETTE[at_zero]);
    }

    #[test]
    fn test_nearest_is_deterministic() {
        let c = [127.0, 127.0, 127.0];
        let first = nearest(c, 0.5);
        for _ in 0..10 {
            assert_eq!(nearest(c, 0.5), first);
        }
    }

    #[test]
    fn test_frame_filled_and_rgb_lookup() {
        let frame = Frame::filled(4, 2, WHITE);
        assert_eq!(frame.dimensions(), (4, 2));
        assert_eq!(frame.indices().len(), 8);
        assert_eq!(frame.rgb_at(3, 1), Some([255, 255, 255]));
        assert_eq!(frame.rgb_at(4, 0), None);
    }

    #[test]
    #[should_panic]
    fn test_frame_rejects_out_of_palette_index() {
        let _ = Frame::from_indices(1, 1, vec![9]);
    }

    #[test]
    fn test_hardware_codes_skip_reserved_slot() {
        assert_eq!(HARDWARE_CODES.len(), PALETTE.len());
        assert!(!HARDWARE_CODES.contains(&0x4));
    }
}
