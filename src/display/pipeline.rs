/*
 *  display/pipeline.rs
 *
 *  inkd - pictures over pub/sub
 *
 *  Image transform pipeline: arbitrary source image in, panel-native
 *  palette frame out. Pure and deterministic; never touches the bus.
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

use image::RgbImage;
use image::imageops::FilterType;

use crate::config::Orientation;
use crate::display::error::DisplayError;
use crate::display::palette::{self, Frame, PALETTE};
use crate::display::traits::PanelSpec;

/// Transform arbitrary source image bytes into a frame matching the
/// panel's native resolution under the configured orientation.
///
/// Steps: decode, scale-to-cover + center crop (no letterboxing), rotate
/// 90° when the configured orientation differs from the panel's native
/// one, quantize to the ink palette with the saturation-weighted metric,
/// optionally Floyd-Steinberg dither. Identical inputs always produce
/// byte-identical frames.
pub fn render_frame(
    bytes: &[u8],
    spec: &PanelSpec,
    orientation: Orientation,
    saturation: f32,
    dither: bool,
) -> Result<Frame, DisplayError> {
    let source = image::load_from_memory(bytes)?;

    let rotate = match orientation {
        Orientation::Landscape => !spec.is_landscape(),
        Orientation::Portrait => spec.is_landscape(),
    };

    // Compose in the configured orientation, then rotate into the
    // buffer layout the hardware expects.
    let (target_w, target_h) = if rotate {
        (spec.height, spec.width)
    } else {
        (spec.width, spec.height)
    };

    let fitted = source.resize_to_fill(target_w, target_h, FilterType::Lanczos3);
    let fitted = if rotate { fitted.rotate90() } else { fitted };

    Ok(quantize(&fitted.to_rgb8(), saturation, dither))
}

/// Map every pixel onto the ink palette.
///
/// With dithering enabled the quantization error is diffused to
/// unvisited neighbors in fixed raster order (Floyd-Steinberg weights
/// 7/16, 3/16, 5/16, 1/16) so the output stays deterministic.
fn quantize(img: &RgbImage, saturation: f32, dither: bool) -> Frame {
    let (w, h) = img.dimensions();
    let mut work: Vec<[f32; 3]> = img
        .pixels()
        .map(|p| [p.0[0] as f32, p.0[1] as f32, p.0[2] as f32])
        .collect();
    let mut indices = vec![0u8; (w * h) as usize];

    for y in 0..h {
        for x in 0..w {
            let i = (y * w + x) as usize;
            let px = work[i];
            let ink = palette::nearest(px, saturation);
            indices[i] = ink as u8;

            if !dither {
                continue;
            }
            let chosen = PALETTE[ink];
            let err = [
                px[0] - chosen[0] as f32,
                px[1] - chosen[1] as f32,
                px[2] - chosen[2] as f32,
            ];
            diffuse(&mut work, w, h, x + 1, y, err, 7.0 / 16.0);
            if x > 0 {
                diffuse(&mut work, w, h, x - 1, y + 1, err, 3.0 / 16.0);
            }
            diffuse(&mut work, w, h, x, y + 1, err, 5.0 / 16.0);
            diffuse(&mut work, w, h, x + 1, y + 1, err, 1.0 / 16.0);
        }
    }

    Frame::from_indices(w, h, indices)
}

fn diffuse(work: &mut [[f32; 3]], w: u32, h: u32, x: u32, y: u32, err: [f32; 3], weight: f32) {
    if x >= w || y >= h {
        return;
    }
    let i = (y * w + x) as usize;
    for ch in 0..3 {
        work[i][ch] += err[ch] * weight;
    }
}
