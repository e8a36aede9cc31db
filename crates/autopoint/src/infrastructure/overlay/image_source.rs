//! Marker bitmaps: file decoding and the built-in target glyph.

use autopoint_core::{MarkerImage, MarkerSize};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

use super::RenderError;

const RING_COLOUR: [u8; 3] = [230, 40, 40];
const OUTLINE_COLOUR: [u8; 3] = [255, 255, 255];

/// Returns the bitmap for `image`, scaled to `size`.
///
/// # Errors
///
/// [`RenderError::Decode`] if a file image cannot be opened or decoded.
pub fn decode_marker_image(image: &MarkerImage, size: MarkerSize) -> Result<RgbaImage, RenderError> {
    let size = MarkerSize {
        width: size.width.max(1),
        height: size.height.max(1),
    };
    let bitmap = match image {
        MarkerImage::BuiltIn => built_in_target(size),
        MarkerImage::File(path) => image::open(path)
            .map_err(|e| RenderError::Decode {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?
            .to_rgba8(),
    };
    Ok(fit(bitmap, size))
}

fn fit(bitmap: RgbaImage, size: MarkerSize) -> RgbaImage {
    if bitmap.width() == size.width && bitmap.height() == size.height {
        return bitmap;
    }
    imageops::resize(&bitmap, size.width, size.height, FilterType::Triangle)
}

/// Draws the built-in target: a red ring with a white outline and a centre
/// dot, on a transparent background.
pub fn built_in_target(size: MarkerSize) -> RgbaImage {
    let side = size.width.min(size.height).max(1) as f32;
    let outer = side / 2.0 - 0.5;
    let thickness = (side / 8.0).max(2.0);
    let inner = (outer - thickness).max(0.0);
    let dot = (side / 10.0).max(1.0);
    let cx = size.width as f32 / 2.0;
    let cy = size.height as f32 / 2.0;

    RgbaImage::from_fn(size.width, size.height, |x, y| {
        let dx = x as f32 + 0.5 - cx;
        let dy = y as f32 + 0.5 - cy;
        let d = (dx * dx + dy * dy).sqrt();

        let ring = coverage(d, inner, outer);
        let centre = coverage(d, -1.0, dot);
        let fill = ring.max(centre);
        // 1px white halo keeps the glyph visible on red backgrounds.
        let halo = coverage(d, inner - 1.0, outer + 1.0)
            .max(coverage(d, -1.0, dot + 1.0))
            * 0.6;

        if fill <= 0.0 && halo <= 0.0 {
            return Rgba([0, 0, 0, 0]);
        }
        let alpha = fill.max(halo);
        let t = if alpha > 0.0 { fill / alpha } else { 0.0 };
        let mix = |i: usize| -> u8 {
            (RING_COLOUR[i] as f32 * t + OUTLINE_COLOUR[i] as f32 * (1.0 - t)).round() as u8
        };
        Rgba([mix(0), mix(1), mix(2), (alpha * 255.0).round() as u8])
    })
}

/// Anti-aliased coverage of a pixel at distance `d` inside the band
/// `[from, to]`.
fn coverage(d: f32, from: f32, to: f32) -> f32 {
    let enter = (d - from + 0.5).clamp(0.0, 1.0);
    let leave = (to - d + 0.5).clamp(0.0, 1.0);
    enter.min(leave)
}
