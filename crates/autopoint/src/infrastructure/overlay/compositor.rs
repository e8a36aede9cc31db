//! CPU compositor shared by the layered-window and headless surfaces.
//!
//! Textures are stored as premultiplied BGRA, the layout `UpdateLayeredWindow`
//! expects for a 32-bit DIB with `AC_SRC_ALPHA`.  A frame is composed into a
//! [`FrameBuffer`] covering the desktop bounds and handed to a
//! [`FramePresenter`].

use std::collections::HashMap;

use image::RgbaImage;
use tracing::trace;

use super::{RenderError, SurfaceContext, SurfaceRect, TextureId};

/// Receives finished frames.
pub trait FramePresenter: Send {
    fn present(&mut self, frame: &FrameBuffer) -> Result<(), RenderError>;
}

/// Premultiplied BGRA pixels, top-down rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    bgra: Vec<u8>,
    width: u32,
    height: u32,
}

impl FrameBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            bgra: vec![0; width as usize * height as usize * 4],
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bgra
    }

    /// Fully transparent.
    pub fn clear(&mut self) {
        self.bgra.fill(0);
    }

    /// Premultiplied BGRA at `(x, y)`, or `None` outside the buffer.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        Some([self.bgra[i], self.bgra[i + 1], self.bgra[i + 2], self.bgra[i + 3]])
    }

    /// Source-over blend of `texture` scaled to `width`x`height` at
    /// `(left, top)` in buffer coordinates.  Clipped to the buffer.
    fn blend(&mut self, texture: &Texture, left: i64, top: i64, width: u32, height: u32) {
        if width == 0 || height == 0 || texture.width == 0 || texture.height == 0 {
            return;
        }
        let x0 = left.max(0);
        let y0 = top.max(0);
        let x1 = (left + width as i64).min(self.width as i64);
        let y1 = (top + height as i64).min(self.height as i64);

        for y in y0..y1 {
            let sy = ((y - top) as u64 * texture.height as u64 / height as u64) as usize;
            for x in x0..x1 {
                let sx = ((x - left) as u64 * texture.width as u64 / width as u64) as usize;
                let s = (sy * texture.width as usize + sx) * 4;
                let src = &texture.bgra[s..s + 4];
                let src_alpha = src[3] as u32;
                if src_alpha == 0 {
                    continue;
                }
                let d = (y as usize * self.width as usize + x as usize) * 4;
                let dst = &mut self.bgra[d..d + 4];
                let keep = 255 - src_alpha;
                for c in 0..4 {
                    dst[c] = (src[c] as u32 + (dst[c] as u32 * keep + 127) / 255) as u8;
                }
            }
        }
    }
}

struct Texture {
    bgra: Vec<u8>,
    width: u32,
    height: u32,
}

/// Straight RGBA to premultiplied BGRA.
fn to_premultiplied_bgra(image: &RgbaImage) -> Vec<u8> {
    let mut out = Vec::with_capacity(image.as_raw().len());
    for px in image.as_raw().chunks_exact(4) {
        let a = px[3] as u32;
        let premultiply = |c: u8| ((c as u32 * a + 127) / 255) as u8;
        out.extend_from_slice(&[premultiply(px[2]), premultiply(px[1]), premultiply(px[0]), px[3]]);
    }
    out
}

/// [`SurfaceContext`] that composes on the CPU and presents through `P`.
pub struct SoftwareContext<P: FramePresenter> {
    bounds: SurfaceRect,
    frame: FrameBuffer,
    textures: HashMap<TextureId, Texture>,
    next_texture: TextureId,
    presenter: P,
}

impl<P: FramePresenter> SoftwareContext<P> {
    pub fn new(bounds: SurfaceRect, presenter: P) -> Self {
        Self {
            bounds,
            frame: FrameBuffer::new(bounds.width, bounds.height),
            textures: HashMap::new(),
            next_texture: 1,
            presenter,
        }
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }
}

impl<P: FramePresenter> SurfaceContext for SoftwareContext<P> {
    fn upload(&mut self, image: &RgbaImage) -> Result<TextureId, RenderError> {
        let id = self.next_texture;
        self.next_texture += 1;
        self.textures.insert(
            id,
            Texture {
                bgra: to_premultiplied_bgra(image),
                width: image.width(),
                height: image.height(),
            },
        );
        Ok(id)
    }

    fn release(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
    }

    fn begin_frame(&mut self) -> Result<(), RenderError> {
        self.frame.clear();
        Ok(())
    }

    fn draw(&mut self, texture: TextureId, rect: SurfaceRect) {
        let Some(tex) = self.textures.get(&texture) else {
            trace!(texture, "draw of released texture skipped");
            return;
        };
        let left = rect.x as i64 - self.bounds.x as i64;
        let top = rect.y as i64 - self.bounds.y as i64;
        self.frame.blend(tex, left, top, rect.width, rect.height);
    }

    fn end_frame(&mut self) -> Result<(), RenderError> {
        self.presenter.present(&self.frame)
    }
}
