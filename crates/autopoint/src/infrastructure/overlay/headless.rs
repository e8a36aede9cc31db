//! Off-screen surface for platforms without a layered-window overlay.
//!
//! Frames are composed by [`SoftwareContext`] and counted, never shown.
//! Used on non-Windows builds so the rest of the application runs unchanged.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::trace;

use super::compositor::{FrameBuffer, FramePresenter, SoftwareContext};
use super::{RenderError, SurfaceContext, SurfaceDevice, SurfaceRect};

struct CountingPresenter {
    frames: Arc<AtomicU64>,
}

impl FramePresenter for CountingPresenter {
    fn present(&mut self, frame: &FrameBuffer) -> Result<(), RenderError> {
        let n = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(frame = n, width = frame.width(), height = frame.height(), "headless frame");
        Ok(())
    }
}

/// [`SurfaceDevice`] that renders into memory.
pub struct HeadlessSurface {
    bounds: SurfaceRect,
    frames: Arc<AtomicU64>,
}

impl HeadlessSurface {
    pub fn new(bounds: SurfaceRect) -> Self {
        Self {
            bounds,
            frames: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Frames presented across every context generation.
    pub fn frame_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.frames)
    }
}

impl SurfaceDevice for HeadlessSurface {
    fn desktop_bounds(&self) -> SurfaceRect {
        self.bounds
    }

    fn create_context(&mut self) -> Result<Box<dyn SurfaceContext>, RenderError> {
        Ok(Box::new(SoftwareContext::new(
            self.bounds,
            CountingPresenter {
                frames: Arc::clone(&self.frames),
            },
        )))
    }

    fn reassert_topmost(&self) {}
}
