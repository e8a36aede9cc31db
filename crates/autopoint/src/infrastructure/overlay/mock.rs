//! Mock surface device for unit and integration testing.
//!
//! Records uploads, releases, frames and context lifetimes, and can simulate
//! device loss on the next N frames.

use std::sync::{Arc, Mutex};

use image::RgbaImage;

use super::{RenderError, SurfaceContext, SurfaceDevice, SurfaceRect, TextureId};

/// Counters observed by tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockSurfaceStats {
    pub contexts_created: u32,
    pub contexts_dropped: u32,
    pub uploads: u32,
    pub releases: u32,
    pub frames_presented: u32,
    pub failed_frames: u32,
    /// Rectangles drawn in the most recently presented frame.
    pub last_frame: Vec<SurfaceRect>,
    pub reanchors: u32,
}

#[derive(Default)]
struct MockState {
    stats: MockSurfaceStats,
    fail_next_frames: u32,
    fail_create: bool,
}

/// A mock implementation of [`SurfaceDevice`].  Clones share state.
#[derive(Clone, Default)]
pub struct MockSurfaceDevice {
    state: Arc<Mutex<MockState>>,
}

impl MockSurfaceDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> MockSurfaceStats {
        self.state.lock().expect("lock poisoned").stats.clone()
    }

    /// The next `n` calls to `end_frame` report device loss.
    pub fn fail_next_frames(&self, n: u32) {
        self.state.lock().expect("lock poisoned").fail_next_frames = n;
    }

    /// Makes the next frame report a stale context, as after a resolution or
    /// monitor layout change.
    pub fn change_display(&self) {
        self.fail_next_frames(1);
    }

    /// Makes `create_context` fail until reset.
    pub fn set_fail_create(&self, fail: bool) {
        self.state.lock().expect("lock poisoned").fail_create = fail;
    }
}

impl SurfaceDevice for MockSurfaceDevice {
    fn desktop_bounds(&self) -> SurfaceRect {
        SurfaceRect {
            x: 0,
            y: 0,
            width: 1920,
            height: 1080,
        }
    }

    fn create_context(&mut self) -> Result<Box<dyn SurfaceContext>, RenderError> {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.fail_create {
            return Err(RenderError::Device("injected create failure".to_string()));
        }
        state.stats.contexts_created += 1;
        Ok(Box::new(MockContext {
            state: Arc::clone(&self.state),
            next_texture: 1,
            pending: Vec::new(),
        }))
    }

    fn reassert_topmost(&self) {
        self.state.lock().expect("lock poisoned").stats.reanchors += 1;
    }
}

struct MockContext {
    state: Arc<Mutex<MockState>>,
    next_texture: TextureId,
    pending: Vec<SurfaceRect>,
}

impl SurfaceContext for MockContext {
    fn upload(&mut self, _image: &RgbaImage) -> Result<TextureId, RenderError> {
        self.state.lock().expect("lock poisoned").stats.uploads += 1;
        let id = self.next_texture;
        self.next_texture += 1;
        Ok(id)
    }

    fn release(&mut self, _texture: TextureId) {
        self.state.lock().expect("lock poisoned").stats.releases += 1;
    }

    fn begin_frame(&mut self) -> Result<(), RenderError> {
        self.pending.clear();
        Ok(())
    }

    fn draw(&mut self, _texture: TextureId, rect: SurfaceRect) {
        self.pending.push(rect);
    }

    fn end_frame(&mut self) -> Result<(), RenderError> {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.fail_next_frames > 0 {
            state.fail_next_frames -= 1;
            state.stats.failed_frames += 1;
            return Err(RenderError::RecreateRequired);
        }
        state.stats.frames_presented += 1;
        state.stats.last_frame = std::mem::take(&mut self.pending);
        Ok(())
    }
}

impl Drop for MockContext {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.stats.contexts_dropped += 1;
        }
    }
}
