//! The screen: one entry point over windows, textures, blending and flips
//!
//! [`Screen`] owns the backend and every per-window resource and is what
//! experiment code talks to. Closing a window cascades in a fixed order:
//! owned textures, shadow surface, pending flip callbacks, native surface.
//! Closing the owner of a render context first closes every offscreen
//! window rendering into that context.

use crate::backend::{self, Backend, GpuCallStats, ReadBuffer};
use crate::blend::{BlendFactor, BlendFunc};
use crate::config::ScreenConfig;
use crate::error::{Result, ScreenError};
use crate::flip::{CallbackHandle, FlipScheduler, FlipState, FlipStats};
use crate::geometry::Rect;
use crate::pacing::{FlipInfo, FramePacer, FrameStats};
use crate::shadow::{ShadowStats, ShadowSurfaceCache};
use crate::snapshot::FrameImage;
use crate::texture::blit::{blit_batch, BlitRequest};
use crate::texture::{ImageData, Texture, TextureId, TextureManager, TextureStats};
use crate::window::{WindowConfig, WindowIndex, WindowRecord, WindowRegistry};
use log::{debug, error, info};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// What happens to the back buffer of an onscreen window after a flip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearMode {
    /// Clear to the window's clear colour
    Clear,
    /// Keep the presented frame in the back buffer
    Keep,
    /// Leave the back buffer as the backend left it
    Untouched,
}

/// Per-window GPU resource manager
pub struct Screen {
    config: ScreenConfig,
    backend: Box<dyn Backend>,
    registry: WindowRegistry,
    textures: TextureManager,
    shadows: ShadowSurfaceCache,
    scheduler: FlipScheduler,
    pacers: HashMap<WindowIndex, FramePacer>,
    epoch: Instant,
}

impl Screen {
    /// Validate the configuration and start the configured backend
    pub fn new(config: ScreenConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let backend = backend::create(config.display.backend, &config.display);
        Ok(Self::with_backend(config, backend))
    }

    /// Run on an explicitly constructed backend
    pub fn with_backend(config: ScreenConfig, backend: Box<dyn Backend>) -> Self {
        info!(
            "🖥️ Screen ready: {:?} backend, {:.1}Hz, shadows {}",
            config.display.backend,
            config.display.refresh_rate_hz,
            if config.shadow.enabled { "on" } else { "off" }
        );
        Self {
            textures: TextureManager::new(config.textures.prefer_rectangle),
            shadows: ShadowSurfaceCache::new(config.shadow.enabled),
            config,
            backend,
            registry: WindowRegistry::new(),
            scheduler: FlipScheduler::new(),
            pacers: HashMap::new(),
            epoch: Instant::now(),
        }
    }

    pub fn config(&self) -> &ScreenConfig {
        &self.config
    }

    /// Onscreen window parameters from the configured defaults
    pub fn default_window_config(&self) -> WindowConfig {
        self.config.window.to_window_config()
    }

    pub fn open_window(&mut self, config: &WindowConfig) -> Result<WindowIndex> {
        let index = self.registry.open(self.backend.as_mut(), config)?;

        let native = self.registry.get(index)?.native;
        if let Err(e) = self.backend.clear(native, config.clear_color) {
            // Undo the registration so a failed open leaves nothing behind
            if let Err(rollback) = self.registry.remove(self.backend.as_mut(), index) {
                error!("❌ Rolling back window {}: {}", index, rollback);
            }
            return Err(ScreenError::WindowOpenFailed(e.to_string()));
        }
        if self.registry.get(index)?.is_onscreen() {
            self.pacers.insert(index, FramePacer::new(index, self.epoch));
            self.scheduler.register(index);
        }
        Ok(index)
    }

    /// Close a window and everything it owns.
    ///
    /// Fails with [`ScreenError::InvalidWindowIndex`] for unknown or already
    /// closed windows. A native release failure is reported after the
    /// window's records are gone.
    pub fn close_window(&mut self, index: WindowIndex) -> Result<()> {
        self.registry.check_thread(index)?;

        let mut first_error = None;
        for alias in self.registry.context_aliases(index)? {
            debug!("Closing window {} before context owner {}", alias, index);
            if let Err(e) = self.close_one(alias) {
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = self.close_one(index) {
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn close_one(&mut self, index: WindowIndex) -> Result<()> {
        let textures = self.textures.release_owned(self.backend.as_mut(), index);
        let shadow = self.shadows.release(self.backend.as_mut(), index);
        let callbacks = self.scheduler.retire(index);
        self.pacers.remove(&index);

        let result = self.registry.remove(self.backend.as_mut(), index).map(|_| ());
        if let Err(e) = &result {
            error!("❌ {}", e);
        }

        info!(
            "🗑️ Closed window {} ({} textures, shadow: {}, {} callbacks dropped)",
            index, textures, shadow, callbacks
        );
        result
    }

    pub fn window(&self, index: WindowIndex) -> Result<&WindowRecord> {
        self.registry.get(index)
    }

    /// Live windows in opening order
    pub fn windows(&self) -> Vec<WindowIndex> {
        self.registry.indices()
    }

    pub fn resize_window(&mut self, index: WindowIndex, width: u32, height: u32) -> Result<()> {
        self.registry.resize(self.backend.as_mut(), index, width, height)?;
        self.shadows.invalidate(index);

        let record = self.registry.get(index)?;
        self.backend.clear(record.native, record.clear_color)?;
        Ok(())
    }

    /// Set the blend factors; takes effect at the next draw
    pub fn set_blend(&mut self, index: WindowIndex, src: BlendFactor, dst: BlendFactor) -> Result<()> {
        self.registry.get_mut(index)?.blend.set(BlendFunc::new(src, dst))
    }

    /// Like [`Screen::set_blend`], with factor names such as `"GL_SRC_ALPHA"`
    pub fn set_blend_by_name(&mut self, index: WindowIndex, src: &str, dst: &str) -> Result<()> {
        let func = BlendFunc::parse(src, dst)?;
        self.registry.get_mut(index)?.blend.set(func)
    }

    /// Blend factors as last set, whether applied yet or not
    pub fn blend(&self, index: WindowIndex) -> Result<BlendFunc> {
        Ok(self.registry.get(index)?.blend.factors())
    }

    /// Upload an image; owned textures die with their window
    pub fn create_texture(&mut self, owner: Option<WindowIndex>, image: &ImageData) -> Result<TextureId> {
        let record = match owner {
            Some(index) => {
                self.registry.make_current(self.backend.as_mut(), index)?;
                Some(self.registry.get(index)?)
            }
            None => None,
        };
        self.textures.create(self.backend.as_mut(), record, image)
    }

    /// Snapshot a window's drawing buffer into a texture it owns
    pub fn create_texture_from_window(&mut self, index: WindowIndex) -> Result<TextureId> {
        self.registry.make_current(self.backend.as_mut(), index)?;
        let record = self.registry.get(index)?;
        self.textures.create_from_window(self.backend.as_mut(), record)
    }

    pub fn destroy_texture(&mut self, id: TextureId) -> Result<()> {
        if let Some(owner) = self.textures.get(id).ok().and_then(|t| t.owner) {
            self.registry.check_thread(owner)?;
        }
        self.textures.destroy(self.backend.as_mut(), id)
    }

    pub fn texture(&self, id: TextureId) -> Result<&Texture> {
        self.textures.get(id)
    }

    /// Draw a batch of textures in array order
    pub fn blit(&mut self, request: &BlitRequest) -> Result<()> {
        blit_batch(self.backend.as_mut(), &mut self.registry, &self.textures, request).map(|_| ())
    }

    /// Draw one texture, full source, into `dst` (centred when `None`)
    pub fn draw_texture(&mut self, window: WindowIndex, texture: TextureId, dst: Option<Rect>) -> Result<()> {
        let request = BlitRequest::single(window, texture).with_dst_rects(dst.into_iter().collect());
        self.blit(&request)
    }

    /// Fill the whole drawing buffer with one colour
    pub fn fill(&mut self, index: WindowIndex, color: [f32; 4]) -> Result<()> {
        self.registry.make_current(self.backend.as_mut(), index)?;
        let native = self.registry.get(index)?.native;
        self.backend.clear(native, color)?;
        self.registry.mark_drawn(index)?;
        Ok(())
    }

    /// Copy a region between windows (or within one). `None` means the
    /// whole window.
    pub fn copy_window(
        &mut self,
        src: WindowIndex,
        dst: WindowIndex,
        src_rect: Option<Rect>,
        dst_rect: Option<Rect>,
    ) -> Result<()> {
        let src_rect = match src_rect {
            Some(r) => r,
            None => self.registry.get(src)?.rect(),
        };
        let dst_rect = match dst_rect {
            Some(r) => r,
            None => self.registry.get(dst)?.rect(),
        };
        self.shadows
            .copy_via_shadow(self.backend.as_mut(), &mut self.registry, src, dst, src_rect, dst_rect)
    }

    /// Read back the drawing (back) buffer
    pub fn get_image(&mut self, index: WindowIndex) -> Result<FrameImage> {
        self.read_image(index, ReadBuffer::Back)
    }

    /// Read back what is currently presented
    pub fn get_front_image(&mut self, index: WindowIndex) -> Result<FrameImage> {
        self.read_image(index, ReadBuffer::Front)
    }

    fn read_image(&mut self, index: WindowIndex, buffer: ReadBuffer) -> Result<FrameImage> {
        self.registry.make_current(self.backend.as_mut(), index)?;
        let native = self.registry.get(index)?.native;
        self.backend.read_pixels(native, buffer)
    }

    /// Run `callback` right after the window's next swap
    pub fn schedule_flip_callback<F>(&mut self, index: WindowIndex, callback: F) -> Result<CallbackHandle>
    where
        F: FnOnce(&FlipInfo) -> anyhow::Result<()> + Send + 'static,
    {
        if !self.registry.get(index)?.is_onscreen() {
            return Err(ScreenError::NotOnscreenWindow(index));
        }
        self.scheduler.schedule(index, callback)
    }

    /// Drop the window's pending callbacks; returns how many
    pub fn clear_flip_callbacks(&mut self, index: WindowIndex) -> Result<usize> {
        self.registry.get(index)?;
        Ok(self.scheduler.clear(index))
    }

    /// Shared handle onto the scheduler, usable from other threads
    pub fn flip_scheduler(&self) -> FlipScheduler {
        self.scheduler.clone()
    }

    pub fn flip_state(&self, index: WindowIndex) -> Result<FlipState> {
        self.registry.get(index)?;
        Ok(self.scheduler.state(index))
    }

    /// Seconds since the screen started, on the clock flip timestamps use
    pub fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Present the back buffer at the next vertical blank, then run the
    /// window's flip callbacks. The back buffer is cleared afterwards when
    /// the window was opened with `clear_after_flip`.
    pub fn swap(&mut self, index: WindowIndex) -> Result<FlipInfo> {
        let clear = if self.registry.get(index)?.clear_after_flip {
            ClearMode::Clear
        } else {
            ClearMode::Keep
        };
        self.swap_at(index, None, clear)
    }

    /// Present at the first vertical blank at or after `when` (seconds on
    /// the [`Screen::now`] clock), or at the next one when `None`.
    ///
    /// A deadline already in the past flips at the next vertical blank.
    pub fn swap_at(&mut self, index: WindowIndex, when: Option<f64>, clear: ClearMode) -> Result<FlipInfo> {
        if let Some(when) = when {
            if !when.is_finite() || when < 0.0 {
                return Err(ScreenError::InvalidArgument(format!(
                    "flip deadline {} must be a non-negative time",
                    when
                )));
            }
        }
        if !self.registry.get(index)?.is_onscreen() {
            return Err(ScreenError::NotOnscreenWindow(index));
        }
        self.registry.make_current(self.backend.as_mut(), index)?;

        let (native, clear_color) = {
            let record = self.registry.get(index)?;
            (record.native, record.clear_color)
        };
        let not_before = when.map(|w| self.epoch + Duration::from_secs_f64(w));
        let timestamp = self.backend.swap_buffers(native, not_before)?;

        let epoch = self.epoch;
        let info = self
            .pacers
            .entry(index)
            .or_insert_with(|| FramePacer::new(index, epoch))
            .on_swap(&timestamp);

        if clear == ClearMode::Clear {
            self.backend.clear(native, clear_color)?;
            self.registry.mark_drawn(index)?;
        }

        self.scheduler.on_swap(index, &info);
        Ok(info)
    }

    pub fn gpu_stats(&self) -> GpuCallStats {
        self.backend.stats()
    }

    pub fn frame_stats(&self, index: WindowIndex) -> Result<FrameStats> {
        self.registry.get(index)?;
        Ok(self.pacers.get(&index).map(|p| p.stats().clone()).unwrap_or_default())
    }

    pub fn texture_stats(&self) -> TextureStats {
        self.textures.stats()
    }

    pub fn shadow_stats(&self) -> ShadowStats {
        self.shadows.stats()
    }

    pub fn flip_stats(&self) -> FlipStats {
        self.scheduler.stats()
    }

    /// Close every window, newest first, then drop standalone textures
    pub fn shutdown(&mut self) {
        for index in self.registry.indices().into_iter().rev() {
            if !self.registry.contains(index) {
                continue;
            }
            if let Err(e) = self.close_window(index) {
                error!("❌ Failed to close window {} during shutdown: {}", index, e);
            }
        }
        let textures = self.textures.release_standalone(self.backend.as_mut());
        if textures > 0 {
            debug!("Released {} standalone textures", textures);
        }
        let dropped = self.scheduler.clear_all();
        if dropped > 0 {
            debug!("Dropped {} orphaned flip callbacks", dropped);
        }
    }
}

impl Drop for Screen {
    fn drop(&mut self) {
        if !self.registry.is_empty() || !self.textures.is_empty() {
            self.shutdown();
        }
    }
}
