//! Shadow Surface Cache
//!
//! A shadow surface is an auxiliary copy of a window's framebuffer that the
//! backend can copy from quickly. At most one exists per window. It is
//! created on first demand, re-synced when the window content changed since
//! the last sync, and recreated after a resize or explicit invalidation.
//!
//! When a shadow cannot be created the copy falls back to the slow direct
//! path; the caller never sees [`ScreenError::ShadowCreationFailed`].

use crate::backend::{Backend, ShadowHandle};
use crate::error::{Result, ScreenError};
use crate::geometry::Rect;
use crate::window::{WindowIndex, WindowRegistry};
use log::{debug, warn};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
struct ShadowEntry {
    handle: ShadowHandle,
    /// Window size the shadow was allocated for
    size: (u32, u32),
    /// Content generation the shadow was last synced at
    synced_generation: u64,
}

/// Shadow cache counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShadowStats {
    pub created: u64,
    pub resynced: u64,
    pub released: u64,
    pub accelerated_copies: u64,
    pub direct_copies: u64,
    /// Copies that wanted the accelerated path but fell back
    pub fallbacks: u64,
}

/// Per-window shadow surfaces
#[derive(Debug)]
pub struct ShadowSurfaceCache {
    entries: HashMap<WindowIndex, ShadowEntry>,
    /// Windows whose shadow must be recreated on next use
    invalid: Vec<WindowIndex>,
    enabled: bool,
    stats: ShadowStats,
}

impl ShadowSurfaceCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            entries: HashMap::new(),
            invalid: Vec::new(),
            enabled,
            stats: ShadowStats::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn has_shadow(&self, window: WindowIndex) -> bool {
        self.entries.contains_key(&window)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> ShadowStats {
        self.stats.clone()
    }

    /// Shadow of `window`, created or refreshed as needed
    pub fn ensure_shadow(
        &mut self,
        backend: &mut dyn Backend,
        registry: &WindowRegistry,
        window: WindowIndex,
    ) -> Result<ShadowHandle> {
        let record = registry.get(window)?;
        let size = (record.width, record.height);
        let generation = record.content_generation;

        let stale = self.invalid.contains(&window);
        if let Some(entry) = self.entries.get(&window).copied() {
            if !stale && entry.size == size {
                if entry.synced_generation != generation {
                    backend.sync_shadow(entry.handle, record.native)?;
                    if let Some(e) = self.entries.get_mut(&window) {
                        e.synced_generation = generation;
                    }
                    self.stats.resynced += 1;
                }
                return Ok(entry.handle);
            }
            self.release(backend, window);
        }
        self.invalid.retain(|w| *w != window);

        let handle = backend
            .create_shadow(record.native)
            .map_err(|e| ScreenError::ShadowCreationFailed {
                window,
                reason: e.to_string(),
            })?;
        self.entries.insert(
            window,
            ShadowEntry {
                handle,
                size,
                synced_generation: generation,
            },
        );
        self.stats.created += 1;
        debug!("Created shadow surface for window {} ({}x{})", window, size.0, size.1);
        Ok(handle)
    }

    /// Force recreation on the next [`ShadowSurfaceCache::ensure_shadow`]
    pub fn invalidate(&mut self, window: WindowIndex) {
        if self.entries.contains_key(&window) && !self.invalid.contains(&window) {
            self.invalid.push(window);
        }
    }

    /// Drop the shadow of a window; returns whether one existed
    pub fn release(&mut self, backend: &mut dyn Backend, window: WindowIndex) -> bool {
        self.invalid.retain(|w| *w != window);
        let Some(entry) = self.entries.remove(&window) else {
            return false;
        };
        if let Err(e) = backend.delete_shadow(entry.handle) {
            warn!("Failed to delete shadow surface of window {}: {}", window, e);
        }
        self.stats.released += 1;
        true
    }

    /// Copy `src_rect` of `src` into `dst_rect` of `dst`.
    ///
    /// Uses both windows' shadows when possible and falls back to a direct
    /// framebuffer copy otherwise. Rectangles must lie inside their windows;
    /// an empty rectangle makes the copy a no-op.
    pub fn copy_via_shadow(
        &mut self,
        backend: &mut dyn Backend,
        registry: &mut WindowRegistry,
        src: WindowIndex,
        dst: WindowIndex,
        src_rect: Rect,
        dst_rect: Rect,
    ) -> Result<()> {
        registry.check_thread(src)?;
        registry.check_thread(dst)?;
        let (src_native, src_bounds) = {
            let r = registry.get(src)?;
            (r.native, r.rect())
        };
        let (dst_native, dst_bounds) = {
            let r = registry.get(dst)?;
            (r.native, r.rect())
        };

        for (rect, bounds, which) in [(src_rect, src_bounds, src), (dst_rect, dst_bounds, dst)] {
            if !rect.is_valid() || !bounds.contains_rect(&rect) {
                return Err(ScreenError::InvalidArgument(format!(
                    "copy rectangle {:?} outside window {}",
                    rect, which
                )));
            }
        }
        if src_rect.is_empty() || dst_rect.is_empty() {
            debug!("Empty copy rectangle, nothing to copy from {} to {}", src, dst);
            return Ok(());
        }

        registry.make_current(backend, dst)?;

        let accelerated = if self.enabled {
            match self.shadow_pair(backend, registry, src, dst) {
                Ok(shadow) => Some(shadow),
                Err(ScreenError::ShadowCreationFailed { window, reason }) => {
                    warn!(
                        "Shadow surface unavailable for window {} ({}), falling back to direct copy",
                        window, reason
                    );
                    self.stats.fallbacks += 1;
                    None
                }
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        match accelerated {
            Some(shadow) => {
                backend.copy_from_shadow(shadow, dst_native, src_rect, dst_rect)?;
                self.stats.accelerated_copies += 1;
            }
            None => {
                backend.copy_direct(src_native, dst_native, src_rect, dst_rect)?;
                self.stats.direct_copies += 1;
            }
        }

        registry.mark_drawn(dst)?;
        Ok(())
    }

    /// Make sure both windows have shadows; returns the source shadow
    fn shadow_pair(
        &mut self,
        backend: &mut dyn Backend,
        registry: &WindowRegistry,
        src: WindowIndex,
        dst: WindowIndex,
    ) -> Result<ShadowHandle> {
        let shadow = self.ensure_shadow(backend, registry, src)?;
        if dst != src {
            self.ensure_shadow(backend, registry, dst)?;
        }
        Ok(shadow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessBackend, HeadlessOptions};
    use crate::backend::GpuOps;
    use crate::window::WindowConfig;

    fn setup() -> (HeadlessBackend, WindowRegistry, WindowIndex, WindowIndex) {
        let mut backend = HeadlessBackend::new(HeadlessOptions::unsynced());
        let mut registry = WindowRegistry::new();
        let a = registry.open(&mut backend, &WindowConfig::offscreen(8, 8)).unwrap();
        let b = registry.open(&mut backend, &WindowConfig::onscreen(8, 8)).unwrap();
        (backend, registry, a, b)
    }

    #[test]
    fn test_shadow_created_once() {
        let (mut backend, registry, a, _) = setup();
        let mut cache = ShadowSurfaceCache::new(true);

        let first = cache.ensure_shadow(&mut backend, &registry, a).unwrap();
        let second = cache.ensure_shadow(&mut backend, &registry, a).unwrap();

        assert_eq!(first, second);
        assert_eq!(backend.stats().shadows_created, 1);
        assert_eq!(backend.stats().shadow_syncs, 0);
    }

    #[test]
    fn test_content_change_resyncs_instead_of_recreating() {
        let (mut backend, mut registry, a, _) = setup();
        let mut cache = ShadowSurfaceCache::new(true);

        cache.ensure_shadow(&mut backend, &registry, a).unwrap();
        registry.mark_drawn(a).unwrap();
        cache.ensure_shadow(&mut backend, &registry, a).unwrap();

        assert_eq!(backend.stats().shadows_created, 1);
        assert_eq!(backend.stats().shadow_syncs, 1);
    }

    #[test]
    fn test_invalidate_and_resize_recreate() {
        let (mut backend, mut registry, a, _) = setup();
        let mut cache = ShadowSurfaceCache::new(true);

        cache.ensure_shadow(&mut backend, &registry, a).unwrap();
        cache.invalidate(a);
        cache.ensure_shadow(&mut backend, &registry, a).unwrap();
        assert_eq!(backend.stats().shadows_created, 2);
        assert_eq!(backend.stats().shadows_deleted, 1);

        registry.resize(&mut backend, a, 16, 4).unwrap();
        cache.ensure_shadow(&mut backend, &registry, a).unwrap();
        assert_eq!(backend.stats().shadows_created, 3);
        assert_eq!(backend.live_shadows(), 1);
    }

    #[test]
    fn test_creation_failure_falls_back_to_direct_copy() {
        let (mut backend, mut registry, a, b) = setup();
        backend.fault_injector().fail_shadow_creation(true);
        backend.clear(registry.get(a).unwrap().native, [1.0, 0.0, 0.0, 1.0]).unwrap();
        let mut cache = ShadowSurfaceCache::new(true);

        let rect = Rect::from_size(8.0, 8.0);
        cache.copy_via_shadow(&mut backend, &mut registry, a, b, rect, rect).unwrap();

        assert_eq!(cache.stats().fallbacks, 1);
        assert_eq!(cache.stats().direct_copies, 1);
        assert_eq!(backend.stats().direct_copies, 1);

        let image = backend.read_pixels(registry.get(b).unwrap().native, crate::backend::ReadBuffer::Back).unwrap();
        assert_eq!(image.pixel(3, 3), Some([1.0, 0.0, 0.0, 1.0]));
    }

    #[test]
    fn test_copy_rect_outside_window_rejected() {
        let (mut backend, mut registry, a, b) = setup();
        let mut cache = ShadowSurfaceCache::new(true);

        let err = cache
            .copy_via_shadow(
                &mut backend,
                &mut registry,
                a,
                b,
                Rect::new(4.0, 4.0, 12.0, 12.0),
                Rect::from_size(8.0, 8.0),
            )
            .unwrap_err();
        assert!(matches!(err, ScreenError::InvalidArgument(_)));
    }

    #[test]
    fn test_empty_rect_is_noop() {
        let (mut backend, mut registry, a, b) = setup();
        let mut cache = ShadowSurfaceCache::new(true);

        cache
            .copy_via_shadow(&mut backend, &mut registry, a, b, Rect::new(2.0, 2.0, 2.0, 6.0), Rect::from_size(8.0, 8.0))
            .unwrap();
        assert_eq!(backend.stats().shadows_created, 0);
        assert_eq!(backend.stats().direct_copies, 0);
    }

    #[test]
    fn test_disabled_cache_always_copies_directly() {
        let (mut backend, mut registry, a, b) = setup();
        let mut cache = ShadowSurfaceCache::new(false);
        let rect = Rect::from_size(8.0, 8.0);

        cache.copy_via_shadow(&mut backend, &mut registry, a, b, rect, rect).unwrap();
        assert_eq!(cache.stats().direct_copies, 1);
        assert_eq!(cache.stats().fallbacks, 0);
        assert!(cache.is_empty());
    }
}
