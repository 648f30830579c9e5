//! Window Record Registry
//!
//! Every onscreen window and offscreen buffer is a [`WindowRecord`] owned by
//! the [`WindowRegistry`] and addressed by an opaque [`WindowIndex`]. The
//! registry is the only place that sees native and context handles; the
//! rest of the core asks it for them by index.
//!
//! Offscreen windows opened with a `parent` render into the parent's
//! context. The registry tracks which window last pushed blend state into a
//! shared context so that lazy blend application stays correct across
//! aliases, and it switches contexts lazily.

use crate::backend::{Backend, Capabilities, ContextHandle, GpuOps, NativeHandle, SurfaceConfig, SurfaceKind};
use crate::blend::BlendState;
use crate::config::MAX_WINDOW_EDGE;
use crate::error::{Result, ScreenError};
use crate::geometry::Rect;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fmt;
use std::thread::{self, ThreadId};

/// Stable identifier of a window, never reused within one registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowIndex(pub u32);

impl fmt::Display for WindowIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Window kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    /// Double-buffered, presented by `swap`
    Onscreen,
    /// Single-buffered render target
    Offscreen,
}

impl From<WindowKind> for SurfaceKind {
    fn from(kind: WindowKind) -> Self {
        match kind {
            WindowKind::Onscreen => SurfaceKind::Onscreen,
            WindowKind::Offscreen => SurfaceKind::Offscreen,
        }
    }
}

/// Parameters for opening a window
#[derive(Debug, Clone, PartialEq)]
pub struct WindowConfig {
    pub kind: WindowKind,
    pub width: u32,
    pub height: u32,
    /// Share this window's render context (offscreen windows only)
    pub parent: Option<WindowIndex>,
    pub clear_color: [f32; 4],
    /// Clear the back buffer to `clear_color` after every flip
    pub clear_after_flip: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            kind: WindowKind::Onscreen,
            width: 800,
            height: 600,
            parent: None,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            clear_after_flip: false,
        }
    }
}

impl WindowConfig {
    pub fn onscreen(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }

    pub fn offscreen(width: u32, height: u32) -> Self {
        Self {
            kind: WindowKind::Offscreen,
            width,
            height,
            ..Self::default()
        }
    }

    pub fn with_parent(mut self, parent: WindowIndex) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_clear_after_flip(mut self, enabled: bool) -> Self {
        self.clear_after_flip = enabled;
        self
    }
}

/// One onscreen or offscreen surface
#[derive(Debug)]
pub struct WindowRecord {
    pub index: WindowIndex,
    pub kind: WindowKind,
    pub(crate) native: NativeHandle,
    pub(crate) context: ContextHandle,
    pub(crate) owns_context: bool,
    pub parent: Option<WindowIndex>,
    pub width: u32,
    pub height: u32,
    pub clear_color: [f32; 4],
    pub clear_after_flip: bool,
    pub capabilities: Capabilities,
    pub(crate) blend: BlendState,
    /// Bumped on every draw into the window
    pub content_generation: u64,
    owner_thread: ThreadId,
}

impl WindowRecord {
    /// Full window rectangle in its own pixel space
    pub fn rect(&self) -> Rect {
        Rect::from_size(self.width as f64, self.height as f64)
    }

    pub fn is_onscreen(&self) -> bool {
        self.kind == WindowKind::Onscreen
    }

    pub fn blend(&self) -> &BlendState {
        &self.blend
    }

    pub fn owns_context(&self) -> bool {
        self.owns_context
    }
}

fn check_size(width: u32, height: u32) -> std::result::Result<(), String> {
    if width == 0 || height == 0 {
        return Err(format!("window size {}x{} is empty", width, height));
    }
    if width > MAX_WINDOW_EDGE || height > MAX_WINDOW_EDGE {
        return Err(format!(
            "window size {}x{} exceeds {} pixels per edge",
            width, height, MAX_WINDOW_EDGE
        ));
    }
    Ok(())
}

/// Owner of all live window records
#[derive(Debug, Default)]
pub struct WindowRegistry {
    windows: HashMap<WindowIndex, WindowRecord>,
    next_index: u32,
    current_context: Option<ContextHandle>,
    /// Which window last pushed its blend state into each context
    blend_owner: HashMap<ContextHandle, WindowIndex>,
}

impl WindowRegistry {
    pub fn new() -> Self {
        Self {
            next_index: 1,
            ..Self::default()
        }
    }

    /// Open a native surface and register it. All-or-nothing.
    pub fn open(&mut self, backend: &mut dyn Backend, config: &WindowConfig) -> Result<WindowIndex> {
        check_size(config.width, config.height).map_err(ScreenError::WindowOpenFailed)?;

        let share_context = match config.parent {
            Some(parent) => {
                if config.kind != WindowKind::Offscreen {
                    return Err(ScreenError::InvalidArgument(
                        "only offscreen windows can share a parent's context".to_string(),
                    ));
                }
                self.check_thread(parent)?;
                Some(self.get(parent)?.context)
            }
            None => None,
        };

        let surface = backend
            .open_native_surface(&SurfaceConfig {
                kind: config.kind.into(),
                width: config.width,
                height: config.height,
                share_context,
            })
            .map_err(|e| ScreenError::WindowOpenFailed(e.to_string()))?;

        if let Some(owner) = self.windows.values().find(|w| w.native == surface.native) {
            warn!(
                "Native handle {:?} is already owned by window {}, refusing new window",
                surface.native, owner.index
            );
            return Err(ScreenError::WindowOpenFailed(format!(
                "native handle {:?} already owned by window {}",
                surface.native, owner.index
            )));
        }

        let index = WindowIndex(self.next_index);
        self.next_index += 1;

        let record = WindowRecord {
            index,
            kind: config.kind,
            native: surface.native,
            context: surface.context,
            owns_context: surface.owns_context,
            parent: config.parent,
            width: config.width,
            height: config.height,
            clear_color: config.clear_color,
            clear_after_flip: config.clear_after_flip,
            capabilities: backend.capabilities(Some(surface.context)),
            blend: BlendState::new(),
            content_generation: 0,
            owner_thread: thread::current().id(),
        };
        self.windows.insert(index, record);

        info!(
            "🪟 Opened {:?} window {} ({}x{})",
            config.kind, index, config.width, config.height
        );
        Ok(index)
    }

    pub fn get(&self, index: WindowIndex) -> Result<&WindowRecord> {
        self.windows.get(&index).ok_or(ScreenError::InvalidWindowIndex(index))
    }

    pub fn get_mut(&mut self, index: WindowIndex) -> Result<&mut WindowRecord> {
        self.windows.get_mut(&index).ok_or(ScreenError::InvalidWindowIndex(index))
    }

    pub fn contains(&self, index: WindowIndex) -> bool {
        self.windows.contains_key(&index)
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Live indices in opening order
    pub fn indices(&self) -> Vec<WindowIndex> {
        let mut indices: Vec<_> = self.windows.keys().copied().collect();
        indices.sort();
        indices
    }

    /// Windows rendering into the context owned by `index`, in opening order
    pub fn context_aliases(&self, index: WindowIndex) -> Result<Vec<WindowIndex>> {
        let record = self.get(index)?;
        if !record.owns_context {
            return Ok(Vec::new());
        }
        let context = record.context;
        let mut aliases: Vec<_> = self
            .windows
            .values()
            .filter(|w| w.index != index && w.context == context)
            .map(|w| w.index)
            .collect();
        aliases.sort();
        Ok(aliases)
    }

    /// Fail unless called from the thread that opened the window
    pub fn check_thread(&self, index: WindowIndex) -> Result<()> {
        let record = self.get(index)?;
        if record.owner_thread != thread::current().id() {
            return Err(ScreenError::ContextThreadViolation(index));
        }
        Ok(())
    }

    /// Make the window's context current, issuing a backend call only on change
    pub fn make_current<G: GpuOps + ?Sized>(&mut self, gpu: &mut G, index: WindowIndex) -> Result<ContextHandle> {
        self.check_thread(index)?;
        let context = self.get(index)?.context;
        if self.current_context != Some(context) {
            gpu.make_current(context)?;
            self.current_context = Some(context);
            debug!("Context {:?} current for window {}", context, index);
        }
        Ok(context)
    }

    /// Bring the context into the state a blending-dependent draw needs
    pub fn prepare_draw<G: GpuOps + ?Sized>(&mut self, gpu: &mut G, index: WindowIndex) -> Result<()> {
        let context = self.make_current(gpu, index)?;

        let previous = self.blend_owner.insert(context, index);
        let record = self.get_mut(index)?;
        if previous.is_some_and(|p| p != index) {
            record.blend.mark_context_lost();
        }
        record.blend.apply_if_dirty(gpu, context)?;
        Ok(())
    }

    /// Record that the window's framebuffer content changed
    pub fn mark_drawn(&mut self, index: WindowIndex) -> Result<u64> {
        let record = self.get_mut(index)?;
        record.content_generation += 1;
        Ok(record.content_generation)
    }

    pub fn resize(&mut self, backend: &mut dyn Backend, index: WindowIndex, width: u32, height: u32) -> Result<()> {
        check_size(width, height).map_err(ScreenError::InvalidArgument)?;
        self.check_thread(index)?;
        let native = self.get(index)?.native;
        backend.resize_native_surface(native, width, height)?;

        let record = self.get_mut(index)?;
        record.width = width;
        record.height = height;
        record.content_generation += 1;
        debug!("Resized window {} to {}x{}", index, width, height);
        Ok(())
    }

    /// Remove the record and release its native surface.
    ///
    /// The record is gone even when the release fails; the failure is
    /// reported as [`ScreenError::NativeReleaseFailed`].
    pub fn remove(&mut self, backend: &mut dyn Backend, index: WindowIndex) -> Result<WindowRecord> {
        let record = self.windows.remove(&index).ok_or(ScreenError::InvalidWindowIndex(index))?;

        // An alias leaves its entry behind: the shared context still holds
        // its blend state, so the next draw by any other window re-applies.
        if record.owns_context {
            self.blend_owner.remove(&record.context);
            if self.current_context == Some(record.context) {
                self.current_context = None;
            }
        }

        if let Err(e) = backend.close_native_surface(record.native) {
            return Err(ScreenError::NativeReleaseFailed {
                window: index,
                reason: e.to_string(),
            });
        }

        debug!("Closed window {}", index);
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessBackend, HeadlessOptions};
    use crate::blend::BlendFunc;

    fn backend() -> HeadlessBackend {
        HeadlessBackend::new(HeadlessOptions::unsynced())
    }

    #[test]
    fn test_indices_are_never_reused() {
        let mut backend = backend();
        let mut registry = WindowRegistry::new();

        let a = registry.open(&mut backend, &WindowConfig::onscreen(4, 4)).unwrap();
        registry.remove(&mut backend, a).unwrap();
        let b = registry.open(&mut backend, &WindowConfig::onscreen(4, 4)).unwrap();

        assert_ne!(a, b);
        assert!(matches!(registry.get(a), Err(ScreenError::InvalidWindowIndex(i)) if i == a));
    }

    #[test]
    fn test_failed_open_registers_nothing() {
        let mut backend = backend();
        backend.fault_injector().fail_next_opens(1);
        let mut registry = WindowRegistry::new();

        let err = registry.open(&mut backend, &WindowConfig::onscreen(4, 4)).unwrap_err();
        assert!(matches!(err, ScreenError::WindowOpenFailed(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_native_handle_rejected() {
        let mut backend = backend();
        let faults = backend.fault_injector();
        let mut registry = WindowRegistry::new();

        let a = registry.open(&mut backend, &WindowConfig::onscreen(4, 4)).unwrap();
        faults.alias_next_native(registry.get(a).unwrap().native);

        let err = registry.open(&mut backend, &WindowConfig::onscreen(4, 4)).unwrap_err();
        assert!(matches!(err, ScreenError::WindowOpenFailed(_)));
        assert_eq!(registry.len(), 1);
        assert_eq!(backend.live_surfaces(), 1);
    }

    #[test]
    fn test_offscreen_child_shares_context() {
        let mut backend = backend();
        let mut registry = WindowRegistry::new();

        let parent = registry.open(&mut backend, &WindowConfig::onscreen(8, 8)).unwrap();
        let child = registry
            .open(&mut backend, &WindowConfig::offscreen(4, 4).with_parent(parent))
            .unwrap();

        assert_eq!(registry.get(parent).unwrap().context, registry.get(child).unwrap().context);
        assert!(!registry.get(child).unwrap().owns_context());
        assert_eq!(registry.context_aliases(parent).unwrap(), vec![child]);
        assert!(registry.context_aliases(child).unwrap().is_empty());
    }

    #[test]
    fn test_onscreen_child_rejected() {
        let mut backend = backend();
        let mut registry = WindowRegistry::new();
        let parent = registry.open(&mut backend, &WindowConfig::onscreen(8, 8)).unwrap();

        let err = registry
            .open(&mut backend, &WindowConfig::onscreen(4, 4).with_parent(parent))
            .unwrap_err();
        assert!(matches!(err, ScreenError::InvalidArgument(_)));
    }

    #[test]
    fn test_make_current_is_lazy() {
        let mut backend = backend();
        let mut registry = WindowRegistry::new();
        let a = registry.open(&mut backend, &WindowConfig::onscreen(4, 4)).unwrap();
        let b = registry.open(&mut backend, &WindowConfig::onscreen(4, 4)).unwrap();

        registry.make_current(&mut backend, a).unwrap();
        registry.make_current(&mut backend, a).unwrap();
        registry.make_current(&mut backend, b).unwrap();
        registry.make_current(&mut backend, b).unwrap();

        assert_eq!(backend.stats().context_switches, 2);
    }

    #[test]
    fn test_shared_context_reapplies_blend_after_alias_draw() {
        let mut backend = backend();
        let mut registry = WindowRegistry::new();
        let parent = registry.open(&mut backend, &WindowConfig::onscreen(4, 4)).unwrap();
        let child = registry
            .open(&mut backend, &WindowConfig::offscreen(4, 4).with_parent(parent))
            .unwrap();

        registry.get_mut(parent).unwrap().blend.set(BlendFunc::ALPHA).unwrap();
        registry.prepare_draw(&mut backend, parent).unwrap();
        registry.prepare_draw(&mut backend, parent).unwrap();
        assert_eq!(backend.stats().blend_func_calls, 1);

        registry.prepare_draw(&mut backend, child).unwrap();
        registry.prepare_draw(&mut backend, parent).unwrap();
        assert_eq!(backend.stats().blend_func_calls, 3);
    }

    #[test]
    fn test_closed_alias_forces_blend_reapply_on_owner() {
        let mut backend = backend();
        let mut registry = WindowRegistry::new();
        let parent = registry.open(&mut backend, &WindowConfig::offscreen(4, 4)).unwrap();
        let child = registry
            .open(&mut backend, &WindowConfig::offscreen(4, 4).with_parent(parent))
            .unwrap();

        registry.get_mut(parent).unwrap().blend.set(BlendFunc::ALPHA).unwrap();
        registry.prepare_draw(&mut backend, parent).unwrap();
        registry.prepare_draw(&mut backend, child).unwrap();
        assert_eq!(backend.stats().blend_func_calls, 2);

        registry.remove(&mut backend, child).unwrap();
        registry.prepare_draw(&mut backend, parent).unwrap();
        assert_eq!(backend.stats().blend_func_calls, 3);
        assert_eq!(registry.get(parent).unwrap().blend().applied(), Some(BlendFunc::ALPHA));
    }

    #[test]
    fn test_oversized_window_rejected() {
        let mut backend = backend();
        let mut registry = WindowRegistry::new();

        let err = registry
            .open(&mut backend, &WindowConfig::offscreen(MAX_WINDOW_EDGE + 1, 4))
            .unwrap_err();
        assert!(matches!(err, ScreenError::WindowOpenFailed(_)));
        assert_eq!(backend.live_surfaces(), 0);

        let a = registry.open(&mut backend, &WindowConfig::offscreen(4, 4)).unwrap();
        let err = registry.resize(&mut backend, a, 4, MAX_WINDOW_EDGE + 1).unwrap_err();
        assert!(matches!(err, ScreenError::InvalidArgument(_)));
        assert_eq!(registry.get(a).unwrap().height, 4);
    }

    #[test]
    fn test_remove_reports_release_failure_but_drops_record() {
        let mut backend = backend();
        let mut registry = WindowRegistry::new();
        let a = registry.open(&mut backend, &WindowConfig::onscreen(4, 4)).unwrap();

        backend.fault_injector().fail_closes(true);
        let err = registry.remove(&mut backend, a).unwrap_err();
        assert!(matches!(err, ScreenError::NativeReleaseFailed { window, .. } if window == a));
        assert!(!registry.contains(a));
    }

    #[test]
    fn test_other_thread_is_rejected() {
        let mut backend = backend();
        let mut registry = WindowRegistry::new();
        let a = registry.open(&mut backend, &WindowConfig::onscreen(4, 4)).unwrap();

        let result = std::thread::spawn(move || registry.check_thread(a)).join().unwrap();
        assert!(matches!(result, Err(ScreenError::ContextThreadViolation(i)) if i == a));
    }
}
