//! Platform surface glue and GPU call interface
//!
//! The core never talks to a windowing system or graphics API directly.
//! Everything native goes through two traits:
//!
//! - [`SurfaceGlue`]: open/close/resize a native window or offscreen buffer
//!   and swap its buffers at the display's vertical blank.
//! - [`GpuOps`]: the handful of GPU calls the core issues against a render
//!   context (blend function, textures, quads, shadow surfaces, readback).
//!
//! A platform implements both and is selected once at startup through
//! [`create`]. Handles returned by a backend are opaque and never leave the
//! window registry or texture manager.

pub mod headless;

use crate::blend::BlendFunc;
use crate::config::{BackendKind, DisplayConfig};
use crate::error::Result;
use crate::geometry::Rect;
use crate::snapshot::FrameImage;
use crate::texture::{FilterMode, TextureTarget};
use std::time::{Duration, Instant};

/// Opaque native window/buffer handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeHandle(pub u64);

/// Opaque render context handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextHandle(pub u64);

/// Opaque GPU texture handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u64);

/// Opaque shadow surface handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShadowHandle(pub u64);

/// What kind of native surface to create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceKind {
    /// Double-buffered window presented at vertical blank
    Onscreen,
    /// Single-buffered offscreen render target
    Offscreen,
}

/// Parameters for [`SurfaceGlue::open_native_surface`]
#[derive(Debug, Clone)]
pub struct SurfaceConfig {
    pub kind: SurfaceKind,
    pub width: u32,
    pub height: u32,
    /// Render into an existing context instead of creating a new one
    pub share_context: Option<ContextHandle>,
}

/// A freshly opened native surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeSurface {
    pub native: NativeHandle,
    pub context: ContextHandle,
    /// Whether the context was created for this surface (as opposed to shared)
    pub owns_context: bool,
}

/// Feature set of a render context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Non-power-of-two rectangle textures with pixel-space coordinates
    pub rectangle_textures: bool,
    /// Auxiliary framebuffer copies for accelerated window copies
    pub shadow_surfaces: bool,
    /// Largest texture edge in texels
    pub max_texture_size: u32,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            rectangle_textures: true,
            shadow_surfaces: true,
            max_texture_size: 8192,
        }
    }
}

/// Timestamps reported by a buffer swap
#[derive(Debug, Clone, Copy)]
pub struct SwapTimestamp {
    /// Vertical blank at which the new frame became visible
    pub vblank: Instant,
    /// When the swap call returned
    pub completed: Instant,
    /// Nominal refresh interval of the display
    pub refresh_interval: Duration,
}

/// Which buffer of a surface to read back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadBuffer {
    /// The buffer currently drawn into
    Back,
    /// The buffer currently presented (same as back for offscreen surfaces)
    Front,
}

/// Storage request for a texture upload
#[derive(Debug, Clone, Copy)]
pub struct TextureDesc {
    pub target: TextureTarget,
    pub width: u32,
    pub height: u32,
}

/// Texture coordinates in the coordinate space of the texture's target
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TexRect {
    pub s0: f64,
    pub t0: f64,
    pub s1: f64,
    pub t1: f64,
}

/// One textured quad
#[derive(Debug, Clone, Copy)]
pub struct QuadDraw {
    pub texture: TextureHandle,
    pub tex_coords: TexRect,
    pub dst: Rect,
    /// Degrees, clockwise on screen, around the centre of `dst`
    pub rotation: f64,
    pub filter: FilterMode,
    /// Colour multiplied into every texel before blending
    pub modulate: [f32; 4],
}

/// Counters of GPU calls issued against a backend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GpuCallStats {
    pub surfaces_opened: u64,
    pub surfaces_closed: u64,
    pub context_switches: u64,
    pub blend_func_calls: u64,
    pub textures_created: u64,
    pub textures_deleted: u64,
    pub quads_drawn: u64,
    pub clears: u64,
    pub readbacks: u64,
    pub shadows_created: u64,
    pub shadow_syncs: u64,
    pub shadows_deleted: u64,
    pub shadow_copies: u64,
    pub direct_copies: u64,
    pub swaps: u64,
}

/// Native window/buffer management
pub trait SurfaceGlue {
    /// Capabilities of a context, or of the platform default when `None`
    fn capabilities(&self, context: Option<ContextHandle>) -> Capabilities;

    fn open_native_surface(&mut self, config: &SurfaceConfig) -> Result<NativeSurface>;

    /// Release a surface; the context goes with it if the surface owns it
    fn close_native_surface(&mut self, native: NativeHandle) -> Result<()>;

    fn resize_native_surface(&mut self, native: NativeHandle, width: u32, height: u32) -> Result<()>;

    /// Present the back buffer, blocking until the vertical blank when synced.
    ///
    /// With `not_before`, the flip happens at the first vertical blank at or
    /// after that instant.
    fn swap_buffers(&mut self, native: NativeHandle, not_before: Option<Instant>) -> Result<SwapTimestamp>;
}

/// GPU calls against a render context
pub trait GpuOps {
    fn make_current(&mut self, context: ContextHandle) -> Result<()>;

    fn set_blend_func(&mut self, context: ContextHandle, func: BlendFunc) -> Result<()>;

    /// Upload RGBA texels (`width * height`, row-major, top row first)
    fn create_texture(
        &mut self,
        context: Option<ContextHandle>,
        desc: &TextureDesc,
        texels: &[[f32; 4]],
    ) -> Result<TextureHandle>;

    fn delete_texture(&mut self, texture: TextureHandle) -> Result<()>;

    /// Draw with the blend function of the target's context
    fn draw_quad(&mut self, target: NativeHandle, quad: &QuadDraw) -> Result<()>;

    fn clear(&mut self, target: NativeHandle, color: [f32; 4]) -> Result<()>;

    fn read_pixels(&mut self, source: NativeHandle, buffer: ReadBuffer) -> Result<FrameImage>;

    fn create_shadow(&mut self, source: NativeHandle) -> Result<ShadowHandle>;

    /// Refresh a shadow from its source's current content
    fn sync_shadow(&mut self, shadow: ShadowHandle, source: NativeHandle) -> Result<()>;

    fn delete_shadow(&mut self, shadow: ShadowHandle) -> Result<()>;

    /// Accelerated copy out of a shadow surface
    fn copy_from_shadow(
        &mut self,
        shadow: ShadowHandle,
        target: NativeHandle,
        src: Rect,
        dst: Rect,
    ) -> Result<()>;

    /// Slow framebuffer-to-framebuffer copy
    fn copy_direct(&mut self, source: NativeHandle, target: NativeHandle, src: Rect, dst: Rect) -> Result<()>;

    fn stats(&self) -> GpuCallStats {
        GpuCallStats::default()
    }
}

/// A complete platform backend
pub trait Backend: SurfaceGlue + GpuOps + Send {}

impl<T: SurfaceGlue + GpuOps + Send> Backend for T {}

/// Instantiate the backend selected by configuration
pub fn create(kind: BackendKind, display: &DisplayConfig) -> Box<dyn Backend> {
    match kind {
        BackendKind::Headless => Box::new(headless::HeadlessBackend::new(
            headless::HeadlessOptions::from_display(display),
        )),
    }
}
