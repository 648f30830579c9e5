//! Headless software backend
//!
//! Implements the surface glue and GPU calls entirely in memory: every
//! surface is an RGBA float framebuffer, textures are texel arrays with
//! GL-like addressing (pixel-space rectangle targets, normalized
//! power-of-two 2D targets), and buffer swaps wait for a simulated vertical
//! blank derived from the configured refresh rate.
//!
//! It counts every GPU call in [`GpuCallStats`] and accepts scripted
//! failures through a [`FaultInjector`], which makes it the backend of
//! choice for tests and for running stimulus scripts without a display.

use super::{
    Capabilities, ContextHandle, GpuCallStats, GpuOps, NativeHandle, NativeSurface, QuadDraw, ReadBuffer,
    ShadowHandle, SurfaceConfig, SurfaceGlue, SurfaceKind, SwapTimestamp, TextureDesc, TextureHandle,
};
use crate::blend::BlendFunc;
use crate::config::DisplayConfig;
use crate::error::{Result, ScreenError};
use crate::geometry::Rect;
use crate::snapshot::FrameImage;
use crate::texture::{coords, FilterMode, TextureTarget};
use cgmath::{Basis2, Deg, Rotation, Rotation2, Vector2};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Tunables of the simulated display and GPU
#[derive(Debug, Clone)]
pub struct HeadlessOptions {
    /// Simulated display refresh rate (Hz)
    pub refresh_rate_hz: f64,
    /// Block in `swap_buffers` until the next simulated vertical blank
    pub sync_to_vblank: bool,
    /// Advertise rectangle texture support
    pub rectangle_textures: bool,
    /// Advertise shadow surface support
    pub shadow_surfaces: bool,
    pub max_texture_size: u32,
}

impl Default for HeadlessOptions {
    fn default() -> Self {
        Self {
            refresh_rate_hz: 60.0,
            sync_to_vblank: true,
            rectangle_textures: true,
            shadow_surfaces: true,
            max_texture_size: 8192,
        }
    }
}

impl HeadlessOptions {
    pub fn from_display(display: &DisplayConfig) -> Self {
        Self {
            refresh_rate_hz: display.refresh_rate_hz,
            sync_to_vblank: display.sync_to_vblank,
            ..Self::default()
        }
    }

    /// No vblank wait; handy for tests
    pub fn unsynced() -> Self {
        Self {
            sync_to_vblank: false,
            ..Self::default()
        }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            rectangle_textures: self.rectangle_textures,
            shadow_surfaces: self.shadow_surfaces,
            max_texture_size: self.max_texture_size,
        }
    }
}

/// Scripted failures for the headless backend
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Number of upcoming `open_native_surface` calls to fail
    pub fail_opens: u32,
    /// Fail every `close_native_surface` (the surface is still released)
    pub fail_closes: bool,
    /// Fail every `create_shadow`
    pub fail_shadow_creation: bool,
    /// Fail every `clear`
    pub fail_clears: bool,
    /// Hand out this native handle on the next open instead of a fresh one
    pub alias_next_native: Option<NativeHandle>,
}

/// Shared handle to a backend's [`FaultPlan`], usable after the backend moved
#[derive(Debug, Clone, Default)]
pub struct FaultInjector(Arc<Mutex<FaultPlan>>);

impl FaultInjector {
    pub fn fail_next_opens(&self, count: u32) {
        self.0.lock().fail_opens = count;
    }

    pub fn fail_closes(&self, enabled: bool) {
        self.0.lock().fail_closes = enabled;
    }

    pub fn fail_shadow_creation(&self, enabled: bool) {
        self.0.lock().fail_shadow_creation = enabled;
    }

    pub fn fail_clears(&self, enabled: bool) {
        self.0.lock().fail_clears = enabled;
    }

    pub fn alias_next_native(&self, native: NativeHandle) {
        self.0.lock().alias_next_native = Some(native);
    }

    pub fn plan(&self) -> FaultPlan {
        self.0.lock().clone()
    }

    fn take_open_failure(&self) -> bool {
        let mut plan = self.0.lock();
        if plan.fail_opens > 0 {
            plan.fail_opens -= 1;
            true
        } else {
            false
        }
    }

    fn take_alias(&self) -> Option<NativeHandle> {
        self.0.lock().alias_next_native.take()
    }
}

#[derive(Debug)]
struct SurfaceState {
    kind: SurfaceKind,
    width: u32,
    height: u32,
    context: ContextHandle,
    owns_context: bool,
    back: Vec<[f32; 4]>,
    front: Vec<[f32; 4]>,
}

#[derive(Debug)]
struct ContextState {
    blend: BlendFunc,
}

#[derive(Debug)]
struct TextureStorage {
    target: TextureTarget,
    storage_width: u32,
    storage_height: u32,
    texels: Vec<[f32; 4]>,
    /// Exact power-of-two 2D textures repeat; everything else clamps
    wrap: bool,
}

#[derive(Debug)]
struct ShadowStorage {
    width: u32,
    height: u32,
    pixels: Vec<[f32; 4]>,
}

/// In-memory implementation of [`SurfaceGlue`] and [`GpuOps`]
pub struct HeadlessBackend {
    options: HeadlessOptions,
    epoch: Instant,
    next_id: u64,
    surfaces: HashMap<NativeHandle, SurfaceState>,
    contexts: HashMap<ContextHandle, ContextState>,
    textures: HashMap<TextureHandle, TextureStorage>,
    shadows: HashMap<ShadowHandle, ShadowStorage>,
    current_context: Option<ContextHandle>,
    stats: GpuCallStats,
    faults: FaultInjector,
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(HeadlessOptions::default())
    }
}

impl HeadlessBackend {
    pub fn new(options: HeadlessOptions) -> Self {
        info!(
            "🖥️ Headless backend: {:.1}Hz, vsync={}, rect_textures={}, shadows={}",
            options.refresh_rate_hz, options.sync_to_vblank, options.rectangle_textures, options.shadow_surfaces
        );
        Self {
            options,
            epoch: Instant::now(),
            next_id: 1,
            surfaces: HashMap::new(),
            contexts: HashMap::new(),
            textures: HashMap::new(),
            shadows: HashMap::new(),
            current_context: None,
            stats: GpuCallStats::default(),
            faults: FaultInjector::default(),
        }
    }

    /// Handle for scripting failures after the backend was handed over
    pub fn fault_injector(&self) -> FaultInjector {
        self.faults.clone()
    }

    pub fn stats(&self) -> GpuCallStats {
        self.stats.clone()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_shadows(&self) -> usize {
        self.shadows.len()
    }

    pub fn live_surfaces(&self) -> usize {
        self.surfaces.len()
    }

    fn refresh_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.options.refresh_rate_hz.max(1.0))
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn surface(&self, native: NativeHandle) -> Result<&SurfaceState> {
        self.surfaces
            .get(&native)
            .ok_or_else(|| ScreenError::Backend(format!("unknown native surface {:?}", native)))
    }

    /// Time until the next simulated vertical blank after `now`
    fn next_vblank(&self, now: Instant) -> Instant {
        let period = self.refresh_interval().as_nanos().max(1);
        let elapsed = now.duration_since(self.epoch).as_nanos();
        let ticks = elapsed / period + 1;
        self.epoch + Duration::from_nanos((ticks * period) as u64)
    }

    /// First simulated vertical blank at or after `t`
    fn vblank_at_or_after(&self, t: Instant) -> Instant {
        let period = self.refresh_interval().as_nanos().max(1);
        let elapsed = t.saturating_duration_since(self.epoch).as_nanos();
        let ticks = elapsed.div_ceil(period);
        self.epoch + Duration::from_nanos((ticks * period) as u64)
    }
}

impl SurfaceGlue for HeadlessBackend {
    fn capabilities(&self, _context: Option<ContextHandle>) -> Capabilities {
        self.options.capabilities()
    }

    fn open_native_surface(&mut self, config: &SurfaceConfig) -> Result<NativeSurface> {
        if self.faults.take_open_failure() {
            return Err(ScreenError::Backend("injected native surface failure".to_string()));
        }
        if config.width == 0 || config.height == 0 {
            return Err(ScreenError::Backend(format!(
                "surface size {}x{} is empty",
                config.width, config.height
            )));
        }

        let native = match self.faults.take_alias() {
            Some(alias) => {
                // A glue handing back a live handle returns the existing surface untouched
                if let Some(existing) = self.surfaces.get(&alias) {
                    warn!("Native handle {:?} handed out twice", alias);
                    return Ok(NativeSurface {
                        native: alias,
                        context: existing.context,
                        owns_context: false,
                    });
                }
                alias
            }
            None => NativeHandle(self.alloc_id()),
        };

        let (context, owns_context) = match config.share_context {
            Some(shared) => {
                if !self.contexts.contains_key(&shared) {
                    return Err(ScreenError::Backend(format!("cannot share unknown context {:?}", shared)));
                }
                (shared, false)
            }
            None => {
                let ctx = ContextHandle(self.alloc_id());
                self.contexts.insert(ctx, ContextState { blend: BlendFunc::REPLACE });
                (ctx, true)
            }
        };

        let len = (config.width as usize) * (config.height as usize);
        let front = match config.kind {
            SurfaceKind::Onscreen => vec![[0.0; 4]; len],
            SurfaceKind::Offscreen => Vec::new(),
        };

        self.surfaces.insert(
            native,
            SurfaceState {
                kind: config.kind,
                width: config.width,
                height: config.height,
                context,
                owns_context,
                back: vec![[0.0; 4]; len],
                front,
            },
        );
        self.stats.surfaces_opened += 1;

        debug!(
            "Opened {:?} surface {:?} ({}x{}) on context {:?}",
            config.kind, native, config.width, config.height, context
        );
        Ok(NativeSurface {
            native,
            context,
            owns_context,
        })
    }

    fn close_native_surface(&mut self, native: NativeHandle) -> Result<()> {
        let surface = self
            .surfaces
            .remove(&native)
            .ok_or_else(|| ScreenError::Backend(format!("unknown native surface {:?}", native)))?;

        if surface.owns_context {
            self.contexts.remove(&surface.context);
            if self.current_context == Some(surface.context) {
                self.current_context = None;
            }
        }
        self.stats.surfaces_closed += 1;

        if self.faults.plan().fail_closes {
            return Err(ScreenError::Backend("injected native release failure".to_string()));
        }
        Ok(())
    }

    fn resize_native_surface(&mut self, native: NativeHandle, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(ScreenError::Backend(format!("surface size {}x{} is empty", width, height)));
        }
        let surface = self
            .surfaces
            .get_mut(&native)
            .ok_or_else(|| ScreenError::Backend(format!("unknown native surface {:?}", native)))?;

        let len = (width as usize) * (height as usize);
        surface.width = width;
        surface.height = height;
        surface.back = vec![[0.0; 4]; len];
        if surface.kind == SurfaceKind::Onscreen {
            surface.front = vec![[0.0; 4]; len];
        }
        Ok(())
    }

    fn swap_buffers(&mut self, native: NativeHandle, not_before: Option<Instant>) -> Result<SwapTimestamp> {
        let refresh_interval = self.refresh_interval();
        let now = Instant::now();
        let deadline = not_before.filter(|t| *t > now);
        let vblank = if self.options.sync_to_vblank {
            let target = match deadline {
                Some(t) => self.vblank_at_or_after(t),
                None => self.next_vblank(now),
            };
            std::thread::sleep(target.saturating_duration_since(Instant::now()));
            target
        } else if let Some(t) = deadline {
            std::thread::sleep(t.saturating_duration_since(Instant::now()));
            Instant::now().max(t)
        } else {
            now
        };

        let surface = self
            .surfaces
            .get_mut(&native)
            .ok_or_else(|| ScreenError::Backend(format!("unknown native surface {:?}", native)))?;
        if surface.kind != SurfaceKind::Onscreen {
            return Err(ScreenError::Backend(format!("surface {:?} is not double buffered", native)));
        }
        surface.front.copy_from_slice(&surface.back);
        self.stats.swaps += 1;

        Ok(SwapTimestamp {
            vblank,
            completed: Instant::now(),
            refresh_interval,
        })
    }
}

fn fetch(tex: &TextureStorage, x: i64, y: i64) -> [f32; 4] {
    let w = tex.storage_width as i64;
    let h = tex.storage_height as i64;
    let (x, y) = if tex.wrap {
        (x.rem_euclid(w), y.rem_euclid(h))
    } else {
        (x.clamp(0, w - 1), y.clamp(0, h - 1))
    };
    tex.texels[(y * w + x) as usize]
}

fn sample(tex: &TextureStorage, s: f64, t: f64, filter: FilterMode) -> [f32; 4] {
    let (x, y) = match tex.target {
        TextureTarget::Rectangle => (s, t),
        TextureTarget::Power2D => (s * tex.storage_width as f64, t * tex.storage_height as f64),
    };

    match filter {
        FilterMode::Nearest => fetch(tex, x.floor() as i64, y.floor() as i64),
        FilterMode::Linear => {
            let fx = x - 0.5;
            let fy = y - 0.5;
            let x0 = fx.floor();
            let y0 = fy.floor();
            let ax = (fx - x0) as f32;
            let ay = (fy - y0) as f32;
            let (x0, y0) = (x0 as i64, y0 as i64);

            let c00 = fetch(tex, x0, y0);
            let c10 = fetch(tex, x0 + 1, y0);
            let c01 = fetch(tex, x0, y0 + 1);
            let c11 = fetch(tex, x0 + 1, y0 + 1);

            let mut out = [0.0f32; 4];
            for i in 0..4 {
                let top = c00[i] * (1.0 - ax) + c10[i] * ax;
                let bottom = c01[i] * (1.0 - ax) + c11[i] * ax;
                out[i] = top * (1.0 - ay) + bottom * ay;
            }
            out
        }
    }
}

/// Nearest-neighbour scaled copy between two pixel grids, no blending
#[allow(clippy::too_many_arguments)]
fn copy_scaled(
    src: &[[f32; 4]],
    src_width: u32,
    src_height: u32,
    src_rect: Rect,
    dst: &mut [[f32; 4]],
    dst_width: u32,
    dst_height: u32,
    dst_rect: Rect,
) {
    if src_rect.is_empty() || dst_rect.is_empty() {
        return;
    }
    let x0 = dst_rect.left.floor().max(0.0) as u32;
    let y0 = dst_rect.top.floor().max(0.0) as u32;
    let x1 = (dst_rect.right.ceil().max(0.0) as u32).min(dst_width);
    let y1 = (dst_rect.bottom.ceil().max(0.0) as u32).min(dst_height);
    let sx = src_rect.width() / dst_rect.width();
    let sy = src_rect.height() / dst_rect.height();

    for py in y0..y1 {
        let cy = py as f64 + 0.5;
        if cy < dst_rect.top || cy >= dst_rect.bottom {
            continue;
        }
        let src_y = (src_rect.top + (cy - dst_rect.top) * sy).floor() as i64;
        let src_y = src_y.clamp(0, src_height as i64 - 1) as usize;
        for px in x0..x1 {
            let cx = px as f64 + 0.5;
            if cx < dst_rect.left || cx >= dst_rect.right {
                continue;
            }
            let src_x = (src_rect.left + (cx - dst_rect.left) * sx).floor() as i64;
            let src_x = src_x.clamp(0, src_width as i64 - 1) as usize;
            dst[(py as usize) * (dst_width as usize) + px as usize] = src[src_y * (src_width as usize) + src_x];
        }
    }
}

impl GpuOps for HeadlessBackend {
    fn make_current(&mut self, context: ContextHandle) -> Result<()> {
        if !self.contexts.contains_key(&context) {
            return Err(ScreenError::Backend(format!("unknown context {:?}", context)));
        }
        self.current_context = Some(context);
        self.stats.context_switches += 1;
        Ok(())
    }

    fn set_blend_func(&mut self, context: ContextHandle, func: BlendFunc) -> Result<()> {
        let ctx = self
            .contexts
            .get_mut(&context)
            .ok_or_else(|| ScreenError::Backend(format!("unknown context {:?}", context)))?;
        ctx.blend = func;
        self.stats.blend_func_calls += 1;
        Ok(())
    }

    fn create_texture(
        &mut self,
        context: Option<ContextHandle>,
        desc: &TextureDesc,
        texels: &[[f32; 4]],
    ) -> Result<TextureHandle> {
        if let Some(ctx) = context {
            if !self.contexts.contains_key(&ctx) {
                return Err(ScreenError::Backend(format!("unknown context {:?}", ctx)));
            }
        }
        let caps = self.options.capabilities();
        if desc.width == 0 || desc.height == 0 {
            return Err(ScreenError::Backend("texture has zero size".to_string()));
        }
        if desc.width > caps.max_texture_size || desc.height > caps.max_texture_size {
            return Err(ScreenError::Backend(format!(
                "texture {}x{} exceeds max size {}",
                desc.width, desc.height, caps.max_texture_size
            )));
        }
        if texels.len() != (desc.width as usize) * (desc.height as usize) {
            return Err(ScreenError::Backend(format!(
                "texel count {} does not match {}x{}",
                texels.len(),
                desc.width,
                desc.height
            )));
        }

        if desc.target == TextureTarget::Rectangle && !caps.rectangle_textures {
            return Err(ScreenError::Backend("rectangle textures unsupported".to_string()));
        }

        let (storage_width, storage_height) = coords::storage_size(desc.target, desc.width, desc.height);
        let texels = if (storage_width, storage_height) == (desc.width, desc.height) {
            texels.to_vec()
        } else {
            let mut padded = vec![[0.0; 4]; (storage_width as usize) * (storage_height as usize)];
            for (row, chunk) in texels.chunks_exact(desc.width as usize).enumerate() {
                let start = row * storage_width as usize;
                padded[start..start + chunk.len()].copy_from_slice(chunk);
            }
            padded
        };
        let storage = TextureStorage {
            target: desc.target,
            storage_width,
            storage_height,
            texels,
            wrap: coords::wraps(desc.target, desc.width, desc.height),
        };

        let handle = TextureHandle(self.alloc_id());
        self.textures.insert(handle, storage);
        self.stats.textures_created += 1;
        Ok(handle)
    }

    fn delete_texture(&mut self, texture: TextureHandle) -> Result<()> {
        self.textures
            .remove(&texture)
            .ok_or_else(|| ScreenError::Backend(format!("unknown texture {:?}", texture)))?;
        self.stats.textures_deleted += 1;
        Ok(())
    }

    fn draw_quad(&mut self, target: NativeHandle, quad: &QuadDraw) -> Result<()> {
        let tex = self
            .textures
            .get(&quad.texture)
            .ok_or_else(|| ScreenError::Backend(format!("unknown texture {:?}", quad.texture)))?;
        let surface = self
            .surfaces
            .get_mut(&target)
            .ok_or_else(|| ScreenError::Backend(format!("unknown native surface {:?}", target)))?;
        let blend = self
            .contexts
            .get(&surface.context)
            .map(|c| c.blend)
            .ok_or_else(|| ScreenError::Backend(format!("context of {:?} is gone", target)))?;

        self.stats.quads_drawn += 1;

        let dst = quad.dst;
        if dst.is_empty() || !dst.is_valid() {
            return Ok(());
        }

        let (cx, cy) = dst.center();
        let forward: Basis2<f64> = Rotation2::from_angle(Deg(quad.rotation));
        let inverse: Basis2<f64> = Rotation2::from_angle(Deg(-quad.rotation));

        let corners = [
            (dst.left, dst.top),
            (dst.right, dst.top),
            (dst.right, dst.bottom),
            (dst.left, dst.bottom),
        ];
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (f64::MAX, f64::MAX, f64::MIN, f64::MIN);
        for (x, y) in corners {
            let r = forward.rotate_vector(Vector2::new(x - cx, y - cy));
            min_x = min_x.min(r.x + cx);
            max_x = max_x.max(r.x + cx);
            min_y = min_y.min(r.y + cy);
            max_y = max_y.max(r.y + cy);
        }

        let x0 = min_x.floor().max(0.0) as u32;
        let y0 = min_y.floor().max(0.0) as u32;
        let x1 = (max_x.ceil().max(0.0) as u32).min(surface.width);
        let y1 = (max_y.ceil().max(0.0) as u32).min(surface.height);

        let tc = quad.tex_coords;
        for py in y0..y1 {
            for px in x0..x1 {
                let local = inverse.rotate_vector(Vector2::new(px as f64 + 0.5 - cx, py as f64 + 0.5 - cy));
                let x = local.x + cx;
                let y = local.y + cy;
                if x < dst.left || x >= dst.right || y < dst.top || y >= dst.bottom {
                    continue;
                }
                let u = (x - dst.left) / dst.width();
                let v = (y - dst.top) / dst.height();
                let s = tc.s0 + u * (tc.s1 - tc.s0);
                let t = tc.t0 + v * (tc.t1 - tc.t0);

                let texel = sample(tex, s, t, quad.filter);
                let mut color = [0.0f32; 4];
                for i in 0..4 {
                    color[i] = texel[i] * quad.modulate[i];
                }

                let idx = (py as usize) * (surface.width as usize) + px as usize;
                surface.back[idx] = blend.blend(color, surface.back[idx]);
            }
        }
        Ok(())
    }

    fn clear(&mut self, target: NativeHandle, color: [f32; 4]) -> Result<()> {
        if self.faults.plan().fail_clears {
            return Err(ScreenError::Backend("injected clear failure".to_string()));
        }
        let surface = self
            .surfaces
            .get_mut(&target)
            .ok_or_else(|| ScreenError::Backend(format!("unknown native surface {:?}", target)))?;
        surface.back.fill(color);
        self.stats.clears += 1;
        Ok(())
    }

    fn read_pixels(&mut self, source: NativeHandle, buffer: ReadBuffer) -> Result<FrameImage> {
        let surface = self.surface(source)?;
        let pixels = match (buffer, surface.kind) {
            (ReadBuffer::Front, SurfaceKind::Onscreen) => surface.front.clone(),
            _ => surface.back.clone(),
        };
        let image = FrameImage {
            width: surface.width,
            height: surface.height,
            pixels,
        };
        self.stats.readbacks += 1;
        Ok(image)
    }

    fn create_shadow(&mut self, source: NativeHandle) -> Result<ShadowHandle> {
        if self.faults.plan().fail_shadow_creation {
            warn!("Injected shadow surface failure for {:?}", source);
            return Err(ScreenError::Backend("injected shadow surface failure".to_string()));
        }
        if !self.options.shadow_surfaces {
            return Err(ScreenError::Backend("shadow surfaces unsupported".to_string()));
        }
        let surface = self.surface(source)?;
        let storage = ShadowStorage {
            width: surface.width,
            height: surface.height,
            pixels: surface.back.clone(),
        };
        let handle = ShadowHandle(self.alloc_id());
        self.shadows.insert(handle, storage);
        self.stats.shadows_created += 1;
        Ok(handle)
    }

    fn sync_shadow(&mut self, shadow: ShadowHandle, source: NativeHandle) -> Result<()> {
        let surface = self
            .surfaces
            .get(&source)
            .ok_or_else(|| ScreenError::Backend(format!("unknown native surface {:?}", source)))?;
        let storage = self
            .shadows
            .get_mut(&shadow)
            .ok_or_else(|| ScreenError::Backend(format!("unknown shadow {:?}", shadow)))?;
        if storage.width != surface.width || storage.height != surface.height {
            return Err(ScreenError::Backend(format!(
                "shadow {:?} is {}x{}, source is {}x{}",
                shadow, storage.width, storage.height, surface.width, surface.height
            )));
        }
        storage.pixels.copy_from_slice(&surface.back);
        self.stats.shadow_syncs += 1;
        Ok(())
    }

    fn delete_shadow(&mut self, shadow: ShadowHandle) -> Result<()> {
        self.shadows
            .remove(&shadow)
            .ok_or_else(|| ScreenError::Backend(format!("unknown shadow {:?}", shadow)))?;
        self.stats.shadows_deleted += 1;
        Ok(())
    }

    fn copy_from_shadow(&mut self, shadow: ShadowHandle, target: NativeHandle, src: Rect, dst: Rect) -> Result<()> {
        let storage = self
            .shadows
            .get(&shadow)
            .ok_or_else(|| ScreenError::Backend(format!("unknown shadow {:?}", shadow)))?;
        let surface = self
            .surfaces
            .get_mut(&target)
            .ok_or_else(|| ScreenError::Backend(format!("unknown native surface {:?}", target)))?;

        copy_scaled(
            &storage.pixels,
            storage.width,
            storage.height,
            src,
            &mut surface.back,
            surface.width,
            surface.height,
            dst,
        );
        self.stats.shadow_copies += 1;
        Ok(())
    }

    fn copy_direct(&mut self, source: NativeHandle, target: NativeHandle, src: Rect, dst: Rect) -> Result<()> {
        let (pixels, width, height) = {
            let s = self.surface(source)?;
            (s.back.clone(), s.width, s.height)
        };
        let surface = self
            .surfaces
            .get_mut(&target)
            .ok_or_else(|| ScreenError::Backend(format!("unknown native surface {:?}", target)))?;

        copy_scaled(&pixels, width, height, src, &mut surface.back, surface.width, surface.height, dst);
        self.stats.direct_copies += 1;
        Ok(())
    }

    fn stats(&self) -> GpuCallStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TexRect;

    fn onscreen(width: u32, height: u32) -> SurfaceConfig {
        SurfaceConfig {
            kind: SurfaceKind::Onscreen,
            width,
            height,
            share_context: None,
        }
    }

    #[test]
    fn test_power2d_storage_is_padded() {
        let mut backend = HeadlessBackend::new(HeadlessOptions::unsynced());
        let texels = vec![[1.0; 4]; 3 * 5];
        let handle = backend
            .create_texture(
                None,
                &TextureDesc {
                    target: TextureTarget::Power2D,
                    width: 3,
                    height: 5,
                },
                &texels,
            )
            .unwrap();
        let storage = &backend.textures[&handle];
        assert_eq!((storage.storage_width, storage.storage_height), (4, 8));
        assert!(!storage.wrap);
        assert_eq!(storage.texels[3], [0.0; 4]);
    }

    #[test]
    fn test_rectangle_textures_can_be_disabled() {
        let mut backend = HeadlessBackend::new(HeadlessOptions {
            rectangle_textures: false,
            ..HeadlessOptions::unsynced()
        });
        let err = backend
            .create_texture(
                None,
                &TextureDesc {
                    target: TextureTarget::Rectangle,
                    width: 1,
                    height: 1,
                },
                &[[1.0; 4]],
            )
            .unwrap_err();
        assert!(matches!(err, ScreenError::Backend(_)));
    }

    #[test]
    fn test_draw_quad_rotated_half_turn_flips_image() {
        let mut backend = HeadlessBackend::new(HeadlessOptions::unsynced());
        let surface = backend.open_native_surface(&onscreen(2, 1)).unwrap();
        let texture = backend
            .create_texture(
                None,
                &TextureDesc {
                    target: TextureTarget::Rectangle,
                    width: 2,
                    height: 1,
                },
                &[[1.0, 0.0, 0.0, 1.0], [0.0, 0.0, 1.0, 1.0]],
            )
            .unwrap();

        backend
            .draw_quad(
                surface.native,
                &QuadDraw {
                    texture,
                    tex_coords: TexRect { s0: 0.0, t0: 0.0, s1: 2.0, t1: 1.0 },
                    dst: Rect::from_size(2.0, 1.0),
                    rotation: 180.0,
                    filter: FilterMode::Nearest,
                    modulate: [1.0; 4],
                },
            )
            .unwrap();

        let image = backend.read_pixels(surface.native, ReadBuffer::Back).unwrap();
        assert_eq!(image.pixel(0, 0), Some([0.0, 0.0, 1.0, 1.0]));
        assert_eq!(image.pixel(1, 0), Some([1.0, 0.0, 0.0, 1.0]));
    }

    #[test]
    fn test_swap_presents_back_buffer() {
        let mut backend = HeadlessBackend::new(HeadlessOptions::unsynced());
        let surface = backend.open_native_surface(&onscreen(2, 2)).unwrap();
        backend.clear(surface.native, [0.25, 0.5, 0.75, 1.0]).unwrap();

        let before = backend.read_pixels(surface.native, ReadBuffer::Front).unwrap();
        assert_eq!(before.pixel(0, 0), Some([0.0; 4]));

        backend.swap_buffers(surface.native, None).unwrap();
        let after = backend.read_pixels(surface.native, ReadBuffer::Front).unwrap();
        assert_eq!(after.pixel(1, 1), Some([0.25, 0.5, 0.75, 1.0]));
    }

    #[test]
    fn test_synced_swap_lands_on_vblank_grid() {
        let mut backend = HeadlessBackend::new(HeadlessOptions {
            refresh_rate_hz: 500.0,
            ..HeadlessOptions::default()
        });
        let surface = backend.open_native_surface(&onscreen(1, 1)).unwrap();

        let first = backend.swap_buffers(surface.native, None).unwrap();
        let second = backend.swap_buffers(surface.native, None).unwrap();
        let gap = second.vblank.duration_since(first.vblank);
        assert!(gap >= first.refresh_interval);
        assert!(second.completed >= second.vblank);
    }

    #[test]
    fn test_deadline_swap_waits_for_vblank_after_deadline() {
        let mut backend = HeadlessBackend::new(HeadlessOptions {
            refresh_rate_hz: 500.0,
            ..HeadlessOptions::default()
        });
        let surface = backend.open_native_surface(&onscreen(1, 1)).unwrap();

        let deadline = Instant::now() + Duration::from_millis(15);
        let flip = backend.swap_buffers(surface.native, Some(deadline)).unwrap();
        assert!(flip.vblank >= deadline);
        assert!(flip.vblank.duration_since(deadline) <= flip.refresh_interval);

        let period = flip.refresh_interval.as_nanos();
        assert_eq!(flip.vblank.duration_since(backend.epoch).as_nanos() % period, 0);
    }

    #[test]
    fn test_closing_owner_drops_context() {
        let mut backend = HeadlessBackend::new(HeadlessOptions::unsynced());
        let owner = backend.open_native_surface(&onscreen(2, 2)).unwrap();
        let child = backend
            .open_native_surface(&SurfaceConfig {
                kind: SurfaceKind::Offscreen,
                width: 2,
                height: 2,
                share_context: Some(owner.context),
            })
            .unwrap();
        assert!(!child.owns_context);

        backend.close_native_surface(owner.native).unwrap();
        assert!(backend.make_current(owner.context).is_err());
    }

    #[test]
    fn test_fault_injector_fails_open_once() {
        let mut backend = HeadlessBackend::new(HeadlessOptions::unsynced());
        backend.fault_injector().fail_next_opens(1);
        assert!(backend.open_native_surface(&onscreen(1, 1)).is_err());
        assert!(backend.open_native_surface(&onscreen(1, 1)).is_ok());
        assert_eq!(backend.live_surfaces(), 1);
    }
}
