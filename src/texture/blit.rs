//! Batched texture composition
//!
//! A [`BlitRequest`] draws N textures onto one window in array order. The
//! whole request is validated and turned into quads before anything is
//! drawn, so a bad element never leaves a half-drawn batch behind.

use super::coords::map_tex_coord;
use super::{FilterMode, TextureId, TextureManager, TextureTarget};
use crate::backend::{Backend, QuadDraw};
use crate::error::{Result, ScreenError};
use crate::geometry::Rect;
use crate::window::{WindowIndex, WindowRecord, WindowRegistry};
use log::debug;

/// Rotation angle(s) in degrees, clockwise, around each destination centre
#[derive(Debug, Clone, PartialEq)]
pub enum Rotation {
    Shared(f64),
    PerElement(Vec<f64>),
}

impl Default for Rotation {
    fn default() -> Self {
        Rotation::Shared(0.0)
    }
}

/// Draw a batch of textures onto a window.
///
/// `src_rects` and `dst_rects` each hold zero entries (defaults), one entry
/// (shared by every element) or one entry per texture. The default source
/// is the full texture; the default destination is a source-sized rectangle
/// centred in the window.
#[derive(Debug, Clone, PartialEq)]
pub struct BlitRequest {
    pub window: WindowIndex,
    pub textures: Vec<TextureId>,
    pub src_rects: Vec<Rect>,
    pub dst_rects: Vec<Rect>,
    pub rotation: Rotation,
    pub filter: FilterMode,
    /// Global alpha in [0, 1], applied as colour modulation (1, 1, 1, alpha)
    pub alpha: f64,
}

impl BlitRequest {
    pub fn new(window: WindowIndex, textures: Vec<TextureId>) -> Self {
        Self {
            window,
            textures,
            src_rects: Vec::new(),
            dst_rects: Vec::new(),
            rotation: Rotation::default(),
            filter: FilterMode::default(),
            alpha: 1.0,
        }
    }

    pub fn single(window: WindowIndex, texture: TextureId) -> Self {
        Self::new(window, vec![texture])
    }

    pub fn with_src_rects(mut self, rects: Vec<Rect>) -> Self {
        self.src_rects = rects;
        self
    }

    pub fn with_dst_rects(mut self, rects: Vec<Rect>) -> Self {
        self.dst_rects = rects;
        self
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_filter(mut self, filter: FilterMode) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// Validate the request against live textures and the target window and
    /// produce one quad per element, in draw order.
    pub fn plan(&self, textures: &TextureManager, window: &WindowRecord) -> Result<Vec<QuadDraw>> {
        let n = self.textures.len();
        if n == 0 {
            return Err(ScreenError::InvalidArgument("blit needs at least one texture".to_string()));
        }
        if !self.alpha.is_finite() || !(0.0..=1.0).contains(&self.alpha) {
            return Err(ScreenError::InvalidArgument(format!(
                "global alpha {} outside [0, 1]",
                self.alpha
            )));
        }
        check_count("source rectangle", self.src_rects.len(), n)?;
        check_count("destination rectangle", self.dst_rects.len(), n)?;
        if let Rotation::PerElement(angles) = &self.rotation {
            if angles.len() != n {
                return Err(ScreenError::InvalidArgument(format!(
                    "{} rotation angles for {} textures",
                    angles.len(),
                    n
                )));
            }
        }

        let resolved = self
            .textures
            .iter()
            .map(|id| textures.get(*id))
            .collect::<Result<Vec<_>>>()?;

        let expected = resolved[0].target;
        for texture in &resolved {
            if texture.target != expected {
                return Err(ScreenError::TargetKindMismatch {
                    expected,
                    found: texture.target,
                });
            }
        }
        if expected == TextureTarget::Rectangle && !window.capabilities.rectangle_textures {
            return Err(ScreenError::TargetKindMismatch {
                expected: TextureTarget::Power2D,
                found: TextureTarget::Rectangle,
            });
        }

        let window_rect = window.rect();
        let modulate = [1.0, 1.0, 1.0, self.alpha as f32];

        resolved
            .iter()
            .enumerate()
            .map(|(i, texture)| {
                let full = Rect::from_size(texture.width as f64, texture.height as f64);
                let src = pick(&self.src_rects, i).unwrap_or(full);
                if !src.is_valid() || !full.contains_rect(&src) {
                    return Err(ScreenError::InvalidArgument(format!(
                        "source rectangle {:?} outside texture {} ({}x{})",
                        src, texture.id, texture.width, texture.height
                    )));
                }

                let dst = pick(&self.dst_rects, i).unwrap_or_else(|| src.centered_in(&window_rect));
                if !dst.is_valid() {
                    return Err(ScreenError::InvalidArgument(format!(
                        "destination rectangle {:?} is malformed",
                        dst
                    )));
                }

                let rotation = match &self.rotation {
                    Rotation::Shared(angle) => *angle,
                    Rotation::PerElement(angles) => angles[i],
                };
                if !rotation.is_finite() {
                    return Err(ScreenError::InvalidArgument(format!("rotation {} is not finite", rotation)));
                }

                Ok(QuadDraw {
                    texture: texture.handle,
                    tex_coords: map_tex_coord(texture.target, texture.width, texture.height, &src),
                    dst,
                    rotation,
                    filter: self.filter,
                    modulate,
                })
            })
            .collect()
    }
}

fn check_count(what: &str, count: usize, n: usize) -> Result<()> {
    if count == 0 || count == 1 || count == n {
        Ok(())
    } else {
        Err(ScreenError::InvalidArgument(format!("{} {}s for {} textures", count, what, n)))
    }
}

fn pick(rects: &[Rect], i: usize) -> Option<Rect> {
    match rects.len() {
        0 => None,
        1 => Some(rects[0]),
        _ => rects.get(i).copied(),
    }
}

/// Validate and draw a batch; returns the number of quads drawn
pub fn blit_batch(
    backend: &mut dyn Backend,
    registry: &mut WindowRegistry,
    textures: &TextureManager,
    request: &BlitRequest,
) -> Result<usize> {
    registry.check_thread(request.window)?;
    let quads = request.plan(textures, registry.get(request.window)?)?;

    registry.prepare_draw(backend, request.window)?;
    let native = registry.get(request.window)?.native;
    for quad in &quads {
        backend.draw_quad(native, quad)?;
    }
    registry.mark_drawn(request.window)?;

    debug!("Blitted {} textures onto window {}", quads.len(), request.window);
    Ok(quads.len())
}
