//! Alpha blending state per window
//!
//! Blend factors are validated and stored cheaply by [`BlendState::set`];
//! the backend only sees a blend-function call from
//! [`BlendState::apply_if_dirty`], which the render path invokes right
//! before any draw that depends on blending. Issuing the same pair many
//! times in a frame therefore costs a single GPU state change.
//!
//! Blending is enabled whenever the pair differs from `(One, Zero)`.

use crate::backend::{ContextHandle, GpuOps};
use crate::error::{Result, ScreenError};
use log::debug;
use std::fmt;

/// Closed set of blend factor symbols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    SrcAlphaSaturate,
}

impl BlendFactor {
    pub const ALL: [BlendFactor; 11] = [
        BlendFactor::Zero,
        BlendFactor::One,
        BlendFactor::SrcColor,
        BlendFactor::OneMinusSrcColor,
        BlendFactor::DstColor,
        BlendFactor::OneMinusDstColor,
        BlendFactor::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha,
        BlendFactor::DstAlpha,
        BlendFactor::OneMinusDstAlpha,
        BlendFactor::SrcAlphaSaturate,
    ];

    /// Canonical camelCase name
    pub fn name(&self) -> &'static str {
        match self {
            BlendFactor::Zero => "zero",
            BlendFactor::One => "one",
            BlendFactor::SrcColor => "srcColor",
            BlendFactor::OneMinusSrcColor => "oneMinusSrcColor",
            BlendFactor::DstColor => "dstColor",
            BlendFactor::OneMinusDstColor => "oneMinusDstColor",
            BlendFactor::SrcAlpha => "srcAlpha",
            BlendFactor::OneMinusSrcAlpha => "oneMinusSrcAlpha",
            BlendFactor::DstAlpha => "dstAlpha",
            BlendFactor::OneMinusDstAlpha => "oneMinusDstAlpha",
            BlendFactor::SrcAlphaSaturate => "srcAlphaSaturate",
        }
    }

    /// Parse a factor symbol.
    ///
    /// Accepts camelCase (`oneMinusSrcAlpha`), snake_case
    /// (`one_minus_src_alpha`) and GL constant names (`GL_ONE_MINUS_SRC_ALPHA`),
    /// case-insensitively.
    pub fn parse(symbol: &str) -> Option<BlendFactor> {
        let trimmed = symbol.trim();
        let without_prefix = trimmed
            .strip_prefix("GL_")
            .or_else(|| trimmed.strip_prefix("gl_"))
            .unwrap_or(trimmed);
        let key: String = without_prefix
            .chars()
            .filter(|c| *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();

        BlendFactor::ALL
            .iter()
            .copied()
            .find(|f| f.name().to_ascii_lowercase() == key)
    }

    /// Whether this factor may be used on the source side
    pub fn valid_for_source(&self) -> bool {
        !matches!(self, BlendFactor::SrcColor | BlendFactor::OneMinusSrcColor)
    }

    /// Whether this factor may be used on the destination side
    pub fn valid_for_destination(&self) -> bool {
        !matches!(
            self,
            BlendFactor::DstColor | BlendFactor::OneMinusDstColor | BlendFactor::SrcAlphaSaturate
        )
    }

    /// Per-channel weight of this factor for the given source and destination colours
    pub fn weights(&self, src: [f32; 4], dst: [f32; 4]) -> [f32; 4] {
        match self {
            BlendFactor::Zero => [0.0; 4],
            BlendFactor::One => [1.0; 4],
            BlendFactor::SrcColor => src,
            BlendFactor::OneMinusSrcColor => src.map(|c| 1.0 - c),
            BlendFactor::DstColor => dst,
            BlendFactor::OneMinusDstColor => dst.map(|c| 1.0 - c),
            BlendFactor::SrcAlpha => [src[3]; 4],
            BlendFactor::OneMinusSrcAlpha => [1.0 - src[3]; 4],
            BlendFactor::DstAlpha => [dst[3]; 4],
            BlendFactor::OneMinusDstAlpha => [1.0 - dst[3]; 4],
            BlendFactor::SrcAlphaSaturate => {
                let f = src[3].min(1.0 - dst[3]);
                [f, f, f, 1.0]
            }
        }
    }
}

impl fmt::Display for BlendFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A (source, destination) factor pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendFunc {
    pub src: BlendFactor,
    pub dst: BlendFactor,
}

impl BlendFunc {
    /// `(One, Zero)`: source replaces destination, blending off
    pub const REPLACE: BlendFunc = BlendFunc {
        src: BlendFactor::One,
        dst: BlendFactor::Zero,
    };

    /// Classic alpha compositing
    pub const ALPHA: BlendFunc = BlendFunc {
        src: BlendFactor::SrcAlpha,
        dst: BlendFactor::OneMinusSrcAlpha,
    };

    pub fn new(src: BlendFactor, dst: BlendFactor) -> Self {
        Self { src, dst }
    }

    /// Whether the pair requires the blending unit at all
    pub fn blending_enabled(&self) -> bool {
        *self != BlendFunc::REPLACE
    }

    /// Blend `src` over `dst` with this function, clamped to [0, 1]
    pub fn blend(&self, src: [f32; 4], dst: [f32; 4]) -> [f32; 4] {
        if !self.blending_enabled() {
            return src;
        }
        let fs = self.src.weights(src, dst);
        let fd = self.dst.weights(src, dst);
        let mut out = [0.0f32; 4];
        for i in 0..4 {
            out[i] = (src[i] * fs[i] + dst[i] * fd[i]).clamp(0.0, 1.0);
        }
        out
    }

    /// Validate side legality of both factors
    pub fn validate(&self) -> Result<()> {
        if !self.src.valid_for_source() {
            return Err(ScreenError::InvalidBlendFactor {
                symbol: self.src.name().to_string(),
                side: "source",
            });
        }
        if !self.dst.valid_for_destination() {
            return Err(ScreenError::InvalidBlendFactor {
                symbol: self.dst.name().to_string(),
                side: "destination",
            });
        }
        Ok(())
    }

    /// Parse and validate a pair of symbols
    pub fn parse(src: &str, dst: &str) -> Result<Self> {
        let src_factor = BlendFactor::parse(src).ok_or_else(|| ScreenError::InvalidBlendFactor {
            symbol: src.to_string(),
            side: "source",
        })?;
        let dst_factor = BlendFactor::parse(dst).ok_or_else(|| ScreenError::InvalidBlendFactor {
            symbol: dst.to_string(),
            side: "destination",
        })?;
        let func = BlendFunc::new(src_factor, dst_factor);
        func.validate()?;
        Ok(func)
    }
}

impl Default for BlendFunc {
    fn default() -> Self {
        BlendFunc::REPLACE
    }
}

/// Requested vs. last-applied blend function of one window
#[derive(Debug, Clone, Default)]
pub struct BlendState {
    requested: BlendFunc,
    /// `None` until the first apply on a fresh context
    applied: Option<BlendFunc>,
}

impl BlendState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new pair; nothing reaches the backend until the next draw
    pub fn set(&mut self, func: BlendFunc) -> Result<()> {
        func.validate()?;
        self.requested = func;
        Ok(())
    }

    /// Logical state, regardless of whether it has been applied yet
    pub fn factors(&self) -> BlendFunc {
        self.requested
    }

    pub fn applied(&self) -> Option<BlendFunc> {
        self.applied
    }

    pub fn is_dirty(&self) -> bool {
        self.applied != Some(self.requested)
    }

    /// Push the requested pair to the backend if it differs from the applied one.
    ///
    /// Returns whether a backend call was issued.
    pub fn apply_if_dirty<G: GpuOps + ?Sized>(&mut self, gpu: &mut G, context: ContextHandle) -> Result<bool> {
        if !self.is_dirty() {
            return Ok(false);
        }
        gpu.set_blend_func(context, self.requested)?;
        debug!(
            "Applied blend function ({}, {}) on context {:?}",
            self.requested.src, self.requested.dst, context
        );
        self.applied = Some(self.requested);
        Ok(true)
    }

    /// Forget what the backend has, e.g. after the context was recreated
    pub fn mark_context_lost(&mut self) {
        self.applied = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessBackend;
    use crate::backend::{SurfaceConfig, SurfaceGlue, SurfaceKind};
    use proptest::prelude::*;

    fn open_context(backend: &mut HeadlessBackend) -> ContextHandle {
        backend
            .open_native_surface(&SurfaceConfig {
                kind: SurfaceKind::Onscreen,
                width: 4,
                height: 4,
                share_context: None,
            })
            .unwrap()
            .context
    }

    #[test]
    fn test_parse_accepts_all_spellings() {
        assert_eq!(BlendFactor::parse("oneMinusSrcAlpha"), Some(BlendFactor::OneMinusSrcAlpha));
        assert_eq!(BlendFactor::parse("one_minus_src_alpha"), Some(BlendFactor::OneMinusSrcAlpha));
        assert_eq!(BlendFactor::parse("GL_ONE_MINUS_SRC_ALPHA"), Some(BlendFactor::OneMinusSrcAlpha));
        assert_eq!(BlendFactor::parse("ZERO"), Some(BlendFactor::Zero));
        assert_eq!(BlendFactor::parse("bogus"), None);
    }

    #[test]
    fn test_side_legality() {
        assert!(BlendFunc::new(BlendFactor::SrcColor, BlendFactor::Zero).validate().is_err());
        assert!(BlendFunc::new(BlendFactor::One, BlendFactor::DstColor).validate().is_err());
        assert!(BlendFunc::new(BlendFactor::One, BlendFactor::SrcAlphaSaturate).validate().is_err());
        assert!(BlendFunc::new(BlendFactor::SrcAlphaSaturate, BlendFactor::One).validate().is_ok());
        assert!(BlendFunc::ALPHA.validate().is_ok());
    }

    #[test]
    fn test_invalid_symbol_leaves_state_unchanged() {
        let mut state = BlendState::new();
        state.set(BlendFunc::ALPHA).unwrap();

        let err = BlendFunc::parse("bogus", "one").unwrap_err();
        assert!(matches!(err, ScreenError::InvalidBlendFactor { .. }));
        assert_eq!(state.factors(), BlendFunc::ALPHA);
    }

    #[test]
    fn test_redundant_set_applies_once() {
        let mut backend = HeadlessBackend::default();
        let ctx = open_context(&mut backend);
        let mut state = BlendState::new();

        state.set(BlendFunc::ALPHA).unwrap();
        assert!(state.apply_if_dirty(&mut backend, ctx).unwrap());
        state.set(BlendFunc::ALPHA).unwrap();
        assert!(!state.apply_if_dirty(&mut backend, ctx).unwrap());

        assert_eq!(backend.stats().blend_func_calls, 1);
    }

    #[test]
    fn test_set_back_to_applied_is_clean() {
        let mut backend = HeadlessBackend::default();
        let ctx = open_context(&mut backend);
        let mut state = BlendState::new();

        state.apply_if_dirty(&mut backend, ctx).unwrap();
        state.set(BlendFunc::ALPHA).unwrap();
        state.set(BlendFunc::REPLACE).unwrap();
        assert!(!state.is_dirty());
        assert!(!state.apply_if_dirty(&mut backend, ctx).unwrap());
        assert_eq!(backend.stats().blend_func_calls, 1);
    }

    #[test]
    fn test_alpha_blend_math() {
        let out = BlendFunc::ALPHA.blend([1.0, 0.0, 0.0, 0.5], [0.0, 0.0, 1.0, 1.0]);
        assert!((out[0] - 0.5).abs() < 1e-6);
        assert!((out[2] - 0.5).abs() < 1e-6);
        assert_eq!(BlendFunc::REPLACE.blend([0.2; 4], [0.9; 4]), [0.2; 4]);
    }

    fn valid_source() -> impl Strategy<Value = BlendFactor> {
        prop::sample::select(
            BlendFactor::ALL
                .iter()
                .copied()
                .filter(|f| f.valid_for_source())
                .collect::<Vec<_>>(),
        )
    }

    fn valid_destination() -> impl Strategy<Value = BlendFactor> {
        prop::sample::select(
            BlendFactor::ALL
                .iter()
                .copied()
                .filter(|f| f.valid_for_destination())
                .collect::<Vec<_>>(),
        )
    }

    proptest! {
        #[test]
        fn prop_set_then_get_returns_pair(src in valid_source(), dst in valid_destination()) {
            let mut state = BlendState::new();
            state.set(BlendFunc::new(src, dst)).unwrap();
            prop_assert_eq!(state.factors(), BlendFunc::new(src, dst));
        }

        #[test]
        fn prop_names_round_trip(factor in prop::sample::select(BlendFactor::ALL.to_vec())) {
            prop_assert_eq!(BlendFactor::parse(factor.name()), Some(factor));
        }

        #[test]
        fn prop_unknown_symbols_rejected(symbol in "[a-z]{3,8}x") {
            let mut state = BlendState::new();
            state.set(BlendFunc::ALPHA).unwrap();
            prop_assert!(BlendFunc::parse(&symbol, "one").is_err());
            prop_assert_eq!(state.factors(), BlendFunc::ALPHA);
        }
    }
}
