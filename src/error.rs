//! Error taxonomy for the screen core
//!
//! Every fallible operation on the core returns [`ScreenError`]. Validation
//! errors are raised before any state is touched; resource-creation failures
//! leave nothing registered. None of these are fatal to the process.

use crate::texture::TextureTarget;
use crate::window::WindowIndex;
use thiserror::Error;

/// Errors surfaced by the window/texture/blend/flip core
#[derive(Debug, Error)]
pub enum ScreenError {
    /// No live window record has this index (never opened, or already closed)
    #[error("invalid window index {0}")]
    InvalidWindowIndex(WindowIndex),

    /// The platform glue refused to create the native surface
    #[error("failed to open window: {0}")]
    WindowOpenFailed(String),

    /// Blend factor symbol outside the closed set, or illegal for its side
    #[error("invalid blend factor '{symbol}' for {side}")]
    InvalidBlendFactor { symbol: String, side: &'static str },

    /// Texture destroyed twice
    #[error("texture {0} was already destroyed")]
    DoubleFree(u64),

    /// Texture id that was never issued
    #[error("invalid texture handle {0}")]
    InvalidTextureHandle(u64),

    /// Incompatible texture targets detected at blit time
    #[error("texture target mismatch: expected {expected:?}, found {found:?}")]
    TargetKindMismatch {
        expected: TextureTarget,
        found: TextureTarget,
    },

    /// Shadow surface could not be created; recovered by the copy fallback
    #[error("shadow surface creation failed for window {window}: {reason}")]
    ShadowCreationFailed { window: WindowIndex, reason: String },

    /// Malformed call arguments (rect counts, alpha range, pixel data size...)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation only valid on onscreen windows
    #[error("window {0} is not an onscreen window")]
    NotOnscreenWindow(WindowIndex),

    /// GPU call attempted from a thread that does not own the context
    #[error("render context of window {0} is owned by another thread")]
    ContextThreadViolation(WindowIndex),

    /// The native surface could not be released; the record was removed anyway
    #[error("failed to release native surface of window {window}: {reason}")]
    NativeReleaseFailed { window: WindowIndex, reason: String },

    /// Any other backend failure
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result alias used across the core
pub type Result<T> = std::result::Result<T, ScreenError>;
