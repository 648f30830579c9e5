//! # screenkit
//!
//! Per-window GPU resource manager for stimulus presentation: it tracks
//! onscreen and offscreen surfaces, the textures bound to them, the
//! blending state used when compositing, and callbacks synchronized to
//! display flips.
//!
//! ## Architecture
//!
//! - `backend`: platform surface glue and GPU calls (headless software backend)
//! - `window`: window record registry
//! - `blend`: lazy blend state per window
//! - `texture`: texture manager, coordinate mapping, batched blits
//! - `shadow`: shadow surfaces for accelerated window copies
//! - `flip`: flip callback scheduler
//! - `pacing`: flip timestamps and frame statistics
//! - `screen`: the facade tying it together
//! - `config`: configuration parsing and management
//!
//! ## Usage
//!
//! ```rust,no_run
//! use screenkit::{ImageData, Screen, ScreenConfig, WindowConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut screen = Screen::new(ScreenConfig::default())?;
//!     let win = screen.open_window(&WindowConfig::onscreen(640, 480))?;
//!     let tex = screen.create_texture(Some(win), &ImageData::solid(64, 64, [255, 0, 0, 255])?)?;
//!     screen.draw_texture(win, tex, None)?;
//!     let flip = screen.swap(win)?;
//!     println!("onset at {:.4}s", flip.stimulus_onset);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod blend;
pub mod config;
pub mod error;
pub mod flip;
pub mod geometry;
pub mod logging;
pub mod pacing;
pub mod screen;
pub mod shadow;
pub mod snapshot;
pub mod texture;
pub mod window;

// Re-export main types for easy access
pub use blend::{BlendFactor, BlendFunc};
pub use config::ScreenConfig;
pub use error::{Result, ScreenError};
pub use flip::{CallbackHandle, FlipScheduler, FlipState};
pub use geometry::Rect;
pub use pacing::{FlipInfo, FrameStats};
pub use screen::{ClearMode, Screen};
pub use snapshot::FrameImage;
pub use texture::{BlitRequest, FilterMode, ImageData, Rotation, TextureId, TextureTarget};
pub use window::{WindowConfig, WindowIndex, WindowKind};

/// Version information for screenkit
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
