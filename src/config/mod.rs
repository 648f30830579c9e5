//! Configuration management for screenkit
//!
//! This module handles loading, parsing, and validating configuration
//! from TOML files: simulated display timing, backend selection, default
//! window parameters, texture and shadow policy, and logging.

use crate::window::{WindowConfig, WindowKind};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Log levels accepted by `logging.level`
const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

/// Largest accepted window edge (pixels)
pub(crate) const MAX_WINDOW_EDGE: u32 = 16384;

/// Main configuration struct containing all screenkit settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ScreenConfig {
    /// Display timing and backend selection
    #[serde(default)]
    pub display: DisplayConfig,

    /// Defaults for newly opened windows
    #[serde(default)]
    pub window: WindowDefaults,

    /// Texture target policy
    #[serde(default)]
    pub textures: TextureConfig,

    /// Shadow surface cache
    #[serde(default)]
    pub shadow: ShadowConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Available surface/GPU backends
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-memory software backend with a simulated display
    #[default]
    Headless,
}

/// Display timing configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisplayConfig {
    /// Refresh rate of the (simulated) display in Hz
    pub refresh_rate_hz: f64,

    /// Block swaps until the next vertical blank
    pub sync_to_vblank: bool,

    /// Which backend to drive
    #[serde(default)]
    pub backend: BackendKind,
}

/// Default parameters for onscreen windows
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WindowDefaults {
    pub width: u32,
    pub height: u32,

    /// Background colour, linear RGBA in [0, 1]
    pub clear_color: [f32; 4],

    /// Clear the back buffer after every flip
    pub clear_after_flip: bool,
}

/// Texture policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextureConfig {
    /// Use rectangle textures whenever the context supports them
    pub prefer_rectangle: bool,
}

/// Shadow surface cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShadowConfig {
    /// Use shadow surfaces for window copies; off means always copy directly
    pub enabled: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is not set
    pub level: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            refresh_rate_hz: 60.0,
            sync_to_vblank: true,
            backend: BackendKind::Headless,
        }
    }
}

impl Default for WindowDefaults {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            clear_after_flip: false,
        }
    }
}

impl Default for TextureConfig {
    fn default() -> Self {
        Self { prefer_rectangle: true }
    }
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl WindowDefaults {
    /// Onscreen window parameters built from these defaults
    pub fn to_window_config(&self) -> WindowConfig {
        WindowConfig {
            kind: WindowKind::Onscreen,
            width: self.width,
            height: self.height,
            parent: None,
            clear_color: self.clear_color,
            clear_after_flip: self.clear_after_flip,
        }
    }
}

impl ScreenConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Expand ~ to home directory
        let expanded_path = if path.to_string_lossy().starts_with('~') {
            let home = std::env::var("HOME").context("Failed to get HOME environment variable")?;
            Path::new(&home).join(path.strip_prefix("~").unwrap_or(path))
        } else {
            path.to_path_buf()
        };

        let contents = fs::read_to_string(&expanded_path)
            .with_context(|| format!("Failed to read config file: {}", expanded_path.display()))?;

        let config: ScreenConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", expanded_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let hz = self.display.refresh_rate_hz;
        if !hz.is_finite() || !(1.0..=1000.0).contains(&hz) {
            anyhow::bail!("Invalid refresh_rate_hz: must be between 1 and 1000, got {}", hz);
        }

        let w = &self.window;
        if w.width == 0 || w.height == 0 || w.width > MAX_WINDOW_EDGE || w.height > MAX_WINDOW_EDGE {
            anyhow::bail!(
                "Invalid window size {}x{}: edges must be between 1 and {}",
                w.width,
                w.height,
                MAX_WINDOW_EDGE
            );
        }

        if w.clear_color.iter().any(|c| !c.is_finite() || !(0.0..=1.0).contains(c)) {
            anyhow::bail!("Invalid clear_color: components must be between 0.0 and 1.0");
        }

        let level = self.logging.level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            anyhow::bail!(
                "Invalid log level: {} (expected one of {})",
                self.logging.level,
                LOG_LEVELS.join(", ")
            );
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, contents).context("Failed to write configuration file")?;

        Ok(())
    }
}
