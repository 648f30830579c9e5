//! # screenkit - headless stimulus demo
//!
//! Opens a window on the configured backend, composites two textures with
//! alpha blending every frame, swaps at the display's refresh rate and logs
//! the flip timing reported to flip callbacks.

use anyhow::Result;
use clap::Parser;
use log::{error, info, warn};
use screenkit::{BlendFactor, BlitRequest, ImageData, Rect, Rotation, Screen, ScreenConfig};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "screenkit")]
#[command(about = "Per-window GPU resource manager for stimulus presentation")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/screenkit/screenkit.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Number of frames to present
    #[arg(short, long, default_value_t = 60)]
    frames: u64,

    /// Save the last presented frame as PNG
    #[arg(long)]
    snapshot: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, load_error) = match ScreenConfig::load(&cli.config) {
        Ok(config) => (config, None),
        Err(e) => (ScreenConfig::default(), Some(e)),
    };
    screenkit::logging::init(&config.logging, cli.debug);

    info!("🚀 Starting {} {}", env!("CARGO_PKG_NAME"), screenkit::VERSION);
    info!(
        "📄 Built {} for {} ({})",
        env!("BUILD_DATE"),
        env!("TARGET_TRIPLE"),
        option_env!("GIT_COMMIT").unwrap_or("unknown commit")
    );
    match load_error {
        None => info!("✅ Configuration loaded from: {}", cli.config),
        Some(e) => {
            warn!("⚠️ Failed to load configuration: {:#}", e);
            info!("📝 Using default configuration");
        }
    }

    let mut screen = Screen::new(config)?;
    let window_config = screen.default_window_config();
    let window = screen.open_window(&window_config)?;
    let bounds = screen.window(window)?.rect();

    let grating = ImageData::new(256, 256, 4, grating_rgba(256, 256))?;
    let patch = ImageData::solid(128, 128, [255, 64, 0, 128])?;
    let grating = screen.create_texture(Some(window), &grating)?;
    let patch = screen.create_texture(Some(window), &patch)?;
    screen.set_blend(window, BlendFactor::SrcAlpha, BlendFactor::OneMinusSrcAlpha)?;

    let late_flips = Arc::new(AtomicU64::new(0));
    for frame in 0..cli.frames {
        let angle = frame as f64 * 360.0 / cli.frames.max(1) as f64;
        let request = BlitRequest::new(window, vec![grating, patch])
            .with_dst_rects(vec![
                Rect::from_size(256.0, 256.0).centered_in(&bounds),
                Rect::from_size(128.0, 128.0).centered_in(&bounds),
            ])
            .with_rotation(Rotation::PerElement(vec![angle, -angle]));
        screen.blit(&request)?;

        let late = Arc::clone(&late_flips);
        screen.schedule_flip_callback(window, move |flip| {
            if flip.deadline_missed() {
                late.fetch_add(1, Ordering::Relaxed);
                warn!("⏱️ Frame {} missed its deadline by {:.2}ms", flip.frame, flip.missed * 1000.0);
            }
            Ok(())
        })?;

        let flip = screen.swap(window)?;
        info!(
            "🎞️ Frame {:>4}: onset {:.4}s, returned {:.4}s",
            flip.frame, flip.stimulus_onset, flip.flip_timestamp
        );
    }

    let stats = screen.frame_stats(window)?;
    info!(
        "📊 {} frames, {:.1} fps, jitter {:.3}ms, {} missed ({} seen by callbacks)",
        stats.total_frames,
        stats.current_fps,
        stats.frame_time_jitter.as_secs_f64() * 1000.0,
        stats.missed_frames,
        late_flips.load(Ordering::Relaxed)
    );

    if let Some(path) = &cli.snapshot {
        match screen.get_front_image(window).map(|image| image.save_png(path)) {
            Ok(Ok(())) => info!("📸 Saved last frame to {}", path),
            Ok(Err(e)) => error!("❌ Failed to save snapshot: {:#}", e),
            Err(e) => error!("❌ Failed to read back frame: {}", e),
        }
    }

    screen.close_window(window)?;
    info!("👋 screenkit shutting down");
    Ok(())
}

/// Black and white square-wave grating, 16 pixels per cycle
fn grating_rgba(width: u32, height: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for _y in 0..height {
        for x in 0..width {
            let v = if (x / 8) % 2 == 0 { 255 } else { 0 };
            data.extend_from_slice(&[v, v, v, 255]);
        }
    }
    data
}
