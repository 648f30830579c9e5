//! Frame readback and PNG snapshots
//!
//! A [`FrameImage`] is what a window's framebuffer looks like at readback
//! time: linear RGBA in [0, 1], row-major, top row first. It can be compared
//! against another capture with a tolerance or written out as an 8-bit PNG.

use anyhow::{Context, Result};
use log::info;
use std::path::Path;

/// Captured framebuffer content
#[derive(Debug, Clone, PartialEq)]
pub struct FrameImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<[f32; 4]>,
}

/// Result of comparing two captures
#[derive(Debug, Clone, PartialEq)]
pub enum ComparisonResult {
    /// Images match within tolerance
    Match,
    /// Images differ beyond tolerance
    Mismatch {
        difference: f32,
        different_pixels: usize,
        total_pixels: usize,
    },
}

impl FrameImage {
    /// Uniformly coloured image
    pub fn filled(width: u32, height: u32, color: [f32; 4]) -> Self {
        Self {
            width,
            height,
            pixels: vec![color; (width as usize) * (height as usize)],
        }
    }

    /// Pixel at (x, y), or `None` outside the image
    pub fn pixel(&self, x: u32, y: u32) -> Option<[f32; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get((y as usize) * (self.width as usize) + x as usize)
            .copied()
    }

    /// Quantize to 8 bits per channel
    pub fn to_rgba8(&self) -> Vec<[u8; 4]> {
        self.pixels
            .iter()
            .map(|p| p.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8))
            .collect()
    }

    /// Compare with another capture of the same size.
    ///
    /// `tolerance` is the largest allowed mean per-channel difference.
    pub fn compare(&self, other: &FrameImage, tolerance: f32) -> Result<ComparisonResult> {
        if self.width != other.width || self.height != other.height {
            anyhow::bail!(
                "Image size mismatch: {}x{} vs {}x{}",
                self.width,
                self.height,
                other.width,
                other.height
            );
        }

        let total_pixels = self.pixels.len();
        if total_pixels == 0 {
            return Ok(ComparisonResult::Match);
        }

        let mut different_pixels = 0;
        let mut total_difference = 0.0f32;

        for (a, b) in self.pixels.iter().zip(other.pixels.iter()) {
            let pixel_diff = a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| (x - y).abs())
                .sum::<f32>()
                / 4.0;
            total_difference += pixel_diff;

            if pixel_diff > 0.01 {
                different_pixels += 1;
            }
        }

        let average_difference = total_difference / total_pixels as f32;

        if average_difference <= tolerance {
            Ok(ComparisonResult::Match)
        } else {
            Ok(ComparisonResult::Mismatch {
                difference: average_difference,
                different_pixels,
                total_pixels,
            })
        }
    }

    /// Write as an 8-bit RGBA PNG
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create snapshot file: {}", path.display()))?;
        let mut encoder = png::Encoder::new(std::io::BufWriter::new(file), self.width, self.height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);

        let rgba = self.to_rgba8();
        let mut writer = encoder.write_header()?;
        writer.write_image_data(bytemuck::cast_slice(&rgba))?;
        writer.finish()?;

        info!("📸 Saved snapshot {}x{} to {:?}", self.width, self.height, path);
        Ok(())
    }

    /// Read an 8-bit RGBA PNG written by [`FrameImage::save_png`]
    pub fn load_png<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open snapshot file: {}", path.display()))?;
        let decoder = png::Decoder::new(file);
        let mut reader = decoder.read_info()?;
        let mut buf = vec![0; reader.output_buffer_size()];
        let info = reader.next_frame(&mut buf)?;

        if info.color_type != png::ColorType::Rgba || info.bit_depth != png::BitDepth::Eight {
            anyhow::bail!("Snapshot must be 8-bit RGBA");
        }
        buf.truncate(info.buffer_size());

        let pixels = buf
            .chunks_exact(4)
            .map(|c| [c[0], c[1], c[2], c[3]].map(|v| v as f32 / 255.0))
            .collect();

        Ok(Self {
            width: info.width,
            height: info.height,
            pixels,
        })
    }
}
