//! Texture coordinate mapping
//!
//! Rectangle targets are addressed in texel units. Power-of-two 2D targets
//! are addressed in [0, 1] over the padded storage extent, so a 3x5 image
//! in 4x8 storage spans s in [0, 0.75], t in [0, 0.625]. The end edge of a
//! 2D source rectangle is pulled in by half a texel before normalizing so
//! that linear filtering never reaches into the padding.

use super::TextureTarget;
use crate::backend::TexRect;
use crate::geometry::Rect;

/// Smallest power of two that is >= `n` (and >= 1)
pub fn next_pow2(n: u32) -> u32 {
    n.max(1).next_power_of_two()
}

/// Storage extent the backend allocates for a texture of the given size
pub fn storage_size(target: TextureTarget, width: u32, height: u32) -> (u32, u32) {
    match target {
        TextureTarget::Rectangle => (width, height),
        TextureTarget::Power2D => (next_pow2(width), next_pow2(height)),
    }
}

/// Whether a texture repeats instead of clamping at its edges
pub fn wraps(target: TextureTarget, width: u32, height: u32) -> bool {
    target == TextureTarget::Power2D && storage_size(target, width, height) == (width, height)
}

/// Map a source rectangle (texel units) to the coordinates of `target`
pub fn map_tex_coord(target: TextureTarget, width: u32, height: u32, src: &Rect) -> TexRect {
    match target {
        TextureTarget::Rectangle => TexRect {
            s0: src.left,
            t0: src.top,
            s1: src.right,
            t1: src.bottom,
        },
        TextureTarget::Power2D => {
            let (storage_w, storage_h) = storage_size(target, width, height);
            let (sw, sh) = (storage_w as f64, storage_h as f64);
            TexRect {
                s0: src.left / sw,
                t0: src.top / sh,
                s1: (src.right - 0.5) / sw,
                t1: (src.bottom - 0.5) / sh,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_pow2() {
        assert_eq!(next_pow2(0), 1);
        assert_eq!(next_pow2(1), 1);
        assert_eq!(next_pow2(3), 4);
        assert_eq!(next_pow2(256), 256);
        assert_eq!(next_pow2(257), 512);
    }

    #[test]
    fn test_rectangle_coords_are_texels() {
        let tc = map_tex_coord(TextureTarget::Rectangle, 300, 200, &Rect::new(10.0, 20.0, 300.0, 200.0));
        assert_eq!(tc, TexRect { s0: 10.0, t0: 20.0, s1: 300.0, t1: 200.0 });
    }

    #[test]
    fn test_power2d_coords_normalized_over_storage() {
        let tc = map_tex_coord(TextureTarget::Power2D, 3, 5, &Rect::from_size(3.0, 5.0));
        assert_eq!(tc.s0, 0.0);
        assert_eq!(tc.t0, 0.0);
        assert_eq!(tc.s1, 2.5 / 4.0);
        assert_eq!(tc.t1, 4.5 / 8.0);
    }

    #[test]
    fn test_only_exact_power2d_wraps() {
        assert!(wraps(TextureTarget::Power2D, 64, 32));
        assert!(!wraps(TextureTarget::Power2D, 64, 33));
        assert!(!wraps(TextureTarget::Rectangle, 64, 32));
    }
}
