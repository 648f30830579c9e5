//! Texture Manager
//!
//! Textures live in an arena keyed by [`TextureId`], indexed by owning
//! window so that closing a window sweeps its textures mechanically:
//!
//! - **Ownership**: a texture is either standalone or owned by one window;
//!   destroying the owner destroys the texture, never the other way round.
//! - **Target kind**: `Rectangle` (pixel-space coordinates, any size) or
//!   `Power2D` (normalized coordinates over power-of-two storage). The kind
//!   is decided once per window from its capabilities and then cached.
//! - **Tombstones**: destroyed ids are remembered so that a second destroy
//!   is reported as [`ScreenError::DoubleFree`] rather than as an unknown id.
//!
//! Drawing is in [`blit`]; coordinate mapping in [`coords`].

pub mod blit;
pub mod coords;

use crate::backend::{Backend, Capabilities, ReadBuffer, TextureDesc, TextureHandle};
use crate::error::{Result, ScreenError};
use crate::window::{WindowIndex, WindowRecord};
use log::{debug, error, info};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

pub use blit::{BlitRequest, Rotation};
pub use coords::{map_tex_coord, next_pow2};

/// Texture target kind, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    /// Any size, texel-space coordinates
    Rectangle,
    /// Power-of-two storage, normalized coordinates
    Power2D,
}

/// Sampling filter for blits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    Nearest,
    #[default]
    Linear,
}

/// Identifier of a texture, never reused within one manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

impl fmt::Display for TextureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 8-bit image with 1 (luminance), 2 (luminance + alpha), 3 (RGB) or 4 (RGBA) channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    width: u32,
    height: u32,
    channels: u8,
    data: Vec<u8>,
}

impl ImageData {
    pub fn new(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(ScreenError::InvalidArgument(format!("image size {}x{} is empty", width, height)));
        }
        if !(1..=4).contains(&channels) {
            return Err(ScreenError::InvalidArgument(format!(
                "image must have 1 to 4 channels, got {}",
                channels
            )));
        }
        let expected = (width as usize) * (height as usize) * channels as usize;
        if data.len() != expected {
            return Err(ScreenError::InvalidArgument(format!(
                "image data has {} bytes, expected {}",
                data.len(),
                expected
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// Uniform RGBA image
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Result<Self> {
        let data = rgba.repeat((width as usize) * (height as usize));
        Self::new(width, height, 4, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// Expand to linear RGBA texels
    pub fn to_texels(&self) -> Vec<[f32; 4]> {
        let n = |v: u8| v as f32 / 255.0;
        self.data
            .chunks_exact(self.channels as usize)
            .map(|px| match px {
                [l] => [n(*l), n(*l), n(*l), 1.0],
                [l, a] => [n(*l), n(*l), n(*l), n(*a)],
                [r, g, b] => [n(*r), n(*g), n(*b), 1.0],
                [r, g, b, a] => [n(*r), n(*g), n(*b), n(*a)],
                _ => [0.0; 4],
            })
            .collect()
    }
}

/// A live texture
#[derive(Debug, Clone)]
pub struct Texture {
    pub id: TextureId,
    pub(crate) handle: TextureHandle,
    pub target: TextureTarget,
    pub width: u32,
    pub height: u32,
    pub owner: Option<WindowIndex>,
}

/// Texture manager counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextureStats {
    pub created: u64,
    pub destroyed: u64,
    /// Textures destroyed by closing their owning window
    pub cascaded: u64,
    pub live: usize,
}

/// Arena of textures keyed by id and by owner
#[derive(Debug)]
pub struct TextureManager {
    textures: HashMap<TextureId, Texture>,
    by_owner: HashMap<WindowIndex, BTreeSet<TextureId>>,
    destroyed: HashSet<TextureId>,
    target_cache: HashMap<Option<WindowIndex>, TextureTarget>,
    prefer_rectangle: bool,
    next_id: u64,
    stats: TextureStats,
}

impl TextureManager {
    pub fn new(prefer_rectangle: bool) -> Self {
        Self {
            textures: HashMap::new(),
            by_owner: HashMap::new(),
            destroyed: HashSet::new(),
            target_cache: HashMap::new(),
            prefer_rectangle,
            next_id: 1,
            stats: TextureStats::default(),
        }
    }

    /// Target kind for textures of `owner`, decided once and cached
    pub fn target_for(&mut self, owner: Option<WindowIndex>, caps: &Capabilities) -> TextureTarget {
        let prefer_rectangle = self.prefer_rectangle;
        *self.target_cache.entry(owner).or_insert_with(|| {
            let target = if prefer_rectangle && caps.rectangle_textures {
                TextureTarget::Rectangle
            } else {
                TextureTarget::Power2D
            };
            debug!("Texture target for {:?}: {:?}", owner, target);
            target
        })
    }

    /// Upload an image as a new texture, optionally owned by a window
    pub fn create(
        &mut self,
        backend: &mut dyn Backend,
        owner: Option<&WindowRecord>,
        image: &ImageData,
    ) -> Result<TextureId> {
        self.upload(backend, owner, image.width, image.height, &image.to_texels())
    }

    /// Snapshot a window's back buffer into a texture owned by that window
    pub fn create_from_window(&mut self, backend: &mut dyn Backend, window: &WindowRecord) -> Result<TextureId> {
        let frame = backend.read_pixels(window.native, ReadBuffer::Back)?;
        self.upload(backend, Some(window), frame.width, frame.height, &frame.pixels)
    }

    fn upload(
        &mut self,
        backend: &mut dyn Backend,
        owner: Option<&WindowRecord>,
        width: u32,
        height: u32,
        texels: &[[f32; 4]],
    ) -> Result<TextureId> {
        let (owner_index, context, caps) = match owner {
            Some(w) => (Some(w.index), Some(w.context), w.capabilities),
            None => (None, None, backend.capabilities(None)),
        };
        if width > caps.max_texture_size || height > caps.max_texture_size {
            return Err(ScreenError::InvalidArgument(format!(
                "texture {}x{} exceeds maximum size {}",
                width, height, caps.max_texture_size
            )));
        }

        let target = self.target_for(owner_index, &caps);
        let handle = backend.create_texture(context, &TextureDesc { target, width, height }, texels)?;

        let id = TextureId(self.next_id);
        self.next_id += 1;
        self.textures.insert(
            id,
            Texture {
                id,
                handle,
                target,
                width,
                height,
                owner: owner_index,
            },
        );
        if let Some(owner) = owner_index {
            self.by_owner.entry(owner).or_default().insert(id);
        }
        self.stats.created += 1;

        debug!("🆕 Texture {} {}x{} {:?} owner={:?}", id, width, height, target, owner_index);
        Ok(id)
    }

    pub fn get(&self, id: TextureId) -> Result<&Texture> {
        self.textures.get(&id).ok_or(ScreenError::InvalidTextureHandle(id.0))
    }

    /// Destroy a texture; a second destroy of the same id is a double free
    pub fn destroy(&mut self, backend: &mut dyn Backend, id: TextureId) -> Result<()> {
        if self.destroyed.contains(&id) {
            return Err(ScreenError::DoubleFree(id.0));
        }
        let texture = self.textures.remove(&id).ok_or(ScreenError::InvalidTextureHandle(id.0))?;
        self.forget(&texture);
        backend.delete_texture(texture.handle)?;
        debug!("🗑️ Destroyed texture {}", id);
        Ok(())
    }

    /// Destroy every texture owned by `owner`; returns how many went
    pub fn release_owned(&mut self, backend: &mut dyn Backend, owner: WindowIndex) -> usize {
        let ids = self.by_owner.remove(&owner).unwrap_or_default();
        let mut released = 0;
        for id in ids {
            let Some(texture) = self.textures.remove(&id) else {
                continue;
            };
            self.forget(&texture);
            self.stats.cascaded += 1;
            match backend.delete_texture(texture.handle) {
                Ok(()) => released += 1,
                Err(e) => error!("Failed to delete texture {} of window {}: {}", id, owner, e),
            }
        }
        self.target_cache.remove(&Some(owner));

        if released > 0 {
            info!("🧹 Released {} textures of window {}", released, owner);
        }
        released
    }

    /// Destroy every texture without an owning window; returns how many went
    pub fn release_standalone(&mut self, backend: &mut dyn Backend) -> usize {
        let mut ids: Vec<_> = self
            .textures
            .values()
            .filter(|t| t.owner.is_none())
            .map(|t| t.id)
            .collect();
        ids.sort();

        let mut released = 0;
        for id in ids {
            let Some(texture) = self.textures.remove(&id) else {
                continue;
            };
            self.forget(&texture);
            match backend.delete_texture(texture.handle) {
                Ok(()) => released += 1,
                Err(e) => error!("Failed to delete standalone texture {}: {}", id, e),
            }
        }
        released
    }

    fn forget(&mut self, texture: &Texture) {
        if let Some(owner) = texture.owner {
            if let Some(set) = self.by_owner.get_mut(&owner) {
                set.remove(&texture.id);
                if set.is_empty() {
                    self.by_owner.remove(&owner);
                }
            }
        }
        self.destroyed.insert(texture.id);
        self.stats.destroyed += 1;
    }

    /// Textures owned by a window, in creation order
    pub fn owned_by(&self, owner: WindowIndex) -> Vec<TextureId> {
        self.by_owner
            .get(&owner)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    pub fn stats(&self) -> TextureStats {
        TextureStats {
            live: self.textures.len(),
            ..self.stats.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessBackend, HeadlessOptions};
    use crate::window::{WindowConfig, WindowRegistry};

    fn setup(options: HeadlessOptions) -> (HeadlessBackend, WindowRegistry, WindowIndex) {
        let mut backend = HeadlessBackend::new(options);
        let mut registry = WindowRegistry::new();
        let win = registry.open(&mut backend, &WindowConfig::onscreen(16, 16)).unwrap();
        (backend, registry, win)
    }

    #[test]
    fn test_image_channel_expansion() {
        let gray = ImageData::new(1, 1, 1, vec![255]).unwrap();
        assert_eq!(gray.to_texels(), vec![[1.0, 1.0, 1.0, 1.0]]);

        let la = ImageData::new(1, 1, 2, vec![0, 51]).unwrap();
        assert_eq!(la.to_texels(), vec![[0.0, 0.0, 0.0, 0.2]]);

        let rgb = ImageData::new(1, 1, 3, vec![255, 0, 0]).unwrap();
        assert_eq!(rgb.to_texels(), vec![[1.0, 0.0, 0.0, 1.0]]);
    }

    #[test]
    fn test_image_rejects_bad_sizes() {
        assert!(ImageData::new(2, 2, 4, vec![0; 15]).is_err());
        assert!(ImageData::new(2, 2, 5, vec![0; 20]).is_err());
        assert!(ImageData::new(0, 2, 1, vec![]).is_err());
    }

    #[test]
    fn test_target_follows_capabilities() {
        let (mut backend, registry, win) = setup(HeadlessOptions::unsynced());
        let mut manager = TextureManager::new(true);
        let image = ImageData::solid(3, 3, [255; 4]).unwrap();

        let id = manager.create(&mut backend, Some(registry.get(win).unwrap()), &image).unwrap();
        assert_eq!(manager.get(id).unwrap().target, TextureTarget::Rectangle);

        let mut pow2_only = TextureManager::new(false);
        let id = pow2_only.create(&mut backend, Some(registry.get(win).unwrap()), &image).unwrap();
        assert_eq!(pow2_only.get(id).unwrap().target, TextureTarget::Power2D);
    }

    #[test]
    fn test_target_without_rectangle_support() {
        let (mut backend, registry, win) = setup(HeadlessOptions {
            rectangle_textures: false,
            ..HeadlessOptions::unsynced()
        });
        let mut manager = TextureManager::new(true);
        let image = ImageData::solid(3, 3, [255; 4]).unwrap();

        let id = manager.create(&mut backend, Some(registry.get(win).unwrap()), &image).unwrap();
        assert_eq!(manager.get(id).unwrap().target, TextureTarget::Power2D);
    }

    #[test]
    fn test_double_destroy_is_double_free() {
        let (mut backend, _registry, _win) = setup(HeadlessOptions::unsynced());
        let mut manager = TextureManager::new(true);
        let image = ImageData::solid(2, 2, [0, 0, 0, 255]).unwrap();

        let a = manager.create(&mut backend, None, &image).unwrap();
        let b = manager.create(&mut backend, None, &image).unwrap();

        manager.destroy(&mut backend, a).unwrap();
        assert!(matches!(manager.destroy(&mut backend, a), Err(ScreenError::DoubleFree(id)) if id == a.0));
        assert!(manager.get(b).is_ok());
        assert!(matches!(
            manager.destroy(&mut backend, TextureId(999)),
            Err(ScreenError::InvalidTextureHandle(999))
        ));
    }

    #[test]
    fn test_release_standalone_keeps_owned() {
        let (mut backend, registry, win) = setup(HeadlessOptions::unsynced());
        let mut manager = TextureManager::new(true);
        let image = ImageData::solid(2, 2, [255; 4]).unwrap();

        let owned = manager.create(&mut backend, Some(registry.get(win).unwrap()), &image).unwrap();
        let loose = manager.create(&mut backend, None, &image).unwrap();
        manager.create(&mut backend, None, &image).unwrap();

        assert_eq!(manager.release_standalone(&mut backend), 2);
        assert!(manager.get(owned).is_ok());
        assert!(matches!(manager.destroy(&mut backend, loose), Err(ScreenError::DoubleFree(_))));
        assert_eq!(backend.live_textures(), 1);
        assert_eq!(manager.stats().cascaded, 0);
    }

    #[test]
    fn test_release_owned_sweeps_only_owner() {
        let (mut backend, mut registry, win) = setup(HeadlessOptions::unsynced());
        let other = registry.open(&mut backend, &WindowConfig::onscreen(4, 4)).unwrap();
        let mut manager = TextureManager::new(true);
        let image = ImageData::solid(2, 2, [0, 0, 0, 255]).unwrap();

        for _ in 0..3 {
            manager.create(&mut backend, Some(registry.get(win).unwrap()), &image).unwrap();
        }
        let kept = manager.create(&mut backend, Some(registry.get(other).unwrap()), &image).unwrap();
        let standalone = manager.create(&mut backend, None, &image).unwrap();

        assert_eq!(manager.release_owned(&mut backend, win), 3);
        assert!(manager.owned_by(win).is_empty());
        assert!(manager.get(kept).is_ok());
        assert!(manager.get(standalone).is_ok());
        assert_eq!(backend.stats().textures_deleted, 3);
        assert_eq!(manager.stats().cascaded, 3);
    }

    #[test]
    fn test_create_from_window_snapshots_back_buffer() {
        let (mut backend, registry, win) = setup(HeadlessOptions::unsynced());
        let mut manager = TextureManager::new(true);

        let id = manager.create_from_window(&mut backend, registry.get(win).unwrap()).unwrap();
        let texture = manager.get(id).unwrap();
        assert_eq!((texture.width, texture.height), (16, 16));
        assert_eq!(texture.owner, Some(win));
        assert_eq!(backend.stats().readbacks, 1);
    }
}
