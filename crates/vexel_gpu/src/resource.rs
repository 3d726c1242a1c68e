//! Cached GPU resources
//!
//! A [`Resource`] is anything the cache tracks: usually a texture, but
//! tests register plain CPU records too. The cache owns the lifecycle;
//! resources only report their memory cost, an optional scratch key, and
//! an optional backend handle to release when they are evicted.

use vexel_core::BytesKey;

use crate::backend::{TextureDesc, TextureHandle};
use crate::pixels::PixelFormat;

/// A cacheable GPU resource
pub trait Resource: Send + Sync + 'static {
    /// Bytes of GPU memory this resource accounts for.
    fn memory_usage(&self) -> usize;

    /// Scratch key words, or `None` to opt out of scratch reuse. Called
    /// once when the resource is registered.
    fn scratch_key(&self) -> Option<BytesKey> {
        None
    }

    /// Backend object to release when this resource is destroyed.
    fn gpu_handle(&self) -> Option<TextureHandle> {
        None
    }

    /// False for wrapped backend objects the cache must never destroy.
    fn owns_gpu_handle(&self) -> bool {
        true
    }
}

/// A GPU texture registered with the cache
#[derive(Debug)]
pub struct TextureResource {
    handle: TextureHandle,
    desc: TextureDesc,
    adopted: bool,
}

impl TextureResource {
    /// A texture the cache allocated itself and therefore owns.
    pub fn new(handle: TextureHandle, desc: TextureDesc) -> Self {
        Self {
            handle,
            desc,
            adopted: true,
        }
    }

    /// Wrap an externally created texture. With `adopt` the cache takes
    /// ownership and will release the handle on eviction; without it the
    /// handle is never destroyed by the cache.
    pub fn wrapped(handle: TextureHandle, desc: TextureDesc, adopt: bool) -> Self {
        Self {
            handle,
            desc,
            adopted: adopt,
        }
    }

    pub fn handle(&self) -> TextureHandle {
        self.handle
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    pub fn format(&self) -> PixelFormat {
        self.desc.format
    }
}

impl Resource for TextureResource {
    fn memory_usage(&self) -> usize {
        self.desc.byte_size()
    }

    fn scratch_key(&self) -> Option<BytesKey> {
        // Textures with equal allocation parameters are interchangeable.
        let mut key = BytesKey::with_capacity(4);
        key.write_u32(self.desc.width);
        key.write_u32(self.desc.height);
        key.write_u32(match self.desc.format {
            PixelFormat::Alpha8 => 0,
            PixelFormat::Rgba8 => 1,
        });
        key.write_u32((self.desc.sample_count << 1) | u32::from(self.desc.mipmapped));
        Some(key)
    }

    fn gpu_handle(&self) -> Option<TextureHandle> {
        Some(self.handle)
    }

    fn owns_gpu_handle(&self) -> bool {
        self.adopted
    }
}
