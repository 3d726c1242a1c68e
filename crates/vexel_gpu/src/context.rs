//! The rendering context
//!
//! The context owns everything with context lifetime: the resource cache,
//! the proxy provider, and the drawing manager. There are no process
//! globals; consumers hold a cheap clone of the context handle and reach
//! these through it. Dropping the last handle drops the cache and every
//! resource in it.

use std::sync::{Arc, Mutex};

use vexel_core::UniqueKey;

use crate::backend::{GpuBackend, ImageOrigin, TextureDesc, TextureHandle};
use crate::cache::ResourceCache;
use crate::manager::DrawingManager;
use crate::pixels::{PixelFormat, PixelSource};
use crate::provider::{ProxyProvider, RenderFlags};
use crate::proxy::{RenderTargetProxy, TextureProxy};

/// Capabilities of the backing GPU, queried once at context creation
#[derive(Clone, Copy, Debug)]
pub struct Caps {
    /// Whether single-channel alpha textures can be allocated
    pub supports_alpha8: bool,
    pub max_texture_size: u32,
}

impl Default for Caps {
    fn default() -> Self {
        Self {
            supports_alpha8: true,
            max_texture_size: 8192,
        }
    }
}

struct ContextInner {
    caps: Caps,
    cache: ResourceCache,
    provider: ProxyProvider,
    manager: Mutex<DrawingManager>,
}

/// Handle to one rendering context
///
/// Recording is single-threaded per context; the cache and the key
/// counters are the only state safe to touch from other threads.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Self::with_caps(Caps::default())
    }

    pub fn with_caps(caps: Caps) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                caps,
                cache: ResourceCache::new(),
                provider: ProxyProvider::new(),
                manager: Mutex::new(DrawingManager::new()),
            }),
        }
    }

    pub fn caps(&self) -> Caps {
        self.inner.caps
    }

    pub fn resource_cache(&self) -> &ResourceCache {
        &self.inner.cache
    }

    /// Deduplicated texture proxy for the content named by `key`.
    pub fn create_texture_proxy(
        &self,
        key: UniqueKey,
        source: Arc<dyn PixelSource>,
        mipmapped: bool,
        flags: RenderFlags,
    ) -> Option<TextureProxy> {
        let mut manager = self.inner.manager.lock().unwrap();
        self.inner.provider.create_texture_proxy(
            &self.inner.cache,
            &mut manager,
            &self.inner.caps,
            key,
            source,
            mipmapped,
            flags,
        )
    }

    pub fn create_empty_texture_proxy(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        mipmapped: bool,
    ) -> Option<TextureProxy> {
        let mut manager = self.inner.manager.lock().unwrap();
        self.inner.provider.create_empty_texture_proxy(
            &mut manager,
            &self.inner.caps,
            width,
            height,
            format,
            mipmapped,
        )
    }

    pub fn create_render_target_proxy(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        sample_count: u32,
        origin: ImageOrigin,
    ) -> Option<RenderTargetProxy> {
        let mut manager = self.inner.manager.lock().unwrap();
        self.inner.provider.create_render_target_proxy(
            &mut manager,
            &self.inner.caps,
            width,
            height,
            format,
            sample_count,
            origin,
        )
    }

    pub fn wrap_backend_texture(
        &self,
        handle: TextureHandle,
        desc: TextureDesc,
        origin: ImageOrigin,
        adopt: bool,
    ) -> TextureProxy {
        self.inner
            .provider
            .wrap_backend_texture(&self.inner.cache, handle, desc, origin, adopt)
    }

    /// Run `f` with the drawing manager locked. Recording and inspection
    /// go through here.
    pub fn with_drawing_manager<R>(&self, f: impl FnOnce(&mut DrawingManager) -> R) -> R {
        let mut manager = self.inner.manager.lock().unwrap();
        f(&mut manager)
    }

    /// Bound cache memory by evicting least-recently-used purgeable
    /// resources.
    pub fn purge_until_memory_to(&self, budget: usize) {
        self.inner.cache.purge_until_memory_to(budget);
    }

    /// Execute every recorded render task in creation order, then clear
    /// the task list.
    pub fn flush(&self, backend: &mut dyn GpuBackend) {
        let mut manager = self.inner.manager.lock().unwrap();
        manager.flush(backend, &self.inner.cache);
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("caps", &self.inner.caps)
            .finish()
    }
}
