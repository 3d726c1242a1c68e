//! The proxy provider
//!
//! Factory for texture and render target proxies. Its job is
//! deduplication: a unique key names one piece of GPU content, so two
//! requests for the same key must resolve to the same proxy — whether the
//! first request's creation work is still pending or its resource is
//! already cached. The same decode or rasterization is never issued
//! twice concurrently.

use std::sync::{Arc, Mutex};

use bitflags::bitflags;
use rustc_hash::FxHashMap;

use vexel_core::key::KeyWords;
use vexel_core::UniqueKey;

use crate::backend::{ImageOrigin, TextureDesc, TextureHandle};
use crate::cache::ResourceCache;
use crate::context::Caps;
use crate::manager::DrawingManager;
use crate::pixels::{PixelFormat, PixelSource};
use crate::proxy::{RenderTargetProxy, TextureProxy, WeakTextureProxy};
use crate::resource::TextureResource;

bitflags! {
    /// Per-request rendering flags
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct RenderFlags: u32 {
        /// Skip proxy deduplication for this request
        const DISABLE_CACHE = 1 << 0;
    }
}

#[derive(Default)]
struct ProviderState {
    proxies: FxHashMap<KeyWords, WeakTextureProxy>,
}

/// Deduplicating factory for deferred GPU content
#[derive(Default)]
pub struct ProxyProvider {
    state: Mutex<ProviderState>,
}

impl ProxyProvider {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Proxy for the content named by `key`. An existing live proxy or
    /// cached resource is reused; otherwise a texture-create task wrapping
    /// `source` is recorded and a deferred proxy returned. Returns `None`
    /// for degenerate dimensions.
    pub fn create_texture_proxy(
        &self,
        cache: &ResourceCache,
        manager: &mut DrawingManager,
        caps: &Caps,
        key: UniqueKey,
        source: Arc<dyn PixelSource>,
        mipmapped: bool,
        flags: RenderFlags,
    ) -> Option<TextureProxy> {
        let width = source.width();
        let height = source.height();
        if width == 0
            || height == 0
            || width > caps.max_texture_size
            || height > caps.max_texture_size
        {
            return None;
        }
        let mut state = self.state.lock().unwrap();
        let dedup = !flags.contains(RenderFlags::DISABLE_CACHE);
        if dedup {
            if let Some(existing) = state.proxies.get(key.words()) {
                if let Some(proxy) = existing.upgrade() {
                    return Some(proxy);
                }
                state.proxies.remove(key.words());
            }
        }
        let format = if source.alpha_only() && caps.supports_alpha8 {
            PixelFormat::Alpha8
        } else {
            PixelFormat::Rgba8
        };
        let desc = TextureDesc::texture(width, height, format, mipmapped);
        let proxy = if let Some(resource) = cache.find_unique(&key) {
            TextureProxy::instantiated(key, desc, ImageOrigin::TopLeft, resource)
        } else {
            let proxy = TextureProxy::deferred(key, desc, ImageOrigin::TopLeft, Some(source));
            manager.record_texture_create(proxy.clone());
            proxy
        };
        if dedup {
            state
                .proxies
                .insert(proxy.unique_key().words().clone(), proxy.downgrade());
        }
        Some(proxy)
    }

    /// Deferred proxy for an empty texture, e.g. a copy destination. The
    /// storage materializes at flush through the recorded create task.
    pub fn create_empty_texture_proxy(
        &self,
        manager: &mut DrawingManager,
        caps: &Caps,
        width: u32,
        height: u32,
        format: PixelFormat,
        mipmapped: bool,
    ) -> Option<TextureProxy> {
        if width == 0
            || height == 0
            || width > caps.max_texture_size
            || height > caps.max_texture_size
        {
            return None;
        }
        let desc = TextureDesc::texture(width, height, format, mipmapped);
        let proxy = TextureProxy::deferred(UniqueKey::make(), desc, ImageOrigin::TopLeft, None);
        manager.record_texture_create(proxy.clone());
        Some(proxy)
    }

    /// Deferred offscreen render target. Storage materializes at flush
    /// through the recorded create task.
    pub fn create_render_target_proxy(
        &self,
        manager: &mut DrawingManager,
        caps: &Caps,
        width: u32,
        height: u32,
        format: PixelFormat,
        sample_count: u32,
        origin: ImageOrigin,
    ) -> Option<RenderTargetProxy> {
        if width == 0
            || height == 0
            || width > caps.max_texture_size
            || height > caps.max_texture_size
        {
            return None;
        }
        let desc = TextureDesc {
            width,
            height,
            format,
            mipmapped: false,
            sample_count: sample_count.max(1),
        };
        let texture = TextureProxy::deferred(UniqueKey::make(), desc, origin, None);
        manager.record_texture_create(texture.clone());
        Some(RenderTargetProxy::new(texture, sample_count.max(1)))
    }

    /// Wrap an externally supplied backend texture. With `adopt` the
    /// cache takes ownership and releases the handle when the resource is
    /// destroyed; otherwise the handle is never destroyed by the cache.
    pub fn wrap_backend_texture(
        &self,
        cache: &ResourceCache,
        handle: TextureHandle,
        desc: TextureDesc,
        origin: ImageOrigin,
        adopt: bool,
    ) -> TextureProxy {
        let key = UniqueKey::make();
        let resource = Arc::new(TextureResource::wrapped(handle, desc, adopt));
        let resource = cache.insert(resource, Some(&key));
        TextureProxy::instantiated(key, desc, origin, resource)
    }
}
