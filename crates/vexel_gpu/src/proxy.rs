//! Deferred resource proxies
//!
//! A proxy stands in for a GPU texture that may not exist yet. During
//! recording only the key and dimensions are known; at flush the proxy is
//! instantiated — found in the cache, or materialized from its pending
//! pixel source. A live proxy holds its unique key strongly, so the
//! resource it names stays exclusively cached for as long as anyone can
//! still draw with it.

use std::sync::{Arc, Mutex};

use vexel_core::UniqueKey;

use crate::backend::{GpuBackend, ImageOrigin, RenderTarget, TextureDesc};
use crate::cache::{ResourceCache, ResourceRef};
use crate::pixels::{PixelFormat, PixelSource};
use crate::resource::TextureResource;
use crate::tasks::TaskError;

/// Creation work a deferred proxy still has to run, consumed exactly once
pub(crate) struct PendingCreate {
    pub desc: TextureDesc,
    /// `None` materializes an empty texture (render target storage)
    pub source: Option<Arc<dyn PixelSource>>,
}

enum ProxyContent {
    /// Not yet materialized; the pending work is `None` once consumed
    Deferred(Option<PendingCreate>),
    Instantiated(ResourceRef),
}

pub(crate) struct TextureProxyInner {
    key: UniqueKey,
    desc: TextureDesc,
    origin: ImageOrigin,
    content: Mutex<ProxyContent>,
}

/// Deferred handle to a GPU texture
#[derive(Clone)]
pub struct TextureProxy {
    inner: Arc<TextureProxyInner>,
}

impl TextureProxy {
    pub(crate) fn deferred(
        key: UniqueKey,
        desc: TextureDesc,
        origin: ImageOrigin,
        source: Option<Arc<dyn PixelSource>>,
    ) -> Self {
        Self {
            inner: Arc::new(TextureProxyInner {
                key,
                desc,
                origin,
                content: Mutex::new(ProxyContent::Deferred(Some(PendingCreate {
                    desc,
                    source,
                }))),
            }),
        }
    }

    pub(crate) fn instantiated(
        key: UniqueKey,
        desc: TextureDesc,
        origin: ImageOrigin,
        resource: ResourceRef,
    ) -> Self {
        Self {
            inner: Arc::new(TextureProxyInner {
                key,
                desc,
                origin,
                content: Mutex::new(ProxyContent::Instantiated(resource)),
            }),
        }
    }

    pub fn width(&self) -> u32 {
        self.inner.desc.width
    }

    pub fn height(&self) -> u32 {
        self.inner.desc.height
    }

    pub fn format(&self) -> PixelFormat {
        self.inner.desc.format
    }

    pub fn alpha_only(&self) -> bool {
        self.inner.desc.format == PixelFormat::Alpha8
    }

    pub fn mipmapped(&self) -> bool {
        self.inner.desc.mipmapped
    }

    pub fn origin(&self) -> ImageOrigin {
        self.inner.origin
    }

    pub fn unique_key(&self) -> &UniqueKey {
        &self.inner.key
    }

    pub fn is_instantiated(&self) -> bool {
        matches!(
            *self.inner.content.lock().unwrap(),
            ProxyContent::Instantiated(_)
        )
    }

    /// Two proxies refer to the same eventual texture.
    pub fn ptr_eq(&self, other: &TextureProxy) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> WeakTextureProxy {
        WeakTextureProxy(Arc::downgrade(&self.inner))
    }

    /// Resolve this proxy to a concrete resource. Runs only at flush: a
    /// cache hit wins, otherwise the pending creation work runs here, on
    /// the thread owning the backend. Repeated calls return the same
    /// resource; the creation work is consumed exactly once even when the
    /// proxy is shared between tasks.
    pub fn instantiate(
        &self,
        cache: &ResourceCache,
        backend: &mut dyn GpuBackend,
    ) -> Result<ResourceRef, TaskError> {
        let mut content = self.inner.content.lock().unwrap();
        if let ProxyContent::Instantiated(resource) = &*content {
            return Ok(resource.clone());
        }
        if let Some(resource) = cache.find_unique(&self.inner.key) {
            *content = ProxyContent::Instantiated(resource.clone());
            return Ok(resource);
        }
        let pending = match &mut *content {
            ProxyContent::Deferred(pending) => pending.take(),
            ProxyContent::Instantiated(resource) => return Ok(resource.clone()),
        };
        let Some(create) = pending else {
            return Err(TaskError::NeverMaterialized);
        };
        let pixels = match &create.source {
            Some(source) => {
                let buffer = source.produce().ok_or(TaskError::EmptySource)?;
                Some(adapt_buffer(buffer, create.desc.format).ok_or(TaskError::EmptySource)?)
            }
            None => None,
        };
        let handle = backend.allocate_texture(&create.desc, pixels.as_ref())?;
        let resource = Arc::new(TextureResource::new(handle, create.desc));
        let resource = cache.insert(resource, Some(&self.inner.key));
        *content = ProxyContent::Instantiated(resource.clone());
        Ok(resource)
    }
}

impl std::fmt::Debug for TextureProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureProxy")
            .field("desc", &self.inner.desc)
            .field("instantiated", &self.is_instantiated())
            .finish()
    }
}

/// Weak reference used by the proxy provider's dedup table
pub(crate) struct WeakTextureProxy(std::sync::Weak<TextureProxyInner>);

impl WeakTextureProxy {
    pub(crate) fn upgrade(&self) -> Option<TextureProxy> {
        self.0.upgrade().map(|inner| TextureProxy { inner })
    }
}

/// Convert a produced buffer to the allocated texture format when the
/// alpha-only format had to fall back to RGBA.
fn adapt_buffer(
    buffer: crate::pixels::PixelBuffer,
    format: PixelFormat,
) -> Option<crate::pixels::PixelBuffer> {
    if buffer.format() == format {
        return Some(buffer);
    }
    match (buffer.format(), format) {
        (PixelFormat::Alpha8, PixelFormat::Rgba8) => {
            let mut data = Vec::with_capacity(buffer.data().len() * 4);
            for &alpha in buffer.data() {
                // Premultiplied white carrying the coverage in every channel.
                data.extend_from_slice(&[alpha, alpha, alpha, alpha]);
            }
            crate::pixels::PixelBuffer::new(buffer.width(), buffer.height(), format, data)
        }
        _ => Some(buffer),
    }
}

/// Deferred handle to a render target
#[derive(Clone, Debug)]
pub struct RenderTargetProxy {
    texture: TextureProxy,
    sample_count: u32,
}

impl RenderTargetProxy {
    pub(crate) fn new(texture: TextureProxy, sample_count: u32) -> Self {
        Self {
            texture,
            sample_count,
        }
    }

    pub fn width(&self) -> u32 {
        self.texture.width()
    }

    pub fn height(&self) -> u32 {
        self.texture.height()
    }

    pub fn format(&self) -> PixelFormat {
        self.texture.format()
    }

    pub fn origin(&self) -> ImageOrigin {
        self.texture.origin()
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    pub fn texture_proxy(&self) -> &TextureProxy {
        &self.texture
    }

    pub fn ptr_eq(&self, other: &RenderTargetProxy) -> bool {
        self.texture.ptr_eq(&other.texture)
    }

    /// Instantiate the backing texture and describe the target for the
    /// backend.
    pub fn resolve(
        &self,
        cache: &ResourceCache,
        backend: &mut dyn GpuBackend,
    ) -> Result<RenderTarget, TaskError> {
        let resource = self.texture.instantiate(cache, backend)?;
        let handle = resource
            .gpu_handle()
            .ok_or(TaskError::NeverMaterialized)?;
        Ok(RenderTarget {
            handle,
            width: self.width(),
            height: self.height(),
            format: self.format(),
            sample_count: self.sample_count,
            origin: self.origin(),
        })
    }
}
