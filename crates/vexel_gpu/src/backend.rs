//! The narrow GPU backend contract
//!
//! Everything the task graph needs from a concrete graphics API. Render
//! tasks call these entry points during flush and nowhere else; a failed
//! call fails the task, is logged, and flush moves on to the next task.

use thiserror::Error;

use vexel_core::{Point, Rect};

use crate::ops::DrawOp;
use crate::pixels::{PixelBuffer, PixelFormat};

/// Opaque handle to a backend GPU texture or render target attachment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u64);

/// Which corner backend texture coordinates originate from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ImageOrigin {
    #[default]
    TopLeft,
    BottomLeft,
}

/// Allocation parameters for a texture or render target
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub mipmapped: bool,
    pub sample_count: u32,
}

impl TextureDesc {
    pub fn texture(width: u32, height: u32, format: PixelFormat, mipmapped: bool) -> Self {
        Self {
            width,
            height,
            format,
            mipmapped,
            sample_count: 1,
        }
    }

    /// Estimated GPU memory, used for cache accounting.
    pub fn byte_size(&self) -> usize {
        let base = self.width as usize * self.height as usize * self.format.bytes_per_pixel();
        let base = base * self.sample_count.max(1) as usize;
        if self.mipmapped {
            // Full mip chain converges to 4/3 of the base level.
            base + base / 3
        } else {
            base
        }
    }
}

/// A resolved render target, handed to the backend at submit time
#[derive(Clone, Copy, Debug)]
pub struct RenderTarget {
    pub handle: TextureHandle,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub sample_count: u32,
    pub origin: ImageOrigin,
}

/// Errors surfaced by backend calls
#[derive(Error, Debug)]
pub enum BackendError {
    /// Texture allocation or upload failed
    #[error("texture allocation failed: {0}")]
    Allocation(String),

    /// The backend cannot allocate this pixel format
    #[error("unsupported pixel format: {0:?}")]
    UnsupportedFormat(PixelFormat),

    /// A handle did not name a live backend object
    #[error("invalid texture handle: {0:?}")]
    InvalidHandle(TextureHandle),

    /// Draw submission was rejected
    #[error("draw submission failed: {0}")]
    Submit(String),
}

/// The GPU contract render tasks execute against
///
/// Implementations bind a concrete graphics API. All calls happen on the
/// thread that owns the rendering context, inside flush.
pub trait GpuBackend {
    /// Allocate a texture, optionally uploading initial pixel data.
    fn allocate_texture(
        &mut self,
        desc: &TextureDesc,
        pixels: Option<&PixelBuffer>,
    ) -> Result<TextureHandle, BackendError>;

    /// Release a texture previously allocated or adopted.
    fn delete_texture(&mut self, handle: TextureHandle);

    /// Resolve a multisampled render target into its texture.
    fn resolve_render_target(&mut self, target: TextureHandle) -> Result<(), BackendError>;

    /// Regenerate the mip chain of a mipmapped texture.
    fn regenerate_mipmaps(&mut self, texture: TextureHandle) -> Result<(), BackendError>;

    /// Copy a region of a render target into a texture.
    fn copy_render_target_to_texture(
        &mut self,
        source: TextureHandle,
        dest: TextureHandle,
        src_rect: Rect,
        dst_point: Point,
    ) -> Result<(), BackendError>;

    /// Submit a batch of draw ops against one target.
    fn submit_ops(&mut self, target: &RenderTarget, ops: &[DrawOp]) -> Result<(), BackendError>;
}

/// Recording backend for tests: every call is counted, nothing touches a
/// real GPU.
#[derive(Default)]
pub struct MockBackend {
    next_handle: u64,
    pub allocations: Vec<TextureDesc>,
    pub deletions: Vec<TextureHandle>,
    pub resolves: Vec<TextureHandle>,
    pub mipmap_regens: Vec<TextureHandle>,
    pub copies: Vec<(TextureHandle, TextureHandle)>,
    /// (target handle, op count) per submission
    pub submissions: Vec<(TextureHandle, usize)>,
    /// When set, allocations of this format fail
    pub reject_format: Option<PixelFormat>,
    /// When set, every submission fails
    pub fail_submits: bool,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GpuBackend for MockBackend {
    fn allocate_texture(
        &mut self,
        desc: &TextureDesc,
        _pixels: Option<&PixelBuffer>,
    ) -> Result<TextureHandle, BackendError> {
        if self.reject_format == Some(desc.format) {
            return Err(BackendError::UnsupportedFormat(desc.format));
        }
        self.next_handle += 1;
        self.allocations.push(*desc);
        Ok(TextureHandle(self.next_handle))
    }

    fn delete_texture(&mut self, handle: TextureHandle) {
        self.deletions.push(handle);
    }

    fn resolve_render_target(&mut self, target: TextureHandle) -> Result<(), BackendError> {
        self.resolves.push(target);
        Ok(())
    }

    fn regenerate_mipmaps(&mut self, texture: TextureHandle) -> Result<(), BackendError> {
        self.mipmap_regens.push(texture);
        Ok(())
    }

    fn copy_render_target_to_texture(
        &mut self,
        source: TextureHandle,
        dest: TextureHandle,
        _src_rect: Rect,
        _dst_point: Point,
    ) -> Result<(), BackendError> {
        self.copies.push((source, dest));
        Ok(())
    }

    fn submit_ops(&mut self, target: &RenderTarget, ops: &[DrawOp]) -> Result<(), BackendError> {
        if self.fail_submits {
            return Err(BackendError::Submit("mock submission failure".into()));
        }
        self.submissions.push((target.handle, ops.len()));
        Ok(())
    }
}
