//! CPU pixel buffers and the pixel source seam
//!
//! A [`PixelSource`] is the narrow interface rasterizers, image decoders,
//! and other generators implement. `produce` is pure: it touches neither
//! the GPU nor the cache, so callers are free to run it on worker threads
//! and hand the buffer to a texture-create task at flush time.

use std::sync::Arc;

/// Pixel format of a CPU buffer or GPU texture
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Single-channel coverage/alpha
    Alpha8,
    /// 8-bit RGBA
    Rgba8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Alpha8 => 1,
            PixelFormat::Rgba8 => 4,
        }
    }
}

/// A CPU-side pixel buffer
#[derive(Clone, Debug)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Returns `None` when the data length does not match the dimensions.
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Option<Self> {
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if width == 0 || height == 0 || data.len() != expected {
            return None;
        }
        Some(Self {
            width,
            height,
            format,
            data,
        })
    }

    pub fn new_zeroed(width: u32, height: u32, format: PixelFormat) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        let len = width as usize * height as usize * format.bytes_per_pixel();
        Some(Self {
            width,
            height,
            format,
            data: vec![0; len],
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn byte_size(&self) -> usize {
        self.data.len()
    }
}

/// Pure producer of pixel data
///
/// Implementations must not touch the GPU or the resource cache; the
/// contract exists precisely so decoding and rasterization can run off
/// the rendering thread.
pub trait PixelSource: Send + Sync {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// True when the produced buffer is single-channel coverage.
    fn alpha_only(&self) -> bool;

    /// Produce the pixel data, or `None` on failure.
    fn produce(&self) -> Option<PixelBuffer>;
}

/// Wraps an already-produced buffer, e.g. the output of an image decoder
/// that ran on a worker thread.
pub struct BufferSource {
    buffer: PixelBuffer,
}

impl BufferSource {
    pub fn new(buffer: PixelBuffer) -> Arc<Self> {
        Arc::new(Self { buffer })
    }
}

impl PixelSource for BufferSource {
    fn width(&self) -> u32 {
        self.buffer.width()
    }

    fn height(&self) -> u32 {
        self.buffer.height()
    }

    fn alpha_only(&self) -> bool {
        self.buffer.format() == PixelFormat::Alpha8
    }

    fn produce(&self) -> Option<PixelBuffer> {
        Some(self.buffer.clone())
    }
}
